use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::executor::{Executor, ShutdownReport};
use crate::mailbox::WorkerState;

/// Snapshot for one registered executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorRecord {
	pub name: String,
	pub state: WorkerState,
	pub posted: u64,
	pub completed: u64,
}

/// Explicit name → executor map, shared by clones.
#[derive(Debug, Default, Clone)]
pub struct ExecutorRegistry {
	inner: Arc<RwLock<HashMap<String, Executor>>>,
}

impl ExecutorRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `executor` under its name, returning the one it replaces.
	///
	/// The replaced executor keeps running until its last clone is dropped or
	/// it is shut down explicitly.
	pub fn register(&self, executor: Executor) -> Option<Executor> {
		let name = executor.name().to_string();
		let replaced = self.inner.write().insert(name.clone(), executor);
		tracing::debug!(executor = %name, replaced = replaced.is_some(), "executor.registry.register");
		replaced
	}

	pub fn get(&self, name: &str) -> Option<Executor> {
		self.inner.read().get(name).cloned()
	}

	/// Removes one executor without shutting it down.
	pub fn remove(&self, name: &str) -> Option<Executor> {
		let removed = self.inner.write().remove(name);
		if removed.is_some() {
			tracing::debug!(executor = %name, "executor.registry.remove");
		}
		removed
	}

	pub fn len(&self) -> usize {
		self.inner.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.read().is_empty()
	}

	/// Returns registered names sorted.
	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<_> = self.inner.read().keys().cloned().collect();
		names.sort();
		names
	}

	/// Returns snapshots sorted by name.
	pub fn snapshots(&self) -> Vec<ExecutorRecord> {
		let mut records: Vec<_> = self
			.inner
			.read()
			.iter()
			.map(|(name, executor)| {
				let stats = executor.stats();
				ExecutorRecord {
					name: name.clone(),
					state: stats.state,
					posted: stats.posted,
					completed: stats.completed,
				}
			})
			.collect();
		records.sort_by(|a, b| a.name.cmp(&b.name));
		records
	}

	/// Drains the registry and shuts every executor down, sorted by name.
	pub fn shutdown_all(&self) -> Vec<(String, ShutdownReport)> {
		let drained: Vec<_> = self.inner.write().drain().collect();
		let mut reports: Vec<_> = drained
			.into_iter()
			.map(|(name, executor)| {
				let report = executor.shutdown();
				(name, report)
			})
			.collect();
		reports.sort_by(|a, b| a.0.cmp(&b.0));
		tracing::debug!(count = reports.len(), "executor.registry.shutdown_all");
		reports
	}
}
