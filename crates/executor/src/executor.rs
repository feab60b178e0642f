//! Caller-facing proxy for one bean.
//!
//! An [`Executor`] owns the worker thread bound to a bean and forwards method
//! calls by name. Blocking and exclusive methods wait for their outcome;
//! async methods return a [`Handle`] as soon as the command is posted.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::bean::{Bean, Methods};
use crate::classify::{ClassificationTable, DispatchMode};
use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::handle::{Handle, PendingCall};
use crate::mailbox::{ExecutorStats, Mailbox, Reply, WorkerState};
use crate::worker::Worker;

/// Result of [`Executor::call`], routed by the method's classification.
#[derive(Debug)]
pub enum Dispatched {
	/// A blocking or exclusive method completed with this value.
	Value(Value),
	/// An async method was posted; its outcome arrives on the handle.
	Pending(Handle),
}

impl Dispatched {
	/// Waits for the value regardless of route.
	pub fn wait(self) -> Result<Value> {
		match self {
			Self::Value(value) => Ok(value),
			Self::Pending(handle) => handle.wait(),
		}
	}
}

/// Final counters reported by [`Executor::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
	pub posted: u64,
	pub completed: u64,
	/// Fault that stopped the worker early, if any.
	pub fault: Option<String>,
}

impl ShutdownReport {
	pub fn is_clean(&self) -> bool {
		self.fault.is_none()
	}
}

struct ExecutorInner {
	name: Arc<str>,
	classification: ClassificationTable,
	mailbox: Arc<Mailbox>,
	worker_thread: ThreadId,
	join: Mutex<Option<JoinHandle<()>>>,
	mailbox_wait: Option<Duration>,
}

impl Drop for ExecutorInner {
	fn drop(&mut self) {
		if self.mailbox.request_shutdown() {
			tracing::debug!(executor = %self.name, joined = false, "executor.shutdown");
		}
	}
}

/// Handle to a running executor. Clones share the same worker.
#[derive(Clone)]
pub struct Executor {
	inner: Arc<ExecutorInner>,
}

impl Executor {
	/// Starts a worker bound to `bean` with the default configuration.
	pub fn create<B: Bean>(bean: B) -> Result<Self> {
		Self::with_config(bean, ExecutorConfig::default())
	}

	pub fn with_config<B: Bean>(bean: B, config: ExecutorConfig) -> Result<Self> {
		Self::from_methods(bean, B::methods(), config)
	}

	/// Starts a worker from an explicit method table.
	///
	/// The config is validated first; an invalid one yields
	/// [`ExecutorError::InvalidConfig`] and no thread is started.
	pub fn from_methods<B>(bean: B, methods: Methods<B>, config: ExecutorConfig) -> Result<Self>
	where
		B: Send + 'static,
	{
		config.validate().map_err(|err| ExecutorError::InvalidConfig(err.to_string()))?;
		let (classification, callables) = methods.split();
		let name: Arc<str> = Arc::from(config.name.as_str());
		let mailbox = Arc::new(Mailbox::new());
		let worker = Worker::new(Arc::clone(&name), bean, callables, Arc::clone(&mailbox));

		let join = thread::Builder::new()
			.name(config.resolved_thread_name())
			.spawn(move || worker.run())
			.map_err(|err| ExecutorError::Spawn(err.to_string()))?;

		tracing::debug!(
			executor = %name,
			thread = %config.resolved_thread_name(),
			methods = classification.len(),
			"executor.start"
		);

		Ok(Self {
			inner: Arc::new(ExecutorInner {
				name,
				classification,
				mailbox,
				worker_thread: join.thread().id(),
				join: Mutex::new(Some(join)),
				mailbox_wait: config.mailbox_wait(),
			}),
		})
	}

	/// Runs `method` and blocks for its value, whatever its classification.
	pub fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
		let mode = self.inner.classification.classify(method)?;
		self.post_and_wait(method, mode, args, self.inner.mailbox_wait)
	}

	/// Like [`Self::invoke`], bounding the wait for a free mailbox slot.
	pub fn invoke_within(&self, method: &str, args: Vec<Value>, timeout: Duration) -> Result<Value> {
		let mode = self.inner.classification.classify(method)?;
		self.post_and_wait(method, mode, args, Some(timeout))
	}

	/// Posts `method` and returns a handle without waiting for it to run.
	pub fn invoke_async(&self, method: &str, args: Vec<Value>) -> Result<Handle> {
		let mode = self.inner.classification.classify(method)?;
		self.post_async(method, mode, args, self.inner.mailbox_wait)
	}

	pub fn invoke_async_within(&self, method: &str, args: Vec<Value>, timeout: Duration) -> Result<Handle> {
		let mode = self.inner.classification.classify(method)?;
		self.post_async(method, mode, args, Some(timeout))
	}

	/// Dispatches by the method's declared mode.
	pub fn call(&self, method: &str, args: Vec<Value>) -> Result<Dispatched> {
		let mode = self.inner.classification.classify(method)?;
		if mode.waits() {
			self.post_and_wait(method, mode, args, self.inner.mailbox_wait).map(Dispatched::Value)
		} else {
			self.post_async(method, mode, args, self.inner.mailbox_wait).map(Dispatched::Pending)
		}
	}

	fn post_and_wait(&self, method: &str, mode: DispatchMode, args: Vec<Value>, bound: Option<Duration>) -> Result<Value> {
		self.guard_reentry(method)?;
		let (id, ()) = self.inner.mailbox.post(method, mode, args, bound, |_| (Reply::Wait, ()))?;
		tracing::trace!(executor = %self.inner.name, call = %id, method, mode = mode.as_str(), "executor.post");
		self.inner.mailbox.await_outcome(id)
	}

	fn post_async(&self, method: &str, mode: DispatchMode, args: Vec<Value>, bound: Option<Duration>) -> Result<Handle> {
		self.guard_reentry(method)?;
		let worker = self.inner.worker_thread;
		let (id, pending) = self.inner.mailbox.post(method, mode, args, bound, |id| {
			let pending = Arc::new(PendingCall::new(id, method, worker));
			(Reply::Chain(Arc::clone(&pending)), pending)
		})?;
		tracing::trace!(executor = %self.inner.name, call = %id, method, mode = mode.as_str(), "executor.post");
		Ok(Handle::new(pending))
	}

	/// Posting from the worker would wait on a slot only the worker can free.
	fn guard_reentry(&self, method: &str) -> Result<()> {
		if thread::current().id() == self.inner.worker_thread {
			return Err(ExecutorError::Reentrant { method: method.to_string() });
		}
		Ok(())
	}

	/// Stops the worker after the posted command and every caller already
	/// waiting for the mailbox, then joins it.
	///
	/// Idempotent; concurrent callers all return once the worker has stopped.
	/// Called from the worker thread itself, it only requests the stop.
	pub fn shutdown(&self) -> ShutdownReport {
		let inner = &self.inner;
		let initiated = inner.mailbox.request_shutdown();

		if thread::current().id() != inner.worker_thread {
			let join = inner.join.lock().take();
			if let Some(join) = join
				&& join.join().is_err()
			{
				inner.mailbox.fault("worker thread panicked during shutdown".to_string());
			}
			inner.mailbox.wait_stopped();
		}

		let stats = inner.mailbox.snapshot();
		let report = ShutdownReport {
			posted: stats.posted,
			completed: stats.completed,
			fault: inner.mailbox.fault_message(),
		};
		if initiated {
			tracing::debug!(
				executor = %inner.name,
				posted = report.posted,
				completed = report.completed,
				fault = ?report.fault,
				"executor.shutdown"
			);
		}
		report
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn state(&self) -> WorkerState {
		self.inner.mailbox.snapshot().state
	}

	pub fn stats(&self) -> ExecutorStats {
		self.inner.mailbox.snapshot()
	}

	pub fn classification(&self) -> &ClassificationTable {
		&self.inner.classification
	}

	/// Returns true when both values refer to the same worker.
	pub fn same_worker(&self, other: &Executor) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl fmt::Debug for Executor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Executor")
			.field("name", &self.inner.name)
			.field("stats", &self.stats())
			.finish_non_exhaustive()
	}
}
