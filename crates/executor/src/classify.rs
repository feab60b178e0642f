//! Per-method dispatch classification.
//!
//! The table is built once from a bean's declared [`crate::Methods`] when the
//! bean is bound to an executor and is never mutated afterward, so callers can
//! look up modes without touching the mailbox.

use std::collections::HashMap;

use crate::error::{ExecutorError, Result};

/// How the call proxy routes an invocation of one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DispatchMode {
	/// Caller waits for the result.
	#[default]
	Blocking,
	/// Caller waits for the result; declared as requiring exclusive access.
	///
	/// Execution is already exclusive at the mailbox, so the route is the same
	/// as [`DispatchMode::Blocking`].
	Exclusive,
	/// Caller gets a [`crate::Handle`] back immediately.
	Async,
}

impl DispatchMode {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Blocking => "blocking",
			Self::Exclusive => "exclusive",
			Self::Async => "async",
		}
	}

	/// Returns true when the proxy waits for the outcome before returning.
	pub const fn waits(self) -> bool {
		!matches!(self, Self::Async)
	}
}

/// Immutable method name to dispatch mode mapping.
#[derive(Debug, Clone, Default)]
pub struct ClassificationTable {
	modes: HashMap<String, DispatchMode>,
}

impl ClassificationTable {
	pub(crate) fn from_modes(modes: HashMap<String, DispatchMode>) -> Self {
		Self { modes }
	}

	/// Returns the dispatch mode for `method`.
	pub fn classify(&self, method: &str) -> Result<DispatchMode> {
		self.modes.get(method).copied().ok_or_else(|| ExecutorError::NoSuchMethod { method: method.to_string() })
	}

	pub fn contains(&self, method: &str) -> bool {
		self.modes.contains_key(method)
	}

	pub fn len(&self) -> usize {
		self.modes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.modes.is_empty()
	}

	/// Returns `(method, mode)` pairs sorted by method name.
	pub fn iter(&self) -> impl Iterator<Item = (&str, DispatchMode)> {
		let mut entries: Vec<_> = self.modes.iter().map(|(name, mode)| (name.as_str(), *mode)).collect();
		entries.sort_by(|a, b| a.0.cmp(b.0));
		entries.into_iter()
	}
}
