//! Error types for bean execution and executor dispatch.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Failure raised by a bean method (or a continuation) itself.
///
/// Cloneable so one captured outcome can feed a continuation chain and still
/// be available to a later synchronous read.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct BeanError {
	message: String,
	detail: Option<Value>,
}

impl BeanError {
	/// Creates an error with a human-readable message.
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			detail: None,
		}
	}

	/// Attaches structured detail to this error.
	#[must_use]
	pub fn with_detail(mut self, detail: Value) -> Self {
		self.detail = Some(detail);
		self
	}

	pub fn message(&self) -> &str {
		&self.message
	}

	pub fn detail(&self) -> Option<&Value> {
		self.detail.as_ref()
	}
}

impl From<serde_json::Error> for BeanError {
	fn from(err: serde_json::Error) -> Self {
		Self::new(format!("value conversion failed: {err}"))
	}
}

/// Errors surfaced by [`crate::Executor`] and [`crate::Handle`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutorError {
	/// The method name is not declared on the bean.
	#[error("no such method: {method}")]
	NoSuchMethod {
		/// The unknown method name.
		method: String,
	},

	/// The bean method failed; carries the captured error.
	#[error("invocation failed: {0}")]
	Invocation(#[from] BeanError),

	/// Waiting for the mailbox slot exceeded the caller's bound.
	#[error("mailbox still busy after {waited:?}")]
	MailboxBusyTimeout {
		/// How long the caller waited.
		waited: Duration,
	},

	/// The executor is shutting down or stopped.
	#[error("executor worker is shut down")]
	WorkerShutdown,

	/// The worker failed outside ordinary bean errors; the executor is unusable.
	#[error("executor worker fault: {0}")]
	WorkerFault(String),

	/// A blocking operation was issued from the executor's own worker thread.
	#[error("blocking call to '{method}' issued from the executor's worker thread")]
	Reentrant {
		/// Method the blocked operation targeted.
		method: String,
	},

	/// The executor config failed validation; no worker was started.
	#[error("invalid executor config: {0}")]
	InvalidConfig(String),

	/// The worker thread could not be started.
	#[error("failed to spawn executor worker: {0}")]
	Spawn(String),
}

impl ExecutorError {
	/// Returns the bean error when this is an invocation failure.
	pub fn as_bean_error(&self) -> Option<&BeanError> {
		match self {
			Self::Invocation(err) => Some(err),
			_ => None,
		}
	}

	/// Returns true for engine-level faults that make the executor unusable.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::WorkerFault(_) | Self::Spawn(_))
	}
}

/// Errors raised while loading executor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A field holds a value outside its accepted range.
	#[error("invalid value for '{field}': {reason}")]
	InvalidValue {
		/// Field name as written in the document.
		field: &'static str,
		/// Why the value was rejected.
		reason: String,
	},
}

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;
