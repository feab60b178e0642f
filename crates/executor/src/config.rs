//! Executor configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Returns the default executor name.
fn default_name() -> String {
	"executor".to_string()
}

/// Configuration for one executor.
///
/// Every field has a default, so an empty TOML document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
	/// Registry key and tracing field for the executor.
	pub name: String,
	/// Worker thread name. Defaults to `bean-executor:{name}`.
	pub thread_name: Option<String>,
	/// Default bound, in milliseconds, on waiting for a free mailbox slot.
	/// `None` waits indefinitely.
	pub mailbox_timeout_ms: Option<u64>,
}

impl Default for ExecutorConfig {
	fn default() -> Self {
		Self {
			name: default_name(),
			thread_name: None,
			mailbox_timeout_ms: None,
		}
	}
}

impl ExecutorConfig {
	/// Creates a config with the given executor name.
	pub fn named(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}

	/// Parses and validates a TOML document.
	pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Sets the worker thread name.
	#[must_use]
	pub fn thread_name(mut self, name: impl Into<String>) -> Self {
		self.thread_name = Some(name.into());
		self
	}

	/// Sets the default mailbox wait bound.
	///
	/// # Panics
	///
	/// Panics if `timeout` is zero.
	#[must_use]
	pub fn mailbox_timeout(mut self, timeout: Duration) -> Self {
		assert!(!timeout.is_zero(), "mailbox timeout must be > 0");
		self.mailbox_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
		self
	}

	/// Checks field ranges.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.name.trim().is_empty() {
			return Err(ConfigError::InvalidValue {
				field: "name",
				reason: "must not be empty".to_string(),
			});
		}
		if self.resolved_thread_name().contains('\0') {
			return Err(ConfigError::InvalidValue {
				field: "thread_name",
				reason: "must not contain NUL bytes".to_string(),
			});
		}
		if self.mailbox_timeout_ms == Some(0) {
			return Err(ConfigError::InvalidValue {
				field: "mailbox_timeout_ms",
				reason: "must be > 0 (omit it to wait indefinitely)".to_string(),
			});
		}
		Ok(())
	}

	pub fn resolved_thread_name(&self) -> String {
		self.thread_name.clone().unwrap_or_else(|| format!("bean-executor:{}", self.name))
	}

	pub fn mailbox_wait(&self) -> Option<Duration> {
		self.mailbox_timeout_ms.map(Duration::from_millis)
	}
}
