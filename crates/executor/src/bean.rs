//! Bean declaration surface: typed method tables and per-call context.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::classify::{ClassificationTable, DispatchMode};
use crate::error::BeanError;
use crate::handle::PendingCall;

/// Identifier allocated to each posted command, in post order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub(crate) u64);

impl CallId {
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for CallId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// A stateful object whose methods run on an executor's worker thread.
///
/// Implementors declare their callable surface once; the executor builds its
/// classification table from it when the bean is bound.
pub trait Bean: Send + Sized + 'static {
	fn methods() -> Methods<Self>;
}

pub(crate) type MethodFn<B> = Box<dyn Fn(&mut B, &Call<'_>) -> Result<Value, BeanError> + Send>;

/// Declared methods of a bean: name, dispatch mode, and typed callable.
pub struct Methods<B> {
	entries: HashMap<String, (DispatchMode, MethodFn<B>)>,
}

impl<B> Default for Methods<B> {
	fn default() -> Self {
		Self { entries: HashMap::new() }
	}
}

impl<B> fmt::Debug for Methods<B> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut names: Vec<_> = self.entries.iter().map(|(name, (mode, _))| (name.as_str(), mode.as_str())).collect();
		names.sort_unstable();
		f.debug_struct("Methods").field("entries", &names).finish()
	}
}

impl<B> Methods<B>
where
	B: Send + 'static,
{
	pub fn new() -> Self {
		Self::default()
	}

	/// Declares one method with an explicit dispatch mode.
	///
	/// The return value is converted to JSON at the table boundary.
	///
	/// # Panics
	///
	/// Panics if `name` was already declared.
	#[must_use]
	pub fn method<F, R>(mut self, name: impl Into<String>, mode: DispatchMode, f: F) -> Self
	where
		F: Fn(&mut B, &Call<'_>) -> Result<R, BeanError> + Send + 'static,
		R: Serialize,
	{
		let name = name.into();
		assert!(!self.entries.contains_key(&name), "method '{name}' declared twice");
		let callable: MethodFn<B> = Box::new(move |bean, call| Ok(serde_json::to_value(f(bean, call)?)?));
		self.entries.insert(name, (mode, callable));
		self
	}

	/// Declares a [`DispatchMode::Blocking`] method.
	#[must_use]
	pub fn blocking<F, R>(self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(&mut B, &Call<'_>) -> Result<R, BeanError> + Send + 'static,
		R: Serialize,
	{
		self.method(name, DispatchMode::Blocking, f)
	}

	/// Declares a [`DispatchMode::Exclusive`] method.
	#[must_use]
	pub fn exclusive<F, R>(self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(&mut B, &Call<'_>) -> Result<R, BeanError> + Send + 'static,
		R: Serialize,
	{
		self.method(name, DispatchMode::Exclusive, f)
	}

	/// Declares a [`DispatchMode::Async`] method.
	#[must_use]
	pub fn asynchronous<F, R>(self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(&mut B, &Call<'_>) -> Result<R, BeanError> + Send + 'static,
		R: Serialize,
	{
		self.method(name, DispatchMode::Async, f)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Splits into the caller-side classification and the worker-side callables.
	pub(crate) fn split(self) -> (ClassificationTable, HashMap<String, MethodFn<B>>) {
		let mut modes = HashMap::with_capacity(self.entries.len());
		let mut callables = HashMap::with_capacity(self.entries.len());
		for (name, (mode, callable)) in self.entries {
			modes.insert(name.clone(), mode);
			callables.insert(name, callable);
		}
		(ClassificationTable::from_modes(modes), callables)
	}
}

/// Context handed to a bean method for one invocation.
pub struct Call<'a> {
	id: CallId,
	method: &'a str,
	args: &'a [Value],
	pending: Option<&'a PendingCall>,
}

impl<'a> Call<'a> {
	pub(crate) fn new(id: CallId, method: &'a str, args: &'a [Value], pending: Option<&'a PendingCall>) -> Self {
		Self { id, method, args, pending }
	}

	pub fn id(&self) -> CallId {
		self.id
	}

	pub fn method(&self) -> &str {
		self.method
	}

	pub fn args(&self) -> &[Value] {
		self.args
	}

	/// Deserializes argument `index`.
	pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, BeanError> {
		let Some(value) = self.args.get(index) else {
			return Err(BeanError::new(format!("missing argument {index} for '{}'", self.method)));
		};
		T::deserialize(value).map_err(|err| BeanError::new(format!("argument {index} for '{}': {err}", self.method)))
	}

	/// Deserializes argument `index`, falling back to `default` when absent.
	pub fn arg_or<T: DeserializeOwned>(&self, index: usize, default: T) -> Result<T, BeanError> {
		if index < self.args.len() { self.arg(index) } else { Ok(default) }
	}

	/// Reports progress to the handle's listeners. No-op for blocking calls.
	pub fn progress(&self, value: Value) {
		if let Some(pending) = self.pending {
			pending.notify_progress(&value);
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[derive(Default)]
	struct Counter {
		total: i64,
	}

	fn counter_methods() -> Methods<Counter> {
		Methods::new()
			.exclusive("add", |c: &mut Counter, call| {
				c.total += call.arg::<i64>(0)?;
				Ok(c.total)
			})
			.blocking("total", |c: &mut Counter, _| Ok(c.total))
			.asynchronous("reset", |c: &mut Counter, _| {
				c.total = 0;
				Ok(())
			})
	}

	#[test]
	fn split_builds_classification_and_callables() {
		let (table, callables) = counter_methods().split();
		assert_eq!(table.classify("add"), Ok(DispatchMode::Exclusive));
		assert_eq!(table.classify("total"), Ok(DispatchMode::Blocking));
		assert_eq!(table.classify("reset"), Ok(DispatchMode::Async));
		assert_eq!(callables.len(), 3);

		let mut counter = Counter::default();
		let args = [json!(5)];
		let call = Call::new(CallId(1), "add", &args, None);
		assert_eq!(callables["add"](&mut counter, &call), Ok(json!(5)));
		let reset = Call::new(CallId(2), "reset", &[], None);
		assert_eq!(callables["reset"](&mut counter, &reset), Ok(Value::Null));
		assert_eq!(counter.total, 0);
	}

	#[test]
	#[should_panic(expected = "declared twice")]
	fn duplicate_declaration_panics() {
		let _ = counter_methods().blocking("add", |_: &mut Counter, _| Ok(()));
	}

	#[test]
	fn typed_arguments_report_position() {
		let args = [json!("not a number")];
		let call = Call::new(CallId(7), "add", &args, None);
		let err = call.arg::<i64>(0).unwrap_err();
		assert!(err.message().starts_with("argument 0 for 'add'"), "{}", err.message());

		let missing = call.arg::<String>(3).unwrap_err();
		assert_eq!(missing.message(), "missing argument 3 for 'add'");
		assert_eq!(call.arg_or(1, 9i64), Ok(9));
	}
}
