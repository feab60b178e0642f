//! Pending async calls and their continuation chains.
//!
//! Each [`Handle`] owns its chain exclusively. The worker publishes the call's
//! outcome exactly once via [`PendingCall::settle`], which replays every link in
//! registration order, each link's output feeding the next. Links appended after
//! settlement replay immediately on the appending thread.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tokio::sync::Notify;

use crate::bean::CallId;
use crate::error::{BeanError, ExecutorError};
use crate::worker::panic_message;

/// Terminal (or current chain) outcome of one async call.
pub type Outcome = Result<Value, ExecutorError>;

type ResolveFn = Box<dyn FnOnce(Value) -> Result<Value, BeanError> + Send>;
type RejectFn = Box<dyn FnOnce(ExecutorError) -> Result<Value, BeanError> + Send>;
type ProgressFn = Arc<dyn Fn(&Value) + Send + Sync>;

/// One link of a continuation chain.
///
/// A link with no resolve callback passes values through; one with no reject
/// callback passes errors through.
#[derive(Default)]
pub struct Continuation {
	resolve: Option<ResolveFn>,
	reject: Option<RejectFn>,
	progress: Option<ProgressFn>,
}

impl Continuation {
	/// Starts a link from its resolve callback.
	pub fn resolve<F>(f: F) -> Self
	where
		F: FnOnce(Value) -> Result<Value, BeanError> + Send + 'static,
	{
		Self {
			resolve: Some(Box::new(f)),
			..Self::default()
		}
	}

	/// Sets the reject callback. Returning `Ok` recovers the chain.
	#[must_use]
	pub fn reject<G>(mut self, g: G) -> Self
	where
		G: FnOnce(ExecutorError) -> Result<Value, BeanError> + Send + 'static,
	{
		self.reject = Some(Box::new(g));
		self
	}

	/// Sets the progress listener.
	#[must_use]
	pub fn progress<P>(mut self, p: P) -> Self
	where
		P: Fn(&Value) + Send + Sync + 'static,
	{
		self.progress = Some(Arc::new(p));
		self
	}

	fn apply(self, outcome: Outcome) -> Outcome {
		match outcome {
			Ok(value) => match self.resolve {
				Some(resolve) => run_link(move || resolve(value)),
				None => Ok(value),
			},
			Err(err) => match self.reject {
				Some(reject) => run_link(move || reject(err)),
				None => Err(err),
			},
		}
	}
}

impl fmt::Debug for Continuation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Continuation")
			.field("resolve", &self.resolve.is_some())
			.field("reject", &self.reject.is_some())
			.field("progress", &self.progress.is_some())
			.finish()
	}
}

fn run_link(f: impl FnOnce() -> Result<Value, BeanError>) -> Outcome {
	match catch_unwind(AssertUnwindSafe(f)) {
		Ok(result) => result.map_err(ExecutorError::Invocation),
		Err(payload) => Err(ExecutorError::Invocation(BeanError::new(format!(
			"continuation panicked: {}",
			panic_message(payload.as_ref())
		)))),
	}
}

struct ChainState {
	/// Current chain outcome; `None` until settled and while a replay runs.
	outcome: Option<Outcome>,
	replaying: bool,
	links: VecDeque<Continuation>,
	listeners: Vec<ProgressFn>,
}

/// Shared state behind a [`Handle`], also referenced by the posted command.
pub(crate) struct PendingCall {
	id: CallId,
	method: String,
	worker: ThreadId,
	state: Mutex<ChainState>,
	settled: Condvar,
	notify: Notify,
}

impl PendingCall {
	pub(crate) fn new(id: CallId, method: impl Into<String>, worker: ThreadId) -> Self {
		Self {
			id,
			method: method.into(),
			worker,
			state: Mutex::new(ChainState {
				outcome: None,
				replaying: false,
				links: VecDeque::new(),
				listeners: Vec::new(),
			}),
			settled: Condvar::new(),
			notify: Notify::new(),
		}
	}

	/// Publishes the call's outcome and replays the chain. Called once by the worker.
	pub(crate) fn settle(&self, outcome: Outcome) {
		{
			let mut state = self.state.lock();
			debug_assert!(state.outcome.is_none() && !state.replaying, "call {} settled twice", self.id);
			state.replaying = true;
			state.listeners.clear();
		}
		self.replay(outcome);
	}

	/// Drains queued links one at a time, never holding the lock across a callback.
	fn replay(&self, mut current: Outcome) {
		loop {
			let link = {
				let mut state = self.state.lock();
				match state.links.pop_front() {
					Some(link) => link,
					None => {
						state.outcome = Some(current);
						state.replaying = false;
						break;
					}
				}
			};
			current = link.apply(current);
		}
		self.settled.notify_all();
		self.notify.notify_waiters();
	}

	pub(crate) fn notify_progress(&self, value: &Value) {
		let listeners = self.state.lock().listeners.clone();
		for listener in listeners {
			if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(value))) {
				tracing::warn!(call = %self.id, method = %self.method, panic = %panic_message(payload.as_ref()), "executor.progress.panic");
			}
		}
	}
}

/// Caller-visible token for a pending async call.
///
/// Clones share the same chain. Registration methods return a clone so calls
/// can be chained fluently.
#[derive(Clone)]
pub struct Handle {
	shared: Arc<PendingCall>,
}

impl Handle {
	pub(crate) fn new(shared: Arc<PendingCall>) -> Self {
		Self { shared }
	}

	pub fn id(&self) -> CallId {
		self.shared.id
	}

	pub fn method(&self) -> &str {
		&self.shared.method
	}

	/// Appends a resolve-only link.
	pub fn then<F>(&self, resolve: F) -> Handle
	where
		F: FnOnce(Value) -> Result<Value, BeanError> + Send + 'static,
	{
		self.chain(Continuation::resolve(resolve))
	}

	/// Appends a link with both resolve and reject callbacks.
	pub fn then_or_else<F, G>(&self, resolve: F, reject: G) -> Handle
	where
		F: FnOnce(Value) -> Result<Value, BeanError> + Send + 'static,
		G: FnOnce(ExecutorError) -> Result<Value, BeanError> + Send + 'static,
	{
		self.chain(Continuation::resolve(resolve).reject(reject))
	}

	/// Appends a reject-only link.
	pub fn catch<G>(&self, reject: G) -> Handle
	where
		G: FnOnce(ExecutorError) -> Result<Value, BeanError> + Send + 'static,
	{
		self.chain(Continuation::default().reject(reject))
	}

	/// Registers a progress listener for the remainder of the call.
	pub fn on_progress<P>(&self, listener: P) -> Handle
	where
		P: Fn(&Value) + Send + Sync + 'static,
	{
		self.chain(Continuation::default().progress(listener))
	}

	/// Appends one link. Replays immediately when the call has already settled.
	pub fn chain(&self, link: Continuation) -> Handle {
		let shared = &self.shared;
		let mut state = shared.state.lock();
		if let Some(listener) = &link.progress
			&& state.outcome.is_none()
			&& !state.replaying
		{
			state.listeners.push(Arc::clone(listener));
		}
		state.links.push_back(link);
		if let Some(current) = state.outcome.take() {
			state.replaying = true;
			drop(state);
			shared.replay(current);
		}
		self.clone()
	}

	/// Returns true once the outcome is published and no replay is running.
	pub fn is_settled(&self) -> bool {
		self.shared.state.lock().outcome.is_some()
	}

	/// Returns the chain's current outcome without blocking.
	pub fn try_outcome(&self) -> Option<Outcome> {
		self.shared.state.lock().outcome.clone()
	}

	/// Blocks until the call settles and returns the chain's outcome.
	pub fn wait(&self) -> Outcome {
		let mut state = self.shared.state.lock();
		loop {
			if let Some(outcome) = &state.outcome {
				return outcome.clone();
			}
			if self.on_worker_thread() {
				return Err(self.reentrant());
			}
			self.shared.settled.wait(&mut state);
		}
	}

	/// Like [`Self::wait`], giving up after `timeout`.
	pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
		let deadline = Instant::now() + timeout;
		let mut state = self.shared.state.lock();
		loop {
			if let Some(outcome) = &state.outcome {
				return Some(outcome.clone());
			}
			if self.on_worker_thread() {
				return Some(Err(self.reentrant()));
			}
			if self.shared.settled.wait_until(&mut state, deadline).timed_out() {
				return state.outcome.clone();
			}
		}
	}

	/// Resolves once the call settles.
	pub async fn settled(&self) -> Outcome {
		loop {
			// Register before checking to avoid a lost wakeup between check and await.
			let notified = self.shared.notify.notified();
			if let Some(outcome) = self.try_outcome() {
				return outcome;
			}
			notified.await;
		}
	}

	fn on_worker_thread(&self) -> bool {
		thread::current().id() == self.shared.worker
	}

	fn reentrant(&self) -> ExecutorError {
		ExecutorError::Reentrant {
			method: self.shared.method.clone(),
		}
	}
}

impl fmt::Debug for Handle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Handle")
			.field("id", &self.shared.id)
			.field("method", &self.shared.method)
			.field("settled", &self.is_settled())
			.finish()
	}
}

#[cfg(test)]
mod tests;
