//! Single-slot command handoff between callers and the worker thread.
//!
//! All fields live under one mutex and every transition broadcasts on one
//! condition variable. Callers wait for the slot to be free with the worker
//! idle, post exactly one command, and (for waiting modes) block until the
//! outcome for their call id appears in the results map.
//!
//! Every caller entering [`Mailbox::post`] and the shutdown request take an
//! arrival ticket. Callers that arrived before shutdown are still served;
//! later ones fail fast.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde_json::Value;

use crate::bean::CallId;
use crate::classify::DispatchMode;
use crate::error::{ExecutorError, Result};
use crate::handle::{Outcome, PendingCall};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
	/// Waiting for a command.
	Idle,
	/// Executing a command (including replay of its continuation chain).
	Busy,
	/// Shutdown requested and the slot drained; about to exit.
	ShuttingDown,
	/// Worker thread has exited.
	Stopped,
}

impl WorkerState {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Idle => "idle",
			Self::Busy => "busy",
			Self::ShuttingDown => "shutting_down",
			Self::Stopped => "stopped",
		}
	}
}

/// Where the worker delivers a command's outcome.
pub(crate) enum Reply {
	/// Stored in the results map under the call id.
	Wait,
	/// Published to the call's own continuation chain.
	Chain(Arc<PendingCall>),
}

/// One posted command.
pub(crate) struct Command {
	pub(crate) id: CallId,
	pub(crate) method: String,
	pub(crate) mode: DispatchMode,
	pub(crate) args: Vec<Value>,
	pub(crate) reply: Reply,
	pub(crate) span: tracing::Span,
	pub(crate) posted_at: Instant,
}

pub(crate) struct MailboxState {
	worker: WorkerState,
	pending: Option<Command>,
	results: HashMap<CallId, Outcome>,
	next_id: u64,
	next_ticket: u64,
	/// Tickets of callers currently waiting for the slot.
	waiting: BTreeSet<u64>,
	/// Ticket taken by the shutdown request.
	shutdown_ticket: Option<u64>,
	fault: Option<String>,
	posted: u64,
	completed: u64,
}

impl MailboxState {
	fn take_ticket(&mut self) -> u64 {
		self.next_ticket = self.next_ticket.wrapping_add(1);
		self.next_ticket
	}

	fn accepting(&self, ticket: u64) -> Result<()> {
		if let Some(fault) = &self.fault {
			return Err(ExecutorError::WorkerFault(fault.clone()));
		}
		if self.worker == WorkerState::Stopped || self.shutdown_ticket.is_some_and(|cut| ticket > cut) {
			return Err(ExecutorError::WorkerShutdown);
		}
		Ok(())
	}

	/// Shutdown was requested and no caller that arrived before it is still waiting.
	fn shutdown_due(&self) -> bool {
		self.shutdown_ticket
			.is_some_and(|cut| self.waiting.first().is_none_or(|&oldest| oldest > cut))
	}

	fn stopped_error(&self) -> ExecutorError {
		match &self.fault {
			Some(fault) => ExecutorError::WorkerFault(fault.clone()),
			None => ExecutorError::WorkerShutdown,
		}
	}

	fn slot_free(&self) -> bool {
		self.pending.is_none() && self.worker == WorkerState::Idle
	}
}

/// Counters and state observed at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStats {
	pub state: WorkerState,
	pub posted: u64,
	pub completed: u64,
	/// Callers blocked waiting for the slot.
	pub waiting: usize,
}

pub(crate) struct Mailbox {
	state: Mutex<MailboxState>,
	changed: Condvar,
}

impl Mailbox {
	pub(crate) fn new() -> Self {
		Self {
			state: Mutex::new(MailboxState {
				worker: WorkerState::Idle,
				pending: None,
				results: HashMap::new(),
				next_id: 0,
				next_ticket: 0,
				waiting: BTreeSet::new(),
				shutdown_ticket: None,
				fault: None,
				posted: 0,
				completed: 0,
			}),
			changed: Condvar::new(),
		}
	}

	/// Waits for a free slot and posts one command.
	///
	/// `reply` receives the freshly allocated call id and returns the reply
	/// route plus a value handed back to the caller.
	pub(crate) fn post<T>(
		&self, method: &str, mode: DispatchMode, args: Vec<Value>, wait_bound: Option<Duration>, reply: impl FnOnce(CallId) -> (Reply, T),
	) -> Result<(CallId, T)> {
		let mut state = self.state.lock();
		let ticket = state.take_ticket();
		state.waiting.insert(ticket);
		let ready = self.wait_for_slot(&mut state, ticket, wait_bound);
		state.waiting.remove(&ticket);
		if let Err(err) = ready {
			// The worker may be holding shutdown for this caller.
			self.changed.notify_all();
			return Err(err);
		}

		state.next_id = state.next_id.wrapping_add(1);
		let id = CallId(state.next_id);
		state.posted = state.posted.wrapping_add(1);
		let (reply, token) = reply(id);
		state.pending = Some(Command {
			id,
			method: method.to_string(),
			mode,
			args,
			reply,
			span: tracing::Span::current(),
			posted_at: Instant::now(),
		});
		self.changed.notify_all();
		Ok((id, token))
	}

	fn wait_for_slot(&self, state: &mut MutexGuard<'_, MailboxState>, ticket: u64, wait_bound: Option<Duration>) -> Result<()> {
		let started = Instant::now();
		let deadline = wait_bound.map(|bound| started + bound);
		loop {
			state.accepting(ticket)?;
			if state.slot_free() {
				return Ok(());
			}
			match deadline {
				Some(deadline) => {
					if self.changed.wait_until(state, deadline).timed_out() {
						state.accepting(ticket)?;
						if state.slot_free() {
							return Ok(());
						}
						return Err(ExecutorError::MailboxBusyTimeout { waited: started.elapsed() });
					}
				}
				None => self.changed.wait(state),
			}
		}
	}

	/// Blocks until the outcome for `id` is published.
	///
	/// Outcomes stay in the results map until their caller removes them, so the
	/// lock need not be held between posting and waiting.
	pub(crate) fn await_outcome(&self, id: CallId) -> Outcome {
		let mut state = self.state.lock();
		loop {
			if let Some(outcome) = state.results.remove(&id) {
				return outcome;
			}
			if state.worker == WorkerState::Stopped {
				// Every posted command is answered before the worker stops.
				return Err(state.stopped_error());
			}
			self.changed.wait(&mut state);
		}
	}

	/// Worker side: waits for the next command, or `None` once shutdown is due.
	pub(crate) fn next_command(&self) -> Option<Command> {
		let mut state = self.state.lock();
		loop {
			if let Some(command) = state.pending.take() {
				state.worker = WorkerState::Busy;
				return Some(command);
			}
			if state.fault.is_some() || state.shutdown_due() {
				state.worker = WorkerState::ShuttingDown;
				self.changed.notify_all();
				return None;
			}
			self.changed.wait(&mut state);
		}
	}

	/// Worker side: marks the in-flight command finished and wakes waiters.
	pub(crate) fn complete(&self, waited: Option<(CallId, Outcome)>) {
		let mut state = self.state.lock();
		if let Some((id, outcome)) = waited {
			state.results.insert(id, outcome);
		}
		state.completed = state.completed.wrapping_add(1);
		if state.worker == WorkerState::Busy {
			state.worker = WorkerState::Idle;
		}
		self.changed.notify_all();
	}

	/// Records a fatal worker fault. The first fault wins.
	pub(crate) fn fault(&self, message: String) {
		let mut state = self.state.lock();
		if state.fault.is_none() {
			state.fault = Some(message);
		}
		self.changed.notify_all();
	}

	/// Worker side: final transition.
	///
	/// A blocking command posted but never run is answered under the same lock
	/// that marks the worker stopped. An orphaned async call is returned so its
	/// chain can replay outside the lock.
	pub(crate) fn stop(&self) -> Option<(Arc<PendingCall>, ExecutorError)> {
		let mut state = self.state.lock();
		state.worker = WorkerState::Stopped;
		let orphan = match state.pending.take() {
			Some(command) => {
				let err = state.stopped_error();
				match command.reply {
					Reply::Wait => {
						state.results.insert(command.id, Err(err));
						None
					}
					Reply::Chain(pending) => Some((pending, err)),
				}
			}
			None => None,
		};
		self.changed.notify_all();
		orphan
	}

	/// Requests shutdown behind every caller already waiting for the slot.
	/// Returns true for the caller that initiated it.
	pub(crate) fn request_shutdown(&self) -> bool {
		let mut state = self.state.lock();
		if state.shutdown_ticket.is_some() {
			return false;
		}
		let ticket = state.take_ticket();
		state.shutdown_ticket = Some(ticket);
		self.changed.notify_all();
		true
	}

	/// Blocks until the worker thread has left its loop.
	pub(crate) fn wait_stopped(&self) {
		let mut state = self.state.lock();
		while state.worker != WorkerState::Stopped {
			self.changed.wait(&mut state);
		}
	}

	pub(crate) fn fault_message(&self) -> Option<String> {
		self.state.lock().fault.clone()
	}

	pub(crate) fn snapshot(&self) -> ExecutorStats {
		let state = self.state.lock();
		ExecutorStats {
			state: state.worker,
			posted: state.posted,
			completed: state.completed,
			waiting: state.waiting.len(),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::thread;

	use serde_json::json;

	use super::*;

	fn post_wait(mailbox: &Mailbox, method: &str) -> Result<CallId> {
		mailbox.post(method, DispatchMode::Blocking, vec![], None, |_| (Reply::Wait, ())).map(|(id, ())| id)
	}

	#[test]
	fn call_ids_follow_post_order() {
		let mailbox = Mailbox::new();
		let first = post_wait(&mailbox, "a").unwrap();
		let command = mailbox.next_command().expect("command posted");
		assert_eq!(command.id, first);
		assert_eq!(mailbox.snapshot().state, WorkerState::Busy);
		mailbox.complete(Some((first, Ok(json!(1)))));

		let second = post_wait(&mailbox, "b").unwrap();
		assert!(second > first);
		assert_eq!(mailbox.snapshot().posted, 2);
	}

	#[test]
	fn busy_slot_times_out_without_disturbing_state() {
		let mailbox = Mailbox::new();
		let id = post_wait(&mailbox, "slow").unwrap();

		let err = mailbox.post("other", DispatchMode::Blocking, vec![], Some(Duration::from_millis(20)), |_| (Reply::Wait, ()));
		assert!(matches!(err, Err(ExecutorError::MailboxBusyTimeout { .. })));

		let snapshot = mailbox.snapshot();
		assert_eq!(snapshot.posted, 1);
		assert_eq!(snapshot.waiting, 0);
		assert_eq!(snapshot.state, WorkerState::Idle);
		let command = mailbox.next_command().expect("first command still pending");
		assert_eq!(command.id, id);
		assert_eq!(command.method, "slow");
	}

	#[test]
	fn waiter_receives_its_own_outcome() {
		let mailbox = Arc::new(Mailbox::new());
		let worker_box = Arc::clone(&mailbox);
		let worker = thread::spawn(move || {
			while let Some(command) = worker_box.next_command() {
				let outcome = Ok(json!(command.method));
				worker_box.complete(Some((command.id, outcome)));
			}
			worker_box.stop();
		});

		let id = post_wait(&mailbox, "echo").unwrap();
		assert_eq!(mailbox.await_outcome(id), Ok(json!("echo")));

		assert!(mailbox.request_shutdown());
		assert!(!mailbox.request_shutdown());
		mailbox.wait_stopped();
		let _ = worker.join();
		assert_eq!(mailbox.snapshot().state, WorkerState::Stopped);
	}

	#[test]
	fn posts_fail_fast_once_shut_down_or_faulted() {
		let mailbox = Mailbox::new();
		mailbox.request_shutdown();
		assert_eq!(post_wait(&mailbox, "a"), Err(ExecutorError::WorkerShutdown));

		let faulted = Mailbox::new();
		faulted.fault("bean panicked".to_string());
		assert_eq!(post_wait(&faulted, "a"), Err(ExecutorError::WorkerFault("bean panicked".to_string())));
	}

	#[test]
	fn orphaned_command_is_answered_on_stop() {
		let mailbox = Mailbox::new();
		let id = post_wait(&mailbox, "late").unwrap();

		assert!(mailbox.stop().is_none(), "blocking orphan is answered in place");

		assert_eq!(mailbox.await_outcome(id), Err(ExecutorError::WorkerShutdown));
		assert!(mailbox.state.lock().results.is_empty());
	}

	#[test]
	fn orphaned_async_call_is_returned_for_settlement() {
		let mailbox = Mailbox::new();
		let worker = thread::current().id();
		let (_, pending) = mailbox
			.post("late", DispatchMode::Async, vec![], None, |id| {
				let pending = Arc::new(PendingCall::new(id, "late", worker));
				(Reply::Chain(Arc::clone(&pending)), pending)
			})
			.unwrap();
		mailbox.fault("worker died".to_string());

		let (orphan, err) = mailbox.stop().expect("async orphan is handed back");
		assert!(Arc::ptr_eq(&orphan, &pending));
		assert_eq!(err, ExecutorError::WorkerFault("worker died".to_string()));
	}

	#[test]
	fn callers_waiting_before_shutdown_are_still_served() {
		let mailbox = Arc::new(Mailbox::new());
		let first = post_wait(&mailbox, "first").unwrap();
		let running = mailbox.next_command().expect("first command");
		assert_eq!(running.id, first);

		let waiter = {
			let mailbox = Arc::clone(&mailbox);
			thread::spawn(move || post_wait(&mailbox, "queued"))
		};
		while mailbox.snapshot().waiting == 0 {
			thread::yield_now();
		}
		assert!(mailbox.request_shutdown());
		assert_eq!(post_wait(&mailbox, "late"), Err(ExecutorError::WorkerShutdown));

		mailbox.complete(Some((first, Ok(Value::Null))));
		let queued = mailbox.next_command().expect("caller that arrived before shutdown is served");
		assert_eq!(queued.method, "queued");
		assert_eq!(waiter.join().unwrap(), Ok(queued.id));
		mailbox.complete(None);

		assert!(mailbox.next_command().is_none());
		assert_eq!(mailbox.snapshot().state, WorkerState::ShuttingDown);
	}
}
