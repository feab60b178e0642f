//! The worker loop.
//!
//! One dedicated OS thread per executor owns the bean and its callables. It
//! sleeps on the mailbox condvar until a command is posted, runs it with the
//! caller's tracing span entered, and publishes the outcome either to the
//! results map (waiting callers) or to the call's continuation chain.
//!
//! Bean errors are ordinary outcomes. A panic inside a bean method is caught
//! and escalated to a worker fault: the bean's state can no longer be trusted,
//! so the in-flight call fails with the fault and the loop exits.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::bean::{Call, MethodFn};
use crate::error::ExecutorError;
use crate::mailbox::{Command, Mailbox, Reply};

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

pub(crate) struct Worker<B> {
	name: Arc<str>,
	bean: B,
	methods: HashMap<String, MethodFn<B>>,
	mailbox: Arc<Mailbox>,
}

impl<B> Worker<B>
where
	B: Send + 'static,
{
	pub(crate) fn new(name: Arc<str>, bean: B, methods: HashMap<String, MethodFn<B>>, mailbox: Arc<Mailbox>) -> Self {
		Self {
			name,
			bean,
			methods,
			mailbox,
		}
	}

	/// Runs until shutdown is requested or a fault stops the worker.
	pub(crate) fn run(mut self) {
		let _stop = StopGuard {
			name: Arc::clone(&self.name),
			mailbox: Arc::clone(&self.mailbox),
		};
		tracing::debug!(executor = %self.name, methods = self.methods.len(), "executor.worker.start");

		while let Some(command) = self.mailbox.next_command() {
			if !self.run_command(command) {
				break;
			}
		}
	}

	/// Executes one command and publishes its outcome. Returns false after a fault.
	fn run_command(&mut self, command: Command) -> bool {
		let Command {
			id,
			method,
			mode,
			args,
			reply,
			span,
			posted_at,
		} = command;
		let _entered = span.enter();

		let pending = match &reply {
			Reply::Chain(pending) => Some(pending.as_ref()),
			Reply::Wait => None,
		};
		let outcome = match self.methods.get(&method) {
			Some(callable) => {
				let call = Call::new(id, &method, &args, pending);
				match catch_unwind(AssertUnwindSafe(|| callable(&mut self.bean, &call))) {
					Ok(result) => result.map_err(ExecutorError::Invocation),
					Err(payload) => Err(ExecutorError::WorkerFault(format!(
						"method '{method}' panicked: {}",
						panic_message(payload.as_ref())
					))),
				}
			}
			None => Err(ExecutorError::WorkerFault(format!("method '{method}' is classified but has no callable"))),
		};

		let healthy = match &outcome {
			Err(ExecutorError::WorkerFault(message)) => {
				tracing::error!(executor = %self.name, call = %id, method = %method, fault = %message, "executor.fault");
				self.mailbox.fault(message.clone());
				false
			}
			_ => true,
		};

		tracing::trace!(
			executor = %self.name,
			call = %id,
			method = %method,
			mode = mode.as_str(),
			ok = outcome.is_ok(),
			latency_us = u64::try_from(posted_at.elapsed().as_micros()).unwrap_or(u64::MAX),
			"executor.complete"
		);

		match reply {
			Reply::Wait => self.mailbox.complete(Some((id, outcome))),
			Reply::Chain(pending) => {
				// Chain replays while the worker is still busy, before the next command.
				pending.settle(outcome);
				self.mailbox.complete(None);
			}
		}
		healthy
	}
}

/// Marks the worker stopped on every exit path, including unwinding.
struct StopGuard {
	name: Arc<str>,
	mailbox: Arc<Mailbox>,
}

impl Drop for StopGuard {
	fn drop(&mut self) {
		if std::thread::panicking() {
			self.mailbox.fault("worker loop panicked outside bean execution".to_string());
		}
		if let Some((pending, err)) = self.mailbox.stop() {
			pending.settle(Err(err));
		}
		tracing::debug!(executor = %self.name, fault = ?self.mailbox.fault_message(), "executor.worker.stop");
	}
}
