//! Single-worker executors for stateful beans.
//!
//! An [`Executor`] binds one bean to one dedicated OS thread. Callers invoke
//! methods by name; every call is posted through a single-slot mailbox and
//! runs on the worker, one at a time, in post order. Each method is declared
//! once in a [`Methods`] table with a [`DispatchMode`]:
//!
//! - [`DispatchMode::Blocking`] and [`DispatchMode::Exclusive`]: the caller
//!   waits for the outcome.
//! - [`DispatchMode::Async`]: the caller gets a [`Handle`] as soon as the
//!   command is posted and attaches continuations to it.
//!
//! ```no_run
//! use bean_executor::{Bean, Executor, Methods};
//! use serde_json::json;
//!
//! #[derive(Default)]
//! struct Counter {
//! 	total: i64,
//! }
//!
//! impl Bean for Counter {
//! 	fn methods() -> Methods<Self> {
//! 		Methods::new()
//! 			.exclusive("add", |c: &mut Counter, call| {
//! 				c.total += call.arg::<i64>(0)?;
//! 				Ok(c.total)
//! 			})
//! 			.asynchronous("total", |c: &mut Counter, _| Ok(c.total))
//! 	}
//! }
//!
//! let executor = Executor::create(Counter::default())?;
//! executor.invoke("add", vec![json!(2)])?;
//! let total = executor.invoke_async("total", vec![])?.then(|v| Ok(json!({ "total": v })));
//! assert_eq!(total.wait()?, json!({ "total": 2 }));
//! executor.shutdown();
//! # Ok::<(), bean_executor::ExecutorError>(())
//! ```
//!
//! Bean errors travel back to the caller (or to reject continuations). A panic
//! inside a bean method is a worker fault: the executor stops and every later
//! call fails with [`ExecutorError::WorkerFault`].

mod bean;
mod classify;
mod config;
mod error;
mod executor;
mod handle;
mod mailbox;
mod registry;
mod worker;

pub use bean::{Bean, Call, CallId, Methods};
pub use classify::{ClassificationTable, DispatchMode};
pub use config::ExecutorConfig;
pub use error::{BeanError, ConfigError, ExecutorError, Result};
pub use executor::{Dispatched, Executor, ShutdownReport};
pub use handle::{Continuation, Handle, Outcome};
pub use mailbox::{ExecutorStats, WorkerState};
pub use registry::{ExecutorRecord, ExecutorRegistry};
