use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use super::*;

/// Thread id that never matches the test thread, standing in for a worker.
fn foreign_thread() -> ThreadId {
	let handle = thread::spawn(|| ());
	let id = handle.thread().id();
	let _ = handle.join();
	id
}

fn pending(method: &str) -> (Arc<PendingCall>, Handle) {
	let shared = Arc::new(PendingCall::new(CallId(1), method, foreign_thread()));
	let handle = Handle::new(Arc::clone(&shared));
	(shared, handle)
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone + Send + Sync + 'static) {
	let log = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&log);
	(log, move |entry: &str| sink.lock().push(entry.to_string()))
}

#[test]
fn resolve_links_compose_in_registration_order() {
	let (shared, handle) = pending("slow");
	let (log, record) = recorder();

	let r1 = record.clone();
	let r2 = record.clone();
	handle
		.then(move |v| {
			r1("first");
			Ok(json!(v.as_i64().unwrap_or_default() + 1))
		})
		.then(move |v| {
			r2("second");
			Ok(json!(v.as_i64().unwrap_or_default() * 2))
		});

	assert!(!handle.is_settled());
	shared.settle(Ok(json!(3)));

	assert_eq!(handle.wait(), Ok(json!(8)));
	assert_eq!(*log.lock(), ["first", "second"]);
}

#[test]
fn errors_reach_reject_only() {
	let (shared, handle) = pending("fails");
	let resolved = Arc::new(AtomicUsize::new(0));
	let rejected = Arc::new(AtomicUsize::new(0));

	let r = Arc::clone(&resolved);
	let j = Arc::clone(&rejected);
	handle.then(move |v| {
		r.fetch_add(1, Ordering::SeqCst);
		Ok(v)
	});
	handle.then_or_else(
		|v| Ok(v),
		move |err| {
			j.fetch_add(1, Ordering::SeqCst);
			assert_eq!(err.as_bean_error().map(BeanError::message), Some("nope"));
			Ok(json!("recovered"))
		},
	);

	shared.settle(Err(BeanError::new("nope").into()));

	assert_eq!(resolved.load(Ordering::SeqCst), 0);
	assert_eq!(rejected.load(Ordering::SeqCst), 1);
	assert_eq!(handle.wait(), Ok(json!("recovered")));
}

#[test]
fn unhandled_error_is_retained_for_sync_read() {
	let (shared, handle) = pending("fails");
	shared.settle(Err(BeanError::new("kept").into()));
	assert_eq!(handle.try_outcome(), Some(Err(ExecutorError::Invocation(BeanError::new("kept")))));
	assert_eq!(handle.wait(), Err(ExecutorError::Invocation(BeanError::new("kept"))));
}

#[test]
fn links_after_settlement_fire_immediately_once_each() {
	let (shared, handle) = pending("slow");
	let (log, record) = recorder();
	let before = record.clone();
	handle.then(move |v| {
		before("before");
		Ok(v)
	});
	shared.settle(Ok(json!("v")));
	assert_eq!(*log.lock(), ["before"]);

	let a = record.clone();
	let b = record.clone();
	handle
		.then(move |v| {
			a("after-1");
			Ok(json!(format!("{}-1", v.as_str().unwrap_or_default())))
		})
		.then(move |v| {
			b("after-2");
			Ok(json!(format!("{}-2", v.as_str().unwrap_or_default())))
		});

	assert_eq!(*log.lock(), ["before", "after-1", "after-2"]);
	assert_eq!(handle.wait(), Ok(json!("v-1-2")));
	// Reading again does not replay anything.
	assert_eq!(handle.wait(), Ok(json!("v-1-2")));
	assert_eq!(log.lock().len(), 3);
}

#[test]
fn failing_resolve_switches_chain_to_reject() {
	let (shared, handle) = pending("slow");
	handle
		.then(|_| Err(BeanError::new("resolve failed")))
		.then(|_| panic!("resolve must be skipped once rejected"))
		.catch(|err| Ok(json!(err.to_string())));
	shared.settle(Ok(Value::Null));
	assert_eq!(handle.wait(), Ok(json!("invocation failed: resolve failed")));
}

#[test]
fn panicking_continuation_rejects_the_chain() {
	let (shared, handle) = pending("slow");
	handle.then(|_| panic!("kaboom"));
	shared.settle(Ok(Value::Null));
	let err = handle.wait().unwrap_err();
	let message = err.as_bean_error().map(BeanError::message).unwrap_or_default().to_string();
	assert!(message.contains("kaboom"), "{message}");
}

#[test]
fn progress_reaches_listeners_until_settled() {
	let (shared, handle) = pending("slow");
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	handle.on_progress(move |v| sink.lock().push(v.clone()));

	shared.notify_progress(&json!(25));
	shared.notify_progress(&json!(75));
	shared.settle(Ok(json!("done")));
	shared.notify_progress(&json!(100));

	assert_eq!(*seen.lock(), [json!(25), json!(75)]);
	assert_eq!(handle.wait(), Ok(json!("done")));
}

#[test]
fn wait_timeout_gives_up_on_unsettled_call() {
	let (_shared, handle) = pending("slow");
	assert_eq!(handle.wait_timeout(Duration::from_millis(20)), None);
}

#[test]
fn wait_on_owning_worker_thread_is_reentrant() {
	let shared = Arc::new(PendingCall::new(CallId(9), "slow", thread::current().id()));
	let handle = Handle::new(shared);
	assert_eq!(
		handle.wait(),
		Err(ExecutorError::Reentrant {
			method: "slow".to_string()
		})
	);
}

#[tokio::test]
async fn settled_future_wakes_on_publication() {
	let (shared, handle) = pending("slow");
	let publisher = thread::spawn(move || {
		thread::sleep(Duration::from_millis(20));
		shared.settle(Ok(json!(42)));
	});

	let outcome = tokio::time::timeout(Duration::from_secs(2), handle.settled())
		.await
		.expect("settled should resolve");
	assert_eq!(outcome, Ok(json!(42)));
	let _ = publisher.join();
}
