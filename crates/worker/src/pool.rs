use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;

use crate::{TaskClass, panic_message};

static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

fn runtime_handle() -> std::io::Result<Handle> {
	if let Ok(handle) = Handle::try_current() {
		return Ok(handle);
	}
	if let Some(runtime) = GLOBAL_RT.get() {
		return Ok(runtime.handle().clone());
	}

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.worker_threads(2)
		.thread_name("amelia-worker-global")
		.build()?;
	// A racing initializer may have won; the loser's runtime is dropped here,
	// outside any async context.
	let _ = GLOBAL_RT.set(runtime);
	GLOBAL_RT
		.get()
		.map(|rt| rt.handle().clone())
		.ok_or_else(|| std::io::Error::other("global worker runtime unavailable"))
}

#[derive(Debug, Default)]
struct Counters {
	pending: Mutex<usize>,
	idle: Condvar,
	completed: AtomicU64,
	failed: AtomicU64,
}

impl Counters {
	fn begin(&self) {
		let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
		*pending += 1;
	}

	fn end(&self, ok: bool) {
		if ok {
			self.completed.fetch_add(1, Ordering::AcqRel);
		} else {
			self.failed.fetch_add(1, Ordering::AcqRel);
		}
		let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
		*pending = pending.saturating_sub(1);
		if *pending == 0 {
			self.idle.notify_all();
		}
	}
}

/// Fire-and-forget pool for blocking callbacks.
///
/// Work runs on the tokio blocking pool of the ambient runtime, or of a shared
/// global runtime when the caller is not inside one. Cloning shares counters.
#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
	counters: Arc<Counters>,
}

impl WorkerPool {
	/// Creates a pool with zeroed counters.
	pub fn new() -> Self {
		Self::default()
	}

	/// Submits one callback. Errors and panics are logged and swallowed.
	pub fn submit<F, E>(&self, class: TaskClass, label: impl Into<String>, f: F)
	where
		F: FnOnce() -> Result<(), E> + Send + 'static,
		E: Display + Send + 'static,
	{
		let label = label.into();
		let counters = self.counters.clone();
		counters.begin();

		let job = move || {
			let ok = match std::panic::catch_unwind(AssertUnwindSafe(f)) {
				Ok(Ok(())) => true,
				Ok(Err(err)) => {
					tracing::warn!(worker_class = class.as_str(), task = %label, error = %err, "worker.task_failed");
					false
				}
				Err(payload) => {
					let msg = panic_message(payload.as_ref()).unwrap_or_else(|| "<opaque panic>".to_string());
					tracing::warn!(worker_class = class.as_str(), task = %label, panic = %msg, "worker.task_panicked");
					false
				}
			};
			counters.end(ok);
		};

		match runtime_handle() {
			Ok(handle) => {
				tracing::trace!(worker_class = class.as_str(), "worker.spawn_blocking");
				drop(handle.spawn_blocking(job));
			}
			Err(err) => {
				tracing::warn!(worker_class = class.as_str(), error = %err, "worker.runtime_unavailable; falling back to thread");
				std::thread::spawn(job);
			}
		}
	}

	/// Number of submitted callbacks that have not finished yet.
	pub fn pending(&self) -> usize {
		*self.counters.pending.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Number of callbacks that finished successfully.
	pub fn completed(&self) -> u64 {
		self.counters.completed.load(Ordering::Acquire)
	}

	/// Number of callbacks that returned an error or panicked.
	pub fn failed(&self) -> u64 {
		self.counters.failed.load(Ordering::Acquire)
	}

	/// Blocks until no callbacks are pending or `timeout` elapses.
	///
	/// Returns `true` when the pool drained in time.
	pub fn wait_idle(&self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let mut pending = self.counters.pending.lock().unwrap_or_else(|e| e.into_inner());
		while *pending > 0 {
			let left = deadline.saturating_duration_since(Instant::now());
			if left.is_zero() {
				return false;
			}
			let (guard, _) = self.counters.idle.wait_timeout(pending, left).unwrap_or_else(|e| e.into_inner());
			pending = guard;
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use std::sync::mpsc;

	use super::*;

	#[test]
	fn submitted_work_runs_off_thread() {
		let pool = WorkerPool::new();
		let (tx, rx) = mpsc::channel();
		let caller = std::thread::current().id();

		pool.submit(TaskClass::Listener, "thread-id", move || {
			tx.send(std::thread::current().id()).map_err(|e| e.to_string())
		});

		let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
		assert_ne!(worker, caller);
		assert!(pool.wait_idle(Duration::from_secs(5)));
		assert_eq!(pool.completed(), 1);
	}

	#[test]
	fn failures_and_panics_are_counted_not_propagated() {
		let pool = WorkerPool::new();
		pool.submit(TaskClass::Listener, "err", || Err::<(), _>("nope"));
		pool.submit(TaskClass::Listener, "panic", || -> Result<(), String> { panic!("boom") });

		assert!(pool.wait_idle(Duration::from_secs(5)));
		assert_eq!(pool.failed(), 2);
		assert_eq!(pool.pending(), 0);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn uses_ambient_runtime() {
		let pool = WorkerPool::new();
		let (tx, rx) = tokio::sync::oneshot::channel();
		pool.submit(TaskClass::Listener, "ambient", move || tx.send(7).map_err(|_| "closed"));
		assert_eq!(rx.await.unwrap(), 7);
	}
}
