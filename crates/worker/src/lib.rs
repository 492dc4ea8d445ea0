//! Shared worker pool primitives.
//!
//! Registry listeners that are not marked synchronized run here, outside the
//! lock scope of the call that triggered them. Failures are logged and never
//! correlated back to the trigger.

mod class;
mod pool;


use std::any::Any;

pub use class::TaskClass;
pub use pool::WorkerPool;

/// Extracts a readable message from a panic payload.
///
/// Returns `None` when the payload is neither a `&str` nor a `String`.
pub fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		return Some((*s).to_string());
	}
	payload.downcast_ref::<String>().cloned()
}
