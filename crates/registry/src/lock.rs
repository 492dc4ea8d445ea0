//! Registry-wide reader/writer lock with explicit per-thread re-entry.
//!
//! # Invariants
//!
//! - A thread holding the read or write lock re-enters `read()` without
//!   touching the underlying lock.
//! - A thread holding the write lock re-enters `write()`.
//! - A thread holding only the read lock never blocks on `write()`; the call
//!   fails with [`RegistryError::LockUpgrade`].
//! - Guards are released in reverse acquisition order. Only the outermost
//!   guard owns the underlying lock.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;

use crate::error::{RegistryError, Result};

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default, Clone, Copy)]
struct Held {
	read: u32,
	write: u32,
}

thread_local! {
	static HELD: RefCell<FxHashMap<u64, Held>> = RefCell::new(FxHashMap::default());
}

/// Mode of a [`LockGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
	Read,
	Write,
}

/// Reentrant reader/writer lock guarding one registry tree.
#[derive(Debug)]
pub struct RegistryLock {
	id: u64,
	raw: RwLock<()>,
}

impl Default for RegistryLock {
	fn default() -> Self {
		Self::new()
	}
}

impl RegistryLock {
	pub fn new() -> Self {
		Self {
			id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
			raw: RwLock::new(()),
		}
	}

	fn held(&self) -> Held {
		HELD.with(|held| held.borrow().get(&self.id).copied().unwrap_or_default())
	}

	fn adjust(&self, mode: LockMode, enter: bool) {
		HELD.with(|held| {
			let mut held = held.borrow_mut();
			let entry = held.entry(self.id).or_default();
			let counter = match mode {
				LockMode::Read => &mut entry.read,
				LockMode::Write => &mut entry.write,
			};
			if enter {
				*counter += 1;
			} else {
				*counter = counter.saturating_sub(1);
			}
			if entry.read == 0 && entry.write == 0 {
				held.remove(&self.id);
			}
		});
	}

	/// True if the current thread holds this lock in any mode.
	pub fn is_held(&self) -> bool {
		let held = self.held();
		held.read > 0 || held.write > 0
	}

	/// True if the current thread holds the write lock.
	pub fn is_write_held(&self) -> bool {
		self.held().write > 0
	}

	/// Acquires the read lock, re-entering if this thread already holds the
	/// lock in either mode.
	pub fn read(&self) -> LockGuard<'_> {
		let inner = if self.is_held() {
			Inner::Reentrant
		} else {
			Inner::Read(self.raw.read())
		};
		self.adjust(LockMode::Read, true);
		LockGuard {
			lock: self,
			mode: LockMode::Read,
			inner,
			_not_send: PhantomData,
		}
	}

	/// Acquires the write lock.
	///
	/// Fails without blocking when this thread holds only the read lock.
	pub fn write(&self) -> Result<LockGuard<'_>> {
		let held = self.held();
		let inner = if held.write > 0 {
			Inner::Reentrant
		} else if held.read > 0 {
			tracing::warn!(lock = self.id, "registry.lock_upgrade_denied");
			return Err(RegistryError::LockUpgrade);
		} else {
			Inner::Write(self.raw.write())
		};
		self.adjust(LockMode::Write, true);
		Ok(LockGuard {
			lock: self,
			mode: LockMode::Write,
			inner,
			_not_send: PhantomData,
		})
	}
}

#[allow(dead_code, reason = "guards are held for their Drop")]
enum Inner<'a> {
	Reentrant,
	Read(RwLockReadGuard<'a, ()>),
	Write(RwLockWriteGuard<'a, ()>),
}

/// RAII guard returned by [`RegistryLock::read`] and [`RegistryLock::write`].
pub struct LockGuard<'a> {
	lock: &'a RegistryLock,
	mode: LockMode,
	inner: Inner<'a>,
	_not_send: PhantomData<*const ()>,
}

impl LockGuard<'_> {
	pub fn mode(&self) -> LockMode {
		self.mode
	}

	/// True if this guard re-entered a lock the thread already held.
	pub fn is_reentrant(&self) -> bool {
		matches!(self.inner, Inner::Reentrant)
	}
}

impl Drop for LockGuard<'_> {
	fn drop(&mut self) {
		self.lock.adjust(self.mode, false);
	}
}
