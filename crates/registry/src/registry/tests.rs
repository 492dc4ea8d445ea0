use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use super::*;
use crate::error::ErrorKind;

fn int(value: Option<Value>) -> Option<i64> {
	value.and_then(|v| v.downcast_ref::<i64>().copied())
}

#[test]
fn cache_size_scenario() {
	let reg = Registry::new();
	let node = reg.get_or_create("io.amelia.cache.size").unwrap();
	let amelia = reg.get("io.amelia").unwrap();

	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	reg.add_listener(amelia, EventKind::ValueChange, ListenerFlags::SYNCHRONIZED, move |event| {
		let new = event.new_value.as_ref().and_then(|v| v.downcast_ref::<i64>().copied());
		sink.lock().push((event.namespace.clone(), event.local, new));
		Ok(())
	})
	.unwrap();

	assert_eq!(int(reg.set_value(node, 100i64).unwrap()), None);
	assert_eq!(*seen.lock(), vec![("io.amelia.cache.size".to_owned(), false, Some(100))]);
	assert_eq!(int(reg.get_value(node).unwrap()), Some(100));
	assert_eq!(reg.namespace_of(node).unwrap().to_string(), "io.amelia.cache.size");
	assert_eq!(reg.local_name(node).unwrap(), "size");
	assert!(reg.is_dirty(node).unwrap());

	assert_eq!(int(reg.poll_value(node).unwrap()), Some(100));
	assert_eq!(int(reg.get_value(node).unwrap()), None);
	assert!(reg.is_trimmable(node).unwrap());
	assert_eq!(seen.lock().last(), Some(&("io.amelia.cache.size".to_owned(), false, None)));

	reg.trim_children(amelia).unwrap();
	assert!(reg.get("io.amelia.cache.size").is_none());
	assert!(reg.get("io.amelia.cache").is_none());
	assert!(reg.is_disposed(node));
	assert!(reg.get("io.amelia").is_some());
}

#[test]
fn lookup_is_normalized_and_does_not_create() {
	let reg = Registry::new();
	assert!(reg.get("a.b").is_none());
	assert_eq!(reg.len(), 1);
	assert!(reg.is_empty());
	let node = reg.get_or_create("..A..B.").unwrap();
	assert_eq!(reg.get("a.b"), Some(node));
	assert_eq!(reg.get_or_create("a.b").unwrap(), node);
	assert_eq!(reg.len(), 3);
	assert_eq!(reg.get(""), Some(reg.root()));
}

#[test]
fn find_child_validates_and_reports_missing() {
	let reg = Registry::new();
	let a = reg.get_or_create("a").unwrap();
	assert!(matches!(reg.find_child(a, "b-c", true), Err(RegistryError::InvalidName(_))));
	let err = reg.find_child(a, "b.c", false).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);
	let c = reg.find_child(a, "B.C", true).unwrap();
	assert_eq!(reg.find_child(a, "b.c", false).unwrap(), c);
	assert_eq!(reg.parent_of(c).unwrap().and_then(|p| reg.parent_of(p).unwrap()), Some(a));
}

#[test]
fn read_only_blocks_values_and_children() {
	let reg = Registry::new();
	let a = reg.get_or_create("a").unwrap();
	let b = reg.get_or_create("a.b").unwrap();
	reg.set_flags(a, NodeFlags::READ_ONLY).unwrap();

	assert!(reg.has_flag(b, NodeFlags::READ_ONLY).unwrap());
	assert!(!reg.flags_of(b).unwrap().contains(NodeFlags::READ_ONLY));
	assert!(matches!(reg.set_value(b, 1i64), Err(RegistryError::ReadOnly { .. })));
	assert!(matches!(reg.get_or_create("a.c"), Err(RegistryError::ReadOnly { .. })));
	assert!(matches!(reg.destroy(b), Err(RegistryError::ReadOnly { .. })));

	reg.clear_flags(a, NodeFlags::READ_ONLY).unwrap();
	reg.set_value(b, 1i64).unwrap();
}

#[test]
fn no_override_allows_first_write_and_removal_only() {
	let reg = Registry::new();
	let n = reg.get_or_create("a").unwrap();
	reg.set_flags(n, NodeFlags::NO_OVERRIDE).unwrap();
	reg.set_value(n, 1i64).unwrap();
	assert!(matches!(reg.set_value(n, 2i64), Err(RegistryError::NoOverride { .. })));
	assert_eq!(int(reg.poll_value(n).unwrap()), Some(1));
	assert!(!reg.has_value(n).unwrap());
	reg.set_value(n, 3i64).unwrap();
}

#[test]
fn destroyed_handles_report_disposed() {
	let reg = Registry::new();
	let a = reg.get_or_create("a").unwrap();
	let b = reg.get_or_create("a.b").unwrap();
	reg.destroy(a).unwrap();
	assert!(reg.is_disposed(b));
	let err = reg.get_value(b).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Disposed);
	assert!(matches!(reg.destroy(reg.root()), Err(RegistryError::RootImmutable { .. })));
}

#[test]
fn move_to_relocates_and_guards_cycles() {
	let reg = Registry::new();
	let a = reg.get_or_create("a").unwrap();
	let c = reg.get_or_create("a.b.c").unwrap();
	reg.set_value(c, 5i64).unwrap();

	assert!(matches!(reg.move_to(a, "a.b.x", MergePolicy::Merge), Err(RegistryError::MoveIntoSelf { .. })));
	assert!(reg.get("a.b.x").is_none());

	let moved = reg.move_to(a, "z.renamed", MergePolicy::Merge).unwrap();
	assert_eq!(moved, a);
	assert_eq!(reg.namespace_of(c).unwrap().to_string(), "z.renamed.b.c");
	assert!(reg.get("a").is_none());
	assert!(matches!(reg.move_to(reg.root(), "q", MergePolicy::Merge), Err(RegistryError::RootImmutable { .. })));
}

#[test]
fn move_child_merges_into_existing() {
	let reg = Registry::new();
	let src = reg.get_or_create("src.item").unwrap();
	reg.get_or_create("src.item.extra").unwrap();
	let dest = reg.get_or_create("dest").unwrap();
	let existing = reg.get_or_create("dest.item").unwrap();
	reg.set_value(src, 1i64).unwrap();

	let placed = reg.move_child(src, dest, MergePolicy::Merge).unwrap();
	assert_eq!(placed, existing);
	assert!(reg.is_disposed(src));
	assert_eq!(int(reg.get_value(existing).unwrap()), Some(1));
	assert!(reg.get("dest.item.extra").is_some());
}

#[test]
fn copy_child_and_duplicate_keep_the_source() {
	let reg = Registry::new();
	let src = reg.get_or_create("src.item").unwrap();
	reg.set_value(src, 7i64).unwrap();
	let dest = reg.get_or_create("dest").unwrap();

	let copy = reg.copy_child(dest, src, MergePolicy::Fail).unwrap();
	assert_ne!(copy, src);
	assert_eq!(int(reg.get_value(copy).unwrap()), Some(7));
	assert!(matches!(reg.copy_child(dest, src, MergePolicy::Fail), Err(RegistryError::ChildExists { .. })));

	let dup = reg.duplicate(src).unwrap();
	assert_eq!(reg.parent_of(dup).unwrap(), None);
	assert_eq!(int(reg.get_value(dup).unwrap()), Some(7));
	let attached = reg.move_child(dup, reg.get_or_create("other").unwrap(), MergePolicy::Fail).unwrap();
	assert_eq!(reg.namespace_of(attached).unwrap().to_string(), "other.item");
}

#[test]
fn failing_synchronized_listener_surfaces_but_keeps_the_mutation() {
	let reg = Registry::new();
	let n = reg.get_or_create("a").unwrap();
	let later = Arc::new(AtomicUsize::new(0));
	reg.add_listener(n, EventKind::ValueChange, ListenerFlags::SYNCHRONIZED, |_| Err("rejected".into())).unwrap();
	let counter = Arc::clone(&later);
	reg.add_listener(n, EventKind::ValueChange, ListenerFlags::SYNCHRONIZED, move |_| {
		counter.fetch_add(1, Ordering::SeqCst);
		Ok(())
	})
	.unwrap();

	let err = reg.set_value(n, 1i64).unwrap_err();
	assert!(matches!(err, RegistryError::Listener { .. }));
	assert_eq!(err.kind(), ErrorKind::Internal);
	assert_eq!(later.load(Ordering::SeqCst), 0);
	assert_eq!(int(reg.get_value(n).unwrap()), Some(1));
}

#[test]
fn asynchronous_listeners_run_on_the_pool() {
	let reg = Registry::new();
	let n = reg.get_or_create("a").unwrap();
	let hits = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&hits);
	reg.add_listener(n, EventKind::ValueStore, ListenerFlags::empty(), move |_| {
		counter.fetch_add(1, Ordering::SeqCst);
		Ok(())
	})
	.unwrap();
	reg.add_listener(n, EventKind::ValueStore, ListenerFlags::empty(), |_| Err("ignored".into())).unwrap();

	reg.set_value(n, 1i64).unwrap();
	assert!(reg.workers().wait_idle(Duration::from_secs(5)));
	assert_eq!(hits.load(Ordering::SeqCst), 1);
	assert_eq!(reg.workers().failed(), 1);
}

#[test]
fn listeners_may_reenter_the_registry() {
	let reg = Arc::new(Registry::new());
	let n = reg.get_or_create("a").unwrap();
	let mirror = reg.get_or_create("b").unwrap();
	let inner = Arc::clone(&reg);
	reg.add_listener(n, EventKind::ValueChange, ListenerFlags::SYNCHRONIZED, move |event| {
		if let Some(v) = &event.new_value {
			inner.set_value(mirror, v.clone())?;
		}
		inner.get_or_create("b.touched")?;
		Ok(())
	})
	.unwrap();

	reg.set_value(n, 9i64).unwrap();
	assert_eq!(int(reg.get_value(mirror).unwrap()), Some(9));
	assert!(reg.get("b.touched").is_some());
}

#[test]
fn listeners_triggered_under_write_may_write() {
	let reg = Arc::new(Registry::new());
	let n = reg.get_or_create("a").unwrap();
	let inner = Arc::clone(&reg);
	reg.add_listener(n, EventKind::FlagChange, ListenerFlags::SYNCHRONIZED | ListenerFlags::FIRE_ONCE, move |event| {
		inner.clear_flags(event.node, NodeFlags::NO_SAVE)?;
		Ok(())
	})
	.unwrap();

	reg.set_flags(n, NodeFlags::NO_SAVE).unwrap();
	assert!(!reg.flags_of(n).unwrap().contains(NodeFlags::NO_SAVE));
}

#[test]
fn write_operations_refuse_upgrade_from_read() {
	let reg = Registry::new();
	let n = reg.get_or_create("a").unwrap();
	let _read = reg.read();
	assert!(reg.set_value(n, 1i64).is_ok());
	assert!(matches!(reg.set_flags(n, NodeFlags::NO_SAVE), Err(RegistryError::LockUpgrade)));
	assert!(matches!(reg.destroy(n), Err(RegistryError::LockUpgrade)));
}

#[test]
fn write_guard_makes_sequences_atomic() {
	let reg = Registry::new();
	let guard = reg.write().unwrap();
	let n = reg.get_or_create("a").unwrap();
	reg.set_flags(n, NodeFlags::NO_SAVE).unwrap();
	reg.set_value(n, 1i64).unwrap();
	drop(guard);
	assert!(reg.has_value(n).unwrap());
}

#[test]
fn get_or_compute_stores_only_new_values() {
	let reg = Registry::new();
	let n = reg.get_or_create("a").unwrap();
	let changes = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&changes);
	reg.add_listener(n, EventKind::ValueChange, ListenerFlags::SYNCHRONIZED, move |_| {
		counter.fetch_add(1, Ordering::SeqCst);
		Ok(())
	})
	.unwrap();

	let first = reg.get_or_compute(n, |cur| cur.cloned().or_else(|| Some(Value::from(1i64)))).unwrap();
	assert_eq!(int(first), Some(1));
	let same = reg.get_or_compute(n, |cur| cur.cloned()).unwrap();
	assert_eq!(int(same), Some(1));
	assert_eq!(changes.load(Ordering::SeqCst), 1);
}

#[test]
fn get_or_compute_under_a_read_guard() {
	let reg = Registry::new();
	let n = reg.get_or_create("a").unwrap();
	reg.set_value(n, 5i64).unwrap();

	let _snapshot = reg.read();
	assert_eq!(int(reg.get_or_compute(n, |cur| cur.cloned()).unwrap()), Some(5));
	let doubled = reg
		.get_or_compute(n, |cur| cur.and_then(|v| v.downcast_ref::<i64>()).map(|v| Value::from(v * 2)))
		.unwrap();
	assert_eq!(int(doubled), Some(10));
	assert_eq!(int(reg.get_value(n).unwrap()), Some(10));
}

#[test]
fn get_or_compute_from_a_synchronized_listener() {
	let reg = Arc::new(Registry::new());
	let source = reg.get_or_create("app.source").unwrap();
	let derived = reg.get_or_create("app.derived").unwrap();

	let inner = Arc::clone(&reg);
	reg.add_listener(source, EventKind::ValueChange, ListenerFlags::SYNCHRONIZED, move |event| {
		let next = event.new_value.as_ref().and_then(|v| v.downcast_ref::<i64>()).map(|v| v + 1);
		inner.get_or_compute(derived, |_| next.map(Value::from))?;
		Ok(())
	})
	.unwrap();

	reg.set_value(source, 41i64).unwrap();
	assert_eq!(int(reg.get_value(derived).unwrap()), Some(42));
	reg.poll_value(source).unwrap();
	assert_eq!(int(reg.get_value(derived).unwrap()), None);
}

#[test]
fn get_or_compute_recomputes_after_a_concurrent_write() {
	let reg = Registry::new();
	let n = reg.get_or_create("a").unwrap();
	reg.set_value(n, 1i64).unwrap();

	let mut calls = 0;
	let result = reg
		.get_or_compute(n, |cur| {
			calls += 1;
			if calls == 1 {
				reg.set_value(n, 7i64).unwrap();
			}
			cur.and_then(|v| v.downcast_ref::<i64>()).map(|v| Value::from(v * 10))
		})
		.unwrap();
	assert_eq!(calls, 2);
	assert_eq!(int(result), Some(70));
	assert_eq!(int(reg.get_value(n).unwrap()), Some(70));
}

#[test]
fn trim_and_initialize() {
	let reg = Registry::new();
	let kept = reg.get_or_create("keep.me").unwrap();
	reg.set_value(kept, true).unwrap();
	reg.get_or_create("dead.branch").unwrap();

	let order = Arc::new(Mutex::new(Vec::new()));
	for i in 0..3 {
		let order = Arc::clone(&order);
		reg.add_init_hook(move |reg| {
			assert!(reg.get("dead").is_none());
			order.lock().push(i);
			Ok(())
		})
		.unwrap();
	}

	assert!(reg.is_trimmable(reg.get("dead").unwrap()).unwrap());
	reg.initialize().unwrap();
	assert!(reg.is_initialized());
	assert_eq!(*order.lock(), vec![0, 1, 2]);
	assert!(reg.get("keep.me").is_some());

	let again = reg.initialize().unwrap_err();
	assert!(again.is_ignorable());
	assert!(reg.add_init_hook(|_| Ok(())).unwrap_err().is_ignorable());
}

#[test]
fn failing_init_hook_is_reported() {
	let reg = Registry::new();
	reg.add_init_hook(|_| Err("no database".into())).unwrap();
	assert!(matches!(reg.initialize(), Err(RegistryError::InitHook(_))));
}

#[test]
fn clear_dirty_resets_the_subtree() {
	let reg = Registry::new();
	let n = reg.get_or_create("a.b").unwrap();
	reg.set_value(n, 1i64).unwrap();
	let a = reg.get("a").unwrap();
	reg.clear_dirty(a).unwrap();
	assert!(!reg.is_dirty(a).unwrap());
	assert!(!reg.is_dirty(n).unwrap());
}

#[test]
fn concurrent_writers_keep_names_unique() {
	let reg = Arc::new(Registry::new());
	let handles: Vec<_> = (0..8)
		.map(|t| {
			let reg = Arc::clone(&reg);
			std::thread::spawn(move || {
				for i in 0..50 {
					let n = reg.get_or_create(&format!("shared.n{}", i % 10)).unwrap();
					reg.set_value(n, (t * 100 + i) as i64).unwrap();
				}
			})
		})
		.collect();
	for h in handles {
		h.join().unwrap();
	}
	let shared = reg.get("shared").unwrap();
	assert_eq!(reg.children_of(shared).unwrap().len(), 10);
}
