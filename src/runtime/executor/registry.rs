//! Process-wide lookup of executors by owner thread.

use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::{Executor, Shared};

#[derive(Default)]
struct Registry {
    executors: Vec<Weak<Shared>>,
    last: Option<Weak<Shared>>,
}

static EXECUTORS: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::default()));

pub(crate) fn register(shared: &Arc<Shared>) {
    EXECUTORS.lock().executors.push(Arc::downgrade(shared));
}

pub(crate) fn unregister(shared: &Arc<Shared>) {
    let mut registry = EXECUTORS.lock();
    let target = Arc::downgrade(shared);
    registry.executors.retain(|entry| !entry.ptr_eq(&target));
    if registry.last.as_ref().is_some_and(|last| last.ptr_eq(&target)) {
        registry.last = None;
    }
}

/// Find a live executor owned by `thread`, pruning dead entries on the way.
pub(crate) fn created_on(thread: ThreadId) -> Option<Executor> {
    let mut registry = EXECUTORS.lock();

    if let Some(shared) = registry.last.as_ref().and_then(Weak::upgrade) {
        if shared.current_owner() == Some(thread) {
            return Some(Executor::from_shared(shared));
        }
    }

    let mut found = None;
    registry.executors.retain(|entry| match entry.upgrade() {
        Some(shared) => {
            if found.is_none() && shared.current_owner() == Some(thread) {
                found = Some(shared);
            }
            true
        }
        None => false,
    });

    registry.last = found.as_ref().map(Arc::downgrade);
    found.map(Executor::from_shared)
}
