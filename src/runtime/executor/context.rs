//! Ambient context carried from a producer thread to the owner thread.
//!
//! Every thread has a *current* [`AmbientContext`] (empty by default). When an
//! operation is queued, the producer's current context is captured as an
//! immutable snapshot; when the owner thread runs the operation, that snapshot
//! is entered for the duration of the call and the owner's previous context is
//! restored afterwards.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexMap;

thread_local! {
    static CURRENT: RefCell<AmbientContext> = RefCell::new(AmbientContext::default());
}

/// Immutable key/value snapshot (locale, identity, request ids, ...).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AmbientContext {
    values: Arc<IndexMap<String, String>>,
}

impl AmbientContext {
    /// Create an empty context.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of this context with `key` set to `value`.
    pub fn with(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut values = (*self.values).clone();
        values.insert(key.into(), value.into());
        Self {
            values: Arc::new(values),
        }
    }

    /// Look up a value.
    #[inline]
    pub fn get(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the context has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Snapshot the calling thread's current context.
    pub fn capture() -> Self {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Install this context on the calling thread until the returned scope
    /// is dropped.
    pub fn enter(self) -> ContextScope {
        let previous = CURRENT.with(|current| current.replace(self));
        ContextScope {
            previous: Some(previous),
            _thread_bound: PhantomData,
        }
    }

    /// Run `f` with this context installed.
    pub fn scope<R>(
        self,
        f: impl FnOnce() -> R,
    ) -> R {
        let _scope = self.enter();
        f()
    }
}

impl fmt::Debug for AmbientContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_map().entries(self.values.iter()).finish()
    }
}

/// Restores the previously current context when dropped.
#[must_use = "the context is restored as soon as the scope is dropped"]
pub struct ContextScope {
    previous: Option<AmbientContext>,
    // Restoring must happen on the thread that entered.
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            CURRENT.with(|current| {
                current.replace(previous);
            });
        }
    }
}

impl fmt::Debug for ContextScope {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ContextScope").finish_non_exhaustive()
    }
}
