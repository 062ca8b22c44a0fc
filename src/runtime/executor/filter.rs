//! Error filtering for opaque callbacks.
//!
//! Fire-and-forget callers have nobody to hand an error back to, so errors
//! from their callbacks are first offered to the executor's filters. Any
//! filter returning `true` marks the error handled.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::operation::{Callable, Payload};

/// Filter callback: returns whether the error was handled.
pub type ErrorFilter = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Executes callables, optionally offering their errors to filters.
#[derive(Default)]
pub struct InvokeFilter {
    filters: RwLock<Vec<ErrorFilter>>,
}

impl InvokeFilter {
    /// Create a filter set with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter. Filters run in registration order.
    pub fn add(
        &self,
        filter: impl Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    ) {
        self.filters.write().push(Arc::new(filter));
    }

    /// Remove every filter.
    pub fn clear(&self) {
        self.filters.write().clear();
    }

    /// Number of registered filters.
    pub fn len(&self) -> usize {
        self.filters.read().len()
    }

    /// Whether no filters are registered.
    pub fn is_empty(&self) -> bool {
        self.filters.read().is_empty()
    }

    /// Offer an error to every filter; true if any of them handled it.
    pub fn filter(
        &self,
        error: &anyhow::Error,
    ) -> bool {
        let filters: Vec<ErrorFilter> = self.filters.read().clone();
        let mut handled = false;
        for filter in filters {
            handled |= filter(error);
        }
        handled
    }

    /// Run a callable. Errors of callables that opted into filtering are
    /// swallowed when a filter handles them.
    pub(crate) fn execute(
        &self,
        callable: Callable,
    ) -> anyhow::Result<Option<Payload>> {
        let filter_errors = callable.filters_errors();
        match callable.call() {
            Err(error) if filter_errors && self.filter(&error) => Ok(None),
            result => result,
        }
    }
}

impl fmt::Debug for InvokeFilter {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("InvokeFilter")
            .field("filters", &self.len())
            .finish()
    }
}
