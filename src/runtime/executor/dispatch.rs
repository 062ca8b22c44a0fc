//! Ambient dispatcher bridge.
//!
//! Code that only knows "the dispatcher of the current thread" can reach the
//! executor whose frame is running through [`ExecutorDispatcher::current`],
//! then `post` or `send` opaque callbacks to it.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;

use tracing::warn;

use super::error::{ExecutorResult, OperationCanceled};
use super::operation::{OperationHandle, OperationStatus, Payload};
use super::wait::Timeout;
use super::Executor;

thread_local! {
    static CURRENT: RefCell<Option<ExecutorDispatcher>> = const { RefCell::new(None) };
}

/// Dispatcher that forwards opaque callbacks to an [`Executor`].
#[derive(Clone, PartialEq, Eq)]
pub struct ExecutorDispatcher {
    executor: Executor,
}

impl ExecutorDispatcher {
    /// Create a dispatcher for `executor`.
    #[inline]
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Get the executor.
    #[inline]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// The dispatcher installed on the calling thread, if any.
    pub fn current() -> Option<ExecutorDispatcher> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Queue `callback(argument)` without waiting.
    ///
    /// An error returned by the callback is offered to the executor's error
    /// filters; if none handles it, it is logged.
    pub fn post(
        &self,
        callback: impl FnOnce(Option<Payload>) -> anyhow::Result<Option<Payload>> + Send + 'static,
        argument: Option<Payload>,
    ) -> ExecutorResult<OperationHandle> {
        let handle = self.executor.begin_invoke(Box::new(callback), argument, true)?;

        let observed = handle.clone();
        let registered = handle.on_completed(move |_| report_unhandled(&observed));
        if registered.is_none() {
            report_unhandled(&handle);
        }
        Ok(handle)
    }

    /// Run `callback(argument)` on the owner thread and wait for its result.
    ///
    /// On the owner thread the callback runs inline. Errors come back
    /// unfiltered; a canceled callback yields [`OperationCanceled`].
    pub fn send(
        &self,
        callback: impl FnOnce(Option<Payload>) -> anyhow::Result<Option<Payload>> + Send + 'static,
        argument: Option<Payload>,
    ) -> anyhow::Result<Option<Payload>> {
        if self.executor.is_owner_thread() {
            let _dispatcher = self.executor.switch_context();
            return callback(argument);
        }

        let handle = self.executor.begin_invoke(Box::new(callback), argument, false)?;
        match handle.wait(Timeout::Infinite)? {
            OperationStatus::Canceled => Err(OperationCanceled.into()),
            _ => match handle.take_error() {
                Some(error) => Err(error),
                None => Ok(handle.take_raw_result()),
            },
        }
    }
}

impl fmt::Debug for ExecutorDispatcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ExecutorDispatcher")
            .field("executor", &self.executor)
            .finish()
    }
}

fn report_unhandled(handle: &OperationHandle) {
    if let Some(error) = handle.take_error() {
        warn!("unhandled error in posted callback {}: {:#}", handle.id(), error);
    }
}

/// Restores the previously installed dispatcher when dropped.
#[must_use = "the dispatcher is uninstalled as soon as the guard drops"]
pub struct ContextGuard {
    previous: Option<ExecutorDispatcher>,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

impl fmt::Debug for ContextGuard {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ContextGuard")
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}

/// Install `dispatcher` on the calling thread.
pub(crate) fn install(dispatcher: ExecutorDispatcher) -> ContextGuard {
    let previous = CURRENT.with(|current| current.borrow_mut().replace(dispatcher));
    ContextGuard {
        previous,
        _thread_bound: PhantomData,
    }
}
