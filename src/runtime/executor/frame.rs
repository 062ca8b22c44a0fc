//! Pump frames.
//!
//! Pushing a frame onto an executor re-enters its pump loop on the owner
//! thread; the loop keeps dequeuing operations until the frame's exit
//! predicate fires (flag cleared, deadline passed, or shutdown started).
//! Nested frames are how the owner thread waits without blocking.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::operation::{ObserverId, ObserverKind, OperationHandle, OperationStatus};
use super::wait::{OneShotTimer, Timeout};

/// A pump-loop continuation.
///
/// The executor evaluates [`should_continue`](Frame::should_continue) and
/// [`deadline`](Frame::deadline) while holding its own lock, so
/// implementations must be cheap and must not call back into the executor.
/// Code that clears a host frame's flag from another thread should call
/// [`Executor::wake`](super::Executor::wake) afterwards.
pub trait Frame: Send + Sync {
    /// Whether the pump should keep going.
    fn should_continue(&self) -> bool;

    /// Set the continue flag.
    fn set_should_continue(
        &self,
        value: bool,
    );

    /// An instant by which the pump must re-evaluate this frame.
    fn deadline(&self) -> Option<Instant> {
        None
    }
}

/// The basic flag frame handed out by [`Executor::create_frame`](super::Executor::create_frame).
#[derive(Debug)]
pub struct ExecutorFrame {
    continue_pumping: AtomicBool,
}

impl ExecutorFrame {
    /// Create a frame that continues until told otherwise.
    #[inline]
    pub fn new() -> Self {
        Self {
            continue_pumping: AtomicBool::new(true),
        }
    }

    /// Clear the continue flag.
    #[inline]
    pub fn exit(&self) {
        self.set_should_continue(false);
    }
}

impl Default for ExecutorFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame for ExecutorFrame {
    #[inline]
    fn should_continue(&self) -> bool {
        self.continue_pumping.load(Ordering::SeqCst)
    }

    #[inline]
    fn set_should_continue(
        &self,
        value: bool,
    ) {
        self.continue_pumping.store(value, Ordering::SeqCst);
    }
}

impl Frame for Arc<ExecutorFrame> {
    #[inline]
    fn should_continue(&self) -> bool {
        self.as_ref().should_continue()
    }

    #[inline]
    fn set_should_continue(
        &self,
        value: bool,
    ) {
        self.as_ref().set_should_continue(value)
    }
}

/// Frame pushed by an owner-thread wait.
///
/// Wraps an inner frame and clears it as soon as the awaited operation
/// finishes or the timer fires.
pub(crate) struct OperationFrame {
    inner: Arc<ExecutorFrame>,
    operation: OperationHandle,
    timer: Option<OneShotTimer>,
    observer: Option<ObserverId>,
}

impl OperationFrame {
    pub(crate) fn new(
        inner: Arc<ExecutorFrame>,
        operation: OperationHandle,
        timeout: Timeout,
    ) -> Self {
        let observer = {
            let inner = inner.clone();
            operation
                .core()
                .observe(ObserverKind::Finished, move |_| inner.exit())
        };

        let timer = match timeout {
            Timeout::After(delay) => {
                let inner = inner.clone();
                Some(OneShotTimer::new(delay, move || inner.exit()))
            }
            Timeout::Zero => {
                inner.exit();
                None
            }
            Timeout::Infinite => None,
        };

        if observer.is_none() || operation.status() != OperationStatus::Pending {
            inner.exit();
        }

        Self {
            inner,
            operation,
            timer,
            observer,
        }
    }
}

impl Frame for OperationFrame {
    fn should_continue(&self) -> bool {
        if let Some(timer) = &self.timer {
            timer.poll();
        }
        self.inner.should_continue()
    }

    fn set_should_continue(
        &self,
        value: bool,
    ) {
        self.inner.set_should_continue(value);
    }

    fn deadline(&self) -> Option<Instant> {
        self.timer.as_ref().map(OneShotTimer::deadline)
    }
}

impl Drop for OperationFrame {
    fn drop(&mut self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
        if let Some(id) = self.observer.take() {
            self.operation.remove_observer(id);
        }
    }
}

impl fmt::Debug for OperationFrame {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("OperationFrame")
            .field("operation", &self.operation.id())
            .field("continue", &self.inner.should_continue())
            .field("timer", &self.timer)
            .finish()
    }
}
