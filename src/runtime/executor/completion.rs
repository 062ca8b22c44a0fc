//! Single-fire completion bridge between an operation and its awaiters.
//!
//! A [`CompletionSource`] holds exactly one of three outcomes (a value, a
//! cancellation, or an error). The operation drives it; synchronous callers
//! take the outcome through [`Operation::result`](super::Operation::result)
//! and asynchronous callers await an [`OperationFuture`]. Until one of them
//! takes it, a recorded error can be viewed any number of times as a
//! [`SharedError`].

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use super::error::{ExecutorError, ExecutorResult, SharedError};
use super::operation::{resolve_outcome, OperationId, Payload};

/// The three-way outcome of an operation.
pub enum Outcome<T> {
    /// The callable returned a value.
    Result(T),
    /// The operation was canceled.
    Canceled,
    /// The callable returned (or panicked with) an error.
    Error(anyhow::Error),
}

impl<T> fmt::Debug for Outcome<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Outcome::Result(_) => f.write_str("Result(..)"),
            Outcome::Canceled => f.write_str("Canceled"),
            Outcome::Error(error) => write!(f, "Error({})", error),
        }
    }
}

/// An outcome as held by the slot; errors are shared so `wait` can re-raise
/// them without taking them.
enum Held<T> {
    Result(T),
    Canceled,
    Error(Arc<anyhow::Error>),
}

impl<T> Held<T> {
    fn from_outcome(outcome: Outcome<T>) -> Self {
        match outcome {
            Outcome::Result(value) => Held::Result(value),
            Outcome::Canceled => Held::Canceled,
            Outcome::Error(error) => Held::Error(Arc::new(error)),
        }
    }

    fn into_outcome(self) -> Outcome<T> {
        match self {
            Held::Result(value) => Outcome::Result(value),
            Held::Canceled => Outcome::Canceled,
            Held::Error(error) => Outcome::Error(unshare(error)),
        }
    }
}

/// The original error if nobody else still holds a view of it.
fn unshare(error: Arc<anyhow::Error>) -> anyhow::Error {
    Arc::try_unwrap(error).unwrap_or_else(|shared| SharedError::new(shared).into())
}

enum Slot<T> {
    Uninitialized,
    Pending { waker: Option<Waker> },
    Ready(Held<T>),
    Taken,
}

/// Single-assignment outcome slot.
pub struct CompletionSource<T> {
    slot: Mutex<Slot<T>>,
    operation: Mutex<Option<OperationId>>,
}

impl<T> CompletionSource<T> {
    /// Create an uninitialized source.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Uninitialized),
            operation: Mutex::new(None),
        }
    }

    /// Bind the source to the operation it reports for.
    ///
    /// Must be called exactly once, before any other use.
    pub fn initialize(
        &self,
        operation: OperationId,
    ) -> ExecutorResult<()> {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Uninitialized) {
            return Err(ExecutorError::AlreadyInitialized);
        }
        *slot = Slot::Pending { waker: None };
        *self.operation.lock() = Some(operation);
        Ok(())
    }

    /// The operation this source reports for, once initialized.
    pub fn operation(&self) -> Option<OperationId> {
        *self.operation.lock()
    }

    /// Complete with a value.
    pub fn set_result(
        &self,
        value: T,
    ) -> ExecutorResult<()> {
        self.complete(Outcome::Result(value))
    }

    /// Complete as canceled.
    pub fn set_canceled(&self) -> ExecutorResult<()> {
        self.complete(Outcome::Canceled)
    }

    /// Complete with an error.
    pub fn set_error(
        &self,
        error: anyhow::Error,
    ) -> ExecutorResult<()> {
        self.complete(Outcome::Error(error))
    }

    fn complete(
        &self,
        outcome: Outcome<T>,
    ) -> ExecutorResult<()> {
        if let Some(waker) = self.assign(outcome)? {
            waker.wake();
        }
        Ok(())
    }

    /// Store the outcome and hand back the registered waker unwoken.
    ///
    /// Callers holding their own locks wake it after releasing them.
    pub(crate) fn assign(
        &self,
        outcome: Outcome<T>,
    ) -> ExecutorResult<Option<Waker>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Ready(Held::from_outcome(outcome))) {
            Slot::Pending { waker } => Ok(waker),
            Slot::Uninitialized => {
                *slot = Slot::Uninitialized;
                Err(ExecutorError::NotInitialized)
            }
            previous => {
                *slot = previous;
                Err(ExecutorError::AlreadyCompleted)
            }
        }
    }

    /// Whether an outcome has been assigned (taken or not).
    pub fn is_completed(&self) -> ExecutorResult<bool> {
        match &*self.slot.lock() {
            Slot::Uninitialized => Err(ExecutorError::NotInitialized),
            Slot::Pending { .. } => Ok(false),
            Slot::Ready(_) | Slot::Taken => Ok(true),
        }
    }

    /// Take the outcome if one is ready.
    ///
    /// Returns `Ok(None)` while pending and `OutcomeTaken` once somebody else
    /// has already observed it.
    pub fn take_outcome(&self) -> ExecutorResult<Option<Outcome<T>>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(held) => Ok(Some(held.into_outcome())),
            Slot::Taken => Err(ExecutorError::OutcomeTaken),
            Slot::Uninitialized => {
                *slot = Slot::Uninitialized;
                Err(ExecutorError::NotInitialized)
            }
            pending @ Slot::Pending { .. } => {
                *slot = pending;
                Ok(None)
            }
        }
    }

    /// A view of the recorded error, leaving it in place.
    pub fn shared_error(&self) -> ExecutorResult<Option<SharedError>> {
        match &*self.slot.lock() {
            Slot::Uninitialized => Err(ExecutorError::NotInitialized),
            Slot::Ready(Held::Error(error)) => Ok(Some(SharedError::new(error.clone()))),
            _ => Ok(None),
        }
    }

    /// Take the outcome only if it is an error, leaving values and
    /// cancellations in place.
    pub fn take_error(&self) -> ExecutorResult<Option<anyhow::Error>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(Held::Error(error)) => Ok(Some(unshare(error))),
            Slot::Uninitialized => {
                *slot = Slot::Uninitialized;
                Err(ExecutorError::NotInitialized)
            }
            other => {
                *slot = other;
                Ok(None)
            }
        }
    }

    /// Take the outcome only if it is a value, leaving errors and
    /// cancellations in place.
    pub fn take_result(&self) -> ExecutorResult<Option<T>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(Held::Result(value)) => Ok(Some(value)),
            Slot::Uninitialized => {
                *slot = Slot::Uninitialized;
                Err(ExecutorError::NotInitialized)
            }
            other => {
                *slot = other;
                Ok(None)
            }
        }
    }

    /// Poll for the outcome, registering the waker while pending.
    pub fn poll_outcome(
        &self,
        cx: &mut Context<'_>,
    ) -> Poll<ExecutorResult<Outcome<T>>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(held) => Poll::Ready(Ok(held.into_outcome())),
            Slot::Taken => Poll::Ready(Err(ExecutorError::OutcomeTaken)),
            Slot::Uninitialized => {
                *slot = Slot::Uninitialized;
                Poll::Ready(Err(ExecutorError::NotInitialized))
            }
            Slot::Pending { waker } => {
                let waker = match waker {
                    Some(existing) if existing.will_wake(cx.waker()) => existing,
                    _ => cx.waker().clone(),
                };
                *slot = Slot::Pending { waker: Some(waker) };
                Poll::Pending
            }
        }
    }
}

impl<T> Default for CompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CompletionSource<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = match &*self.slot.lock() {
            Slot::Uninitialized => "uninitialized",
            Slot::Pending { .. } => "pending",
            Slot::Ready(_) => "ready",
            Slot::Taken => "taken",
        };
        f.debug_struct("CompletionSource")
            .field("operation", &self.operation())
            .field("state", &state)
            .finish()
    }
}

/// Future resolving to the outcome of a typed operation.
///
/// Errors returned by the callable resolve as that same error; a canceled
/// operation resolves as [`OperationCanceled`](super::OperationCanceled).
pub struct OperationFuture<T> {
    source: Arc<CompletionSource<Option<Payload>>>,
    _result: PhantomData<fn() -> T>,
}

impl<T> OperationFuture<T> {
    pub(crate) fn new(source: Arc<CompletionSource<Option<Payload>>>) -> Self {
        Self {
            source,
            _result: PhantomData,
        }
    }
}

impl<T: 'static> Future for OperationFuture<T> {
    type Output = anyhow::Result<T>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        match self.source.poll_outcome(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(resolve_outcome(outcome)),
            Poll::Ready(Err(error)) => Poll::Ready(Err(error.into())),
        }
    }
}

impl<T> fmt::Debug for OperationFuture<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("OperationFuture")
            .field("source", &self.source)
            .finish()
    }
}
