//! Executor errors
//!
//! Structural failures are raised at the misuse site as [`ExecutorError`].
//! Errors produced by queued callables travel as [`anyhow::Error`] and are
//! never wrapped; [`OperationCanceled`] and [`OperationPanicked`] are the two
//! error kinds the executor itself attaches meaning to.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::operation::OperationStatus;

/// Executor result
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Structural executor errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("The executor has been shutdown and cannot execute any further operations")]
    Shutdown,

    #[error("An executor can only {action} on the thread that owns it")]
    WrongThread {
        /// What the caller attempted
        action: &'static str,
    },

    #[error("The executor is already running on a thread")]
    AlreadyRunning,

    #[error("The executor's ability to process operations is currently disabled")]
    ProcessingDisabled,

    #[error("Executor may not wait on an operation executing on the same thread")]
    SameThreadWait,

    #[error("Operation completion source has not been initialized")]
    NotInitialized,

    #[error("Cannot load an operation into an already initialized completion source")]
    AlreadyInitialized,

    #[error("Operation completion source already holds an outcome")]
    AlreadyCompleted,

    #[error("Operation outcome has already been observed")]
    OutcomeTaken,

    #[error("Operation finished waiting without completing ({0})")]
    Incomplete(OperationStatus),

    #[error("Operation result does not have the requested type")]
    ResultType,

    #[error("The executor thread cannot join itself")]
    JoinSelf,

    #[error("Failed to spawn executor thread: {0}")]
    Spawn(String),
}

/// The cancellation error kind.
///
/// Returning this error (directly or as the root of an [`anyhow::Error`])
/// from a queued callable ends the operation as `Canceled`, whether or not a
/// caller ever asked for cancellation.
#[derive(Debug, Error, Clone, Default, PartialEq, Eq)]
#[error("The operation was canceled")]
pub struct OperationCanceled;

/// A queued callable panicked while running on the owner thread.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Operation panicked: {message}")]
pub struct OperationPanicked {
    /// Panic payload rendered as text
    pub message: String,
}

impl OperationPanicked {
    /// Build from a `catch_unwind` payload.
    pub(crate) fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&'static str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self { message }
    }
}

/// A view of an error recorded by a callable.
///
/// `wait` hands one out every time it observes a faulted operation, leaving
/// the error itself in place for `result()` or an awaiting future. The
/// recorded error is this error's source, so it shows up in
/// [`anyhow::Error::chain`].
#[derive(Debug, Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl SharedError {
    pub(crate) fn new(error: Arc<anyhow::Error>) -> Self {
        Self(error)
    }

    /// The recorded error.
    #[inline]
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Downcast the recorded error.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Display for SharedError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let recorded: &(dyn std::error::Error + Send + Sync + 'static) = &**self.0;
        Some(recorded as &(dyn std::error::Error + 'static))
    }
}

/// Whether an error returned by a callable is of the cancellation kind.
pub(crate) fn is_cancellation(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| cause.downcast_ref::<OperationCanceled>().is_some())
}
