//! Operations queued on an executor.
//!
//! An operation is a callable plus everything needed to run it later on the
//! owner thread: the producer's captured [`AmbientContext`], a status state
//! machine, observers, and the [`CompletionSource`] its outcome lands in.
//!
//! ```text
//! Pending ──► Running ──► Completed
//!    │           └──────► Canceled   (callable returned OperationCanceled)
//!    └──────────────────► Canceled   (removed from the queue)
//! ```

use std::any::Any;
use std::fmt;
use std::future::IntoFuture;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::debug;

use super::completion::{CompletionSource, OperationFuture, Outcome};
use super::context::AmbientContext;
use super::error::{is_cancellation, ExecutorError, ExecutorResult, OperationCanceled, OperationPanicked};
use super::frame::OperationFrame;
use super::wait::{Timeout, WaitEvent};
use super::{Executor, Shared};

/// Type-erased value passed through opaque callbacks.
pub type Payload = Box<dyn Any + Send>;

/// Callback shape used by callers that only know an opaque signature.
pub type OpaqueCallback = Box<dyn FnOnce(Option<Payload>) -> anyhow::Result<Option<Payload>> + Send>;

type TypedCallback = Box<dyn FnOnce() -> anyhow::Result<Payload> + Send>;

/// Observer callback, fired once with the terminal status.
type ObserverCallback = Box<dyn FnOnce(OperationStatus) + Send>;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

impl OperationId {
    fn next() -> Self {
        Self(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Operation({})", self.0)
    }
}

/// Operation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    /// Queued, not yet picked up by the owner thread.
    Pending,
    /// Currently executing on the owner thread.
    Running,
    /// Finished, successfully or with a recorded error.
    Completed,
    /// Removed from the queue before running, or ended with the cancellation
    /// error kind.
    Canceled,
}

impl OperationStatus {
    /// Whether no further transition can happen.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Canceled)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// Which terminal transition an observer listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverKind {
    /// Fired when the operation completes.
    Completed,
    /// Fired when the operation is canceled.
    Canceled,
    /// Fired on either terminal transition.
    Finished,
}

impl ObserverKind {
    fn matches(
        &self,
        status: OperationStatus,
    ) -> bool {
        match self {
            ObserverKind::Completed => status == OperationStatus::Completed,
            ObserverKind::Canceled => status == OperationStatus::Canceled,
            ObserverKind::Finished => status.is_terminal(),
        }
    }
}

/// Handle for removing a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct Observer {
    id: ObserverId,
    kind: ObserverKind,
    callback: ObserverCallback,
}

/// The two calling conventions, dispatched through one invocation path.
pub(crate) enum Callable {
    /// A callable whose result type is known to the submitter.
    Typed(TypedCallback),
    /// A callback plus argument from a caller that manages its own errors.
    Opaque {
        callback: OpaqueCallback,
        argument: Option<Payload>,
        filter_errors: bool,
    },
}

impl Callable {
    pub(crate) fn typed<T, F>(f: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Callable::Typed(Box::new(move || f().map(|value| Box::new(value) as Payload)))
    }

    #[inline]
    pub(crate) fn is_opaque(&self) -> bool {
        matches!(self, Callable::Opaque { .. })
    }

    /// Whether errors may be offered to the executor's invoke filter.
    #[inline]
    pub(crate) fn filters_errors(&self) -> bool {
        matches!(self, Callable::Opaque { filter_errors: true, .. })
    }

    pub(crate) fn call(self) -> anyhow::Result<Option<Payload>> {
        match self {
            Callable::Typed(f) => f().map(Some),
            Callable::Opaque {
                callback, argument, ..
            } => callback(argument),
        }
    }
}

struct CoreState {
    status: OperationStatus,
    observers: SmallVec<[Observer; 2]>,
    next_observer: u64,
}

/// Type-erased operation shared between the queue and its handles.
pub(crate) struct OperationCore {
    id: OperationId,
    opaque: bool,
    executor: Weak<Shared>,
    context: Mutex<Option<AmbientContext>>,
    callable: Mutex<Option<Callable>>,
    state: Mutex<CoreState>,
    source: Arc<CompletionSource<Option<Payload>>>,
}

impl OperationCore {
    pub(crate) fn new(
        executor: &Arc<Shared>,
        callable: Callable,
    ) -> ExecutorResult<Arc<Self>> {
        let id = OperationId::next();
        let source = Arc::new(CompletionSource::new());
        source.initialize(id)?;

        Ok(Arc::new(Self {
            id,
            opaque: callable.is_opaque(),
            executor: Arc::downgrade(executor),
            context: Mutex::new(Some(AmbientContext::capture())),
            callable: Mutex::new(Some(callable)),
            state: Mutex::new(CoreState {
                status: OperationStatus::Pending,
                observers: SmallVec::new(),
                next_observer: 0,
            }),
            source,
        }))
    }

    #[inline]
    pub(crate) fn id(&self) -> OperationId {
        self.id
    }

    #[inline]
    pub(crate) fn status(&self) -> OperationStatus {
        self.state.lock().status
    }

    pub(crate) fn executor(&self) -> Option<Executor> {
        self.executor.upgrade().map(Executor::from_shared)
    }

    /// Register an observer unless the operation already finished.
    ///
    /// The status check and the registration happen under the same lock as
    /// every status transition, so a `None` here means the transition has
    /// already fired its observers.
    pub(crate) fn observe(
        &self,
        kind: ObserverKind,
        callback: impl FnOnce(OperationStatus) + Send + 'static,
    ) -> Option<ObserverId> {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return None;
        }
        let id = ObserverId(state.next_observer);
        state.next_observer += 1;
        state.observers.push(Observer {
            id,
            kind,
            callback: Box::new(callback),
        });
        Some(id)
    }

    pub(crate) fn remove_observer(
        &self,
        id: ObserverId,
    ) -> bool {
        let mut state = self.state.lock();
        let before = state.observers.len();
        state.observers.retain(|observer| observer.id != id);
        state.observers.len() != before
    }

    /// Run the callable. Owner thread only; called by the pump.
    pub(crate) fn invoke(
        &self,
        executor: &Executor,
    ) {
        {
            let mut state = self.state.lock();
            if state.status != OperationStatus::Pending {
                return;
            }
            state.status = OperationStatus::Running;
        }

        let callable = self.callable.lock().take();
        let context = self.context.lock().take().unwrap_or_default();
        let started = Instant::now();

        let result = match callable {
            Some(callable) => {
                let _context = context.enter();
                let _dispatcher = executor.switch_context();
                panic::catch_unwind(AssertUnwindSafe(|| executor.filter().execute(callable)))
                    .unwrap_or_else(|payload| Err(OperationPanicked::from_payload(payload.as_ref()).into()))
            }
            None => Ok(None),
        };

        let (status, outcome) = match result {
            Ok(value) => (OperationStatus::Completed, Outcome::Result(value)),
            Err(error) if is_cancellation(&error) => (OperationStatus::Canceled, Outcome::Canceled),
            Err(error) => (OperationStatus::Completed, Outcome::Error(error)),
        };

        let stats = executor.stats();
        match &outcome {
            Outcome::Result(_) => stats.record_completed(started.elapsed()),
            Outcome::Canceled => stats.record_canceled(),
            Outcome::Error(_) => stats.record_faulted(started.elapsed()),
        }

        debug!("{} finished as {} in {:?}", self.id, status, started.elapsed());
        self.finish(status, outcome);
    }

    /// Cancel a pending operation that has already left the queue.
    pub(crate) fn mark_canceled(&self) -> bool {
        self.finish_pending(OperationStatus::Canceled, Outcome::Canceled)
    }

    /// Fail a pending operation that has already left the queue.
    pub(crate) fn fault(
        &self,
        error: anyhow::Error,
    ) -> bool {
        self.finish_pending(OperationStatus::Completed, Outcome::Error(error))
    }

    fn finish_pending(
        &self,
        status: OperationStatus,
        outcome: Outcome<Option<Payload>>,
    ) -> bool {
        if self.finish_from(true, status, outcome) {
            self.callable.lock().take();
            return true;
        }
        false
    }

    fn finish(
        &self,
        status: OperationStatus,
        outcome: Outcome<Option<Payload>>,
    ) -> bool {
        self.finish_from(false, status, outcome)
    }

    /// Record the outcome, move to the terminal status and fire observers.
    ///
    /// Observers and the future's waker run after the state lock is
    /// released; either may call back into this operation.
    fn finish_from(
        &self,
        pending_only: bool,
        status: OperationStatus,
        outcome: Outcome<Option<Payload>>,
    ) -> bool {
        let (fired, waker): (SmallVec<[Observer; 2]>, _) = {
            let mut state = self.state.lock();
            if state.status.is_terminal() || (pending_only && state.status != OperationStatus::Pending) {
                return false;
            }

            let waker = self.source.assign(outcome).unwrap_or_else(|error| {
                debug!("{} outcome already assigned: {}", self.id, error);
                None
            });

            state.status = status;
            let observers = std::mem::take(&mut state.observers);
            let fired = observers
                .into_iter()
                .filter(|observer| observer.kind.matches(status))
                .collect();
            (fired, waker)
        };

        for observer in fired {
            (observer.callback)(status);
        }
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

impl fmt::Debug for OperationCore {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("OperationCore")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("opaque", &self.opaque)
            .finish()
    }
}

/// Type-erased, cloneable handle to a queued operation.
#[derive(Clone)]
pub struct OperationHandle {
    core: Arc<OperationCore>,
}

impl OperationHandle {
    pub(crate) fn from_core(core: Arc<OperationCore>) -> Self {
        Self { core }
    }

    #[inline]
    pub(crate) fn core(&self) -> &Arc<OperationCore> {
        &self.core
    }

    /// Get the operation ID.
    #[inline]
    pub fn id(&self) -> OperationId {
        self.core.id
    }

    /// Get the current status.
    #[inline]
    pub fn status(&self) -> OperationStatus {
        self.core.status()
    }

    /// Whether the operation came from an opaque (dispatcher) caller.
    #[inline]
    pub fn is_opaque(&self) -> bool {
        self.core.opaque
    }

    /// The executor powering the operation, if it is still alive.
    pub fn executor(&self) -> Option<Executor> {
        self.core.executor()
    }

    /// Cancel the operation if it is still pending.
    ///
    /// Returns whether the operation was removed from the queue. Running and
    /// finished operations are left untouched.
    pub fn cancel(&self) -> bool {
        match self.core.executor() {
            Some(executor) => executor.cancel(self),
            None => false,
        }
    }

    /// Wait for the operation to finish.
    ///
    /// Foreign threads block on a wait handle. The owner thread never blocks:
    /// it pushes a nested frame that keeps pumping the queue until the
    /// operation finishes or the timeout elapses. Waiting on the owner thread
    /// for the operation that is currently running there fails with
    /// [`ExecutorError::SameThreadWait`].
    ///
    /// Once the operation is finished, an error recorded by a typed callable
    /// is returned here as a [`SharedError`](super::SharedError) on every
    /// call; the error itself stays in place for [`Operation::result`] or an
    /// awaiting future.
    ///
    /// On the owner thread, fails with [`ExecutorError::ProcessingDisabled`]
    /// instead of waiting while processing is disabled.
    pub fn wait(
        &self,
        timeout: impl Into<Timeout>,
    ) -> anyhow::Result<OperationStatus> {
        let status = self.settle(timeout.into())?;
        if status.is_terminal() && !self.core.opaque {
            if let Some(error) = self.core.source.shared_error()? {
                return Err(error.into());
            }
        }
        Ok(status)
    }

    /// Wait without re-raising the recorded error.
    fn settle(
        &self,
        timeout: Timeout,
    ) -> anyhow::Result<OperationStatus> {
        if !self.status().is_terminal() && !timeout.is_zero() {
            let executor = self.core.executor().ok_or(ExecutorError::Shutdown)?;

            if executor.is_owner_thread() {
                if self.status() == OperationStatus::Running {
                    return Err(ExecutorError::SameThreadWait.into());
                }
                let frame = OperationFrame::new(executor.create_frame(), self.clone(), timeout);
                executor.push_frame(&frame)?;
            } else {
                WaitEvent::new(self.clone()).wait(timeout);
            }
        }
        Ok(self.status())
    }

    /// Take the stored value without waiting or re-raising errors.
    ///
    /// Meant for opaque callers; an error or cancellation stays in place and
    /// yields `None`.
    pub fn take_raw_result(&self) -> Option<Payload> {
        self.core.source.take_result().ok().flatten().flatten()
    }

    /// Take the stored error, if the operation ended with one.
    pub fn take_error(&self) -> Option<anyhow::Error> {
        self.core.source.take_error().ok().flatten()
    }

    /// Register a callback fired when the operation completes.
    ///
    /// Returns `None` (and drops the callback) if the operation already
    /// finished.
    pub fn on_completed(
        &self,
        callback: impl FnOnce(OperationStatus) + Send + 'static,
    ) -> Option<ObserverId> {
        self.core.observe(ObserverKind::Completed, callback)
    }

    /// Register a callback fired when the operation is canceled.
    pub fn on_canceled(
        &self,
        callback: impl FnOnce(OperationStatus) + Send + 'static,
    ) -> Option<ObserverId> {
        self.core.observe(ObserverKind::Canceled, callback)
    }

    /// Register a callback fired on either terminal transition.
    pub fn on_finished(
        &self,
        callback: impl FnOnce(OperationStatus) + Send + 'static,
    ) -> Option<ObserverId> {
        self.core.observe(ObserverKind::Finished, callback)
    }

    /// Remove a previously registered observer.
    pub fn remove_observer(
        &self,
        id: ObserverId,
    ) -> bool {
        self.core.remove_observer(id)
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

/// A typed operation whose callable returns `T`.
///
/// Await it (it implements [`IntoFuture`]) or call [`Operation::result`] to
/// block for the value.
pub struct Operation<T> {
    handle: OperationHandle,
    _result: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Operation<T> {
    pub(crate) fn typed<F>(
        executor: &Arc<Shared>,
        f: F,
    ) -> ExecutorResult<Self>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let core = OperationCore::new(executor, Callable::typed(f))?;
        Ok(Self {
            handle: OperationHandle::from_core(core),
            _result: PhantomData,
        })
    }

    /// Get the operation ID.
    #[inline]
    pub fn id(&self) -> OperationId {
        self.handle.id()
    }

    /// Get the current status.
    #[inline]
    pub fn status(&self) -> OperationStatus {
        self.handle.status()
    }

    /// An erased handle that can be cloned and shared.
    #[inline]
    pub fn handle(&self) -> OperationHandle {
        self.handle.clone()
    }

    /// See [`OperationHandle::cancel`].
    #[inline]
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// See [`OperationHandle::wait`].
    #[inline]
    pub fn wait(
        &self,
        timeout: impl Into<Timeout>,
    ) -> anyhow::Result<OperationStatus> {
        self.handle.wait(timeout)
    }

    /// Block until the operation finishes and return its value.
    ///
    /// The callable's own error is returned unchanged; a canceled operation
    /// yields [`OperationCanceled`].
    pub fn result(self) -> anyhow::Result<T> {
        let status = self.handle.settle(Timeout::Infinite)?;
        match self.handle.core.source.take_outcome()? {
            Some(outcome) => resolve_outcome(outcome),
            None => Err(ExecutorError::Incomplete(status).into()),
        }
    }

    /// See [`OperationHandle::on_completed`].
    pub fn on_completed(
        &self,
        callback: impl FnOnce(OperationStatus) + Send + 'static,
    ) -> Option<ObserverId> {
        self.handle.on_completed(callback)
    }

    /// See [`OperationHandle::on_canceled`].
    pub fn on_canceled(
        &self,
        callback: impl FnOnce(OperationStatus) + Send + 'static,
    ) -> Option<ObserverId> {
        self.handle.on_canceled(callback)
    }
}

impl<T: 'static> IntoFuture for Operation<T> {
    type Output = anyhow::Result<T>;
    type IntoFuture = OperationFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        OperationFuture::new(self.handle.core.source.clone())
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.handle.id())
            .field("status", &self.handle.status())
            .finish()
    }
}

/// Turn a stored outcome into the typed result handed to callers.
pub(crate) fn resolve_outcome<T: 'static>(outcome: Outcome<Option<Payload>>) -> anyhow::Result<T> {
    match outcome {
        Outcome::Result(Some(value)) => value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| ExecutorError::ResultType.into()),
        Outcome::Result(None) => Err(ExecutorError::ResultType.into()),
        Outcome::Canceled => Err(OperationCanceled.into()),
        Outcome::Error(error) => Err(error),
    }
}
