//! Thread-affine cooperative executor
//!
//! An [`Executor`] binds one owner thread to a FIFO queue of operations.
//! Any thread may submit work with [`Executor::invoke`] (blocking) or
//! [`Executor::invoke_async`] (returns an awaitable [`Operation`]); only the
//! owner thread dequeues and runs it, from inside a pump loop entered with
//! [`Executor::push_frame`].
//!
//! Pump loops nest. When the owner thread waits on one of its own pending
//! operations it does not block: it pushes a nested frame that keeps
//! draining the queue until the awaited operation finishes.
//!
//! ```text
//! producer ──invoke_async──► queue ──► push_frame ──► OperationCore::invoke
//!                                        ▲    │
//!                                        └────┘ nested wait frames
//! ```

pub mod completion;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod frame;
pub mod operation;
mod registry;
pub mod stats;
pub mod wait;

pub use completion::{CompletionSource, OperationFuture, Outcome};
pub use context::{AmbientContext, ContextScope};
pub use dispatch::{ContextGuard, ExecutorDispatcher};
pub use error::{ExecutorError, ExecutorResult, OperationCanceled, OperationPanicked, SharedError};
pub use filter::{ErrorFilter, InvokeFilter};
pub use frame::{ExecutorFrame, Frame};
pub use operation::{
    ObserverId, ObserverKind, OpaqueCallback, Operation, OperationHandle, OperationId, OperationStatus, Payload,
};
pub use stats::{ExecutorStats, StatsSnapshot};
pub use wait::{OneShotTimer, Timeout};

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::util::config::ExecutorConfig;
use operation::{Callable, OperationCore};

/// Mutable executor state, guarded by a single lock.
#[derive(Debug)]
struct ExecutorState {
    /// Owner thread; `None` only while a `run_async` hand-off is in flight.
    owner: Option<ThreadId>,
    /// Owner to fall back to if a hand-off fails.
    previous_owner: Option<ThreadId>,
    queue: VecDeque<Arc<OperationCore>>,
    disable_requests: usize,
    frame_depth: usize,
    running: bool,
    starting: bool,
    shutdown_started: bool,
    shutdown_complete: bool,
}

impl ExecutorState {
    fn new(owner: ThreadId) -> Self {
        Self {
            owner: Some(owner),
            previous_owner: None,
            queue: VecDeque::new(),
            disable_requests: 0,
            frame_depth: 0,
            running: false,
            starting: false,
            shutdown_started: false,
            shutdown_complete: false,
        }
    }

    fn verify_owner(
        &self,
        action: &'static str,
    ) -> ExecutorResult<()> {
        if self.owner == Some(thread::current().id()) {
            Ok(())
        } else {
            Err(ExecutorError::WrongThread { action })
        }
    }
}

/// State shared by every handle to one executor.
pub(crate) struct Shared {
    state: Mutex<ExecutorState>,
    /// Signaled when work is queued, processing is re-enabled, or a frame
    /// should re-evaluate its exit predicate.
    work_available: Condvar,
    /// Signaled when an owner is (re)established after a hand-off.
    owner_ready: Condvar,
    /// Signaled once shutdown completes.
    shutdown_done: Condvar,
    config: ExecutorConfig,
    stats: ExecutorStats,
    filter: InvokeFilter,
    run_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    #[inline]
    pub(crate) fn current_owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }
}

/// Handle to a thread-affine executor.
///
/// Cloning is cheap; every clone drives the same queue.
#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    /// Create an executor owned by the calling thread, with default config.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    /// Create an executor owned by the calling thread.
    pub fn with_config(config: ExecutorConfig) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ExecutorState::new(thread::current().id())),
            work_available: Condvar::new(),
            owner_ready: Condvar::new(),
            shutdown_done: Condvar::new(),
            config,
            stats: ExecutorStats::default(),
            filter: InvokeFilter::new(),
            run_thread: Mutex::new(None),
        });
        registry::register(&shared);
        debug!("executor created on {:?}", thread::current().id());
        Self { shared }
    }

    #[inline]
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// The executor whose frame or operation is active on this thread.
    pub fn current() -> Option<Executor> {
        ExecutorDispatcher::current().map(|dispatcher| dispatcher.executor().clone())
    }

    /// Find a live executor owned by `thread`.
    pub fn created_on(thread: ThreadId) -> Option<Executor> {
        registry::created_on(thread)
    }

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    /// Get the statistics.
    #[inline]
    pub fn stats(&self) -> &ExecutorStats {
        &self.shared.stats
    }

    #[inline]
    pub(crate) fn filter(&self) -> &InvokeFilter {
        &self.shared.filter
    }

    /// Register a filter offered the errors of posted callbacks. A filter
    /// returning `true` marks the error handled.
    pub fn add_error_filter(
        &self,
        filter: impl Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    ) {
        self.shared.filter.add(filter);
    }

    /// The owner thread.
    ///
    /// Blocks briefly if a `run_async` hand-off is in flight.
    pub fn thread_id(&self) -> ThreadId {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(owner) = state.owner {
                return owner;
            }
            self.shared.owner_ready.wait(&mut state);
        }
    }

    /// Whether the calling thread owns this executor.
    #[inline]
    pub fn is_owner_thread(&self) -> bool {
        self.shared.current_owner() == Some(thread::current().id())
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_started(&self) -> bool {
        self.shared.state.lock().shutdown_started
    }

    /// Whether shutdown has finished; no further operations will run.
    pub fn is_shutdown_complete(&self) -> bool {
        self.shared.state.lock().shutdown_complete
    }

    /// Whether a top-level `run` loop is active.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Outstanding disable requests.
    pub fn disable_requests(&self) -> usize {
        self.shared.state.lock().disable_requests
    }

    /// Number of queued operations.
    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Number of frames currently pumping.
    pub fn frame_depth(&self) -> usize {
        self.shared.state.lock().frame_depth
    }

    /// Run `f` on the owner thread and return its result.
    ///
    /// On the owner thread `f` runs inline. Elsewhere it is queued and the
    /// caller blocks until it finishes; the callable's own error is returned
    /// unchanged.
    pub fn invoke<T, F>(
        &self,
        f: F,
    ) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        if self.is_shutdown_started() {
            return Err(ExecutorError::Shutdown.into());
        }
        if self.is_owner_thread() {
            let _dispatcher = self.switch_context();
            return f();
        }
        self.invoke_async(f)?.result()
    }

    /// Queue `f` for the owner thread without waiting for it.
    pub fn invoke_async<T, F>(
        &self,
        f: F,
    ) -> ExecutorResult<Operation<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let operation = Operation::typed(&self.shared, f)?;
        self.enqueue(operation.handle().core().clone())?;
        Ok(operation)
    }

    /// Queue an opaque callback. Used by [`ExecutorDispatcher`].
    pub(crate) fn begin_invoke(
        &self,
        callback: OpaqueCallback,
        argument: Option<Payload>,
        filter_errors: bool,
    ) -> ExecutorResult<OperationHandle> {
        let core = OperationCore::new(
            &self.shared,
            Callable::Opaque {
                callback,
                argument,
                filter_errors,
            },
        )?;
        self.enqueue(core.clone())?;
        Ok(OperationHandle::from_core(core))
    }

    fn enqueue(
        &self,
        core: Arc<OperationCore>,
    ) -> ExecutorResult<()> {
        let id = core.id();
        let depth = {
            let mut state = self.shared.state.lock();
            if state.shutdown_started {
                return Err(ExecutorError::Shutdown);
            }
            state.queue.push_back(core);
            state.queue.len()
        };
        self.shared.work_available.notify_all();
        self.shared.stats.record_queued(depth);
        debug!("{} queued (depth {})", id, depth);
        Ok(())
    }

    /// Remove a pending operation from the queue and mark it canceled.
    ///
    /// Returns `false` if the operation is running, already finished, or
    /// belongs to another executor.
    pub fn cancel(
        &self,
        operation: &OperationHandle,
    ) -> bool {
        let removed = {
            let mut state = self.shared.state.lock();
            state
                .queue
                .iter()
                .position(|queued| Arc::ptr_eq(queued, operation.core()))
                .and_then(|index| state.queue.remove(index))
        };

        let Some(core) = removed else {
            return false;
        };
        let canceled = core.mark_canceled();
        if canceled {
            self.shared.stats.record_canceled();
            debug!("{} canceled", core.id());
        }
        self.wake();
        canceled
    }

    /// Suspend operation processing. Owner thread only.
    ///
    /// Requests nest: processing resumes once every `disable` has been
    /// matched by an [`enable`](Executor::enable).
    pub fn disable(&self) -> ExecutorResult<()> {
        let mut state = self.shared.state.lock();
        state.verify_owner("disable processing")?;
        state.disable_requests += 1;
        Ok(())
    }

    /// Withdraw one disable request. Owner thread only; a no-op when none
    /// are outstanding.
    pub fn enable(&self) -> ExecutorResult<()> {
        let resumed = {
            let mut state = self.shared.state.lock();
            state.verify_owner("enable processing")?;
            if state.disable_requests == 0 {
                return Ok(());
            }
            state.disable_requests -= 1;
            state.disable_requests == 0
        };
        if resumed {
            self.shared.work_available.notify_all();
        }
        Ok(())
    }

    /// Create a plain frame to pass to [`push_frame`](Executor::push_frame).
    #[inline]
    pub fn create_frame(&self) -> Arc<ExecutorFrame> {
        Arc::new(ExecutorFrame::new())
    }

    /// Pump the queue until `frame` exits or shutdown starts. Owner thread
    /// only. Frames may be pushed from inside running operations.
    ///
    /// Fails with [`ExecutorError::ProcessingDisabled`] while disable
    /// requests are outstanding: only the owner thread can re-enable, and it
    /// would be stuck inside the frame.
    pub fn push_frame(
        &self,
        frame: &dyn Frame,
    ) -> ExecutorResult<()> {
        let depth = {
            let mut state = self.shared.state.lock();
            state.verify_owner("push frames")?;
            if state.shutdown_complete {
                return Err(ExecutorError::Shutdown);
            }
            if state.disable_requests > 0 {
                return Err(ExecutorError::ProcessingDisabled);
            }
            state.frame_depth += 1;
            state.frame_depth
        };
        self.shared.stats.record_frame_depth(depth);
        debug!("frame pushed (depth {})", depth);

        {
            let _dispatcher = self.switch_context();
            while let Some(core) = self.next_operation(frame) {
                debug!("{} dequeued", core.id());
                core.invoke(self);
            }
        }

        let finish_shutdown = {
            let mut state = self.shared.state.lock();
            state.frame_depth -= 1;
            state.frame_depth == 0 && state.shutdown_started && !state.shutdown_complete
        };
        debug!("frame popped (depth {})", depth - 1);

        if finish_shutdown {
            self.complete_shutdown();
        }
        Ok(())
    }

    /// Block until an operation can run for `frame`, or `None` once the
    /// frame should exit.
    fn next_operation(
        &self,
        frame: &dyn Frame,
    ) -> Option<Arc<OperationCore>> {
        let idle_timeout = self.shared.config.idle_timeout();
        let mut state = self.shared.state.lock();

        loop {
            if state.shutdown_started || !frame.should_continue() {
                return None;
            }
            if state.disable_requests == 0 {
                if let Some(core) = state.queue.pop_front() {
                    return Some(core);
                }
            }

            let now = Instant::now();
            let idle_deadline = now.checked_add(idle_timeout).unwrap_or(now);
            let deadline = match frame.deadline() {
                Some(frame_deadline) => frame_deadline.min(idle_deadline),
                None => idle_deadline,
            };
            self.shared.work_available.wait_until(&mut state, deadline);
        }
    }

    /// Pump on the calling thread until shutdown.
    ///
    /// The caller becomes the owner thread.
    pub fn run(&self) -> ExecutorResult<()> {
        let current = thread::current().id();
        {
            let mut state = self.shared.state.lock();
            if state.shutdown_complete {
                return Err(ExecutorError::Shutdown);
            }
            if state.running {
                return Err(ExecutorError::AlreadyRunning);
            }
            if state.disable_requests > 0 {
                return Err(ExecutorError::ProcessingDisabled);
            }
            state.owner = Some(current);
            state.previous_owner = None;
            state.running = true;
            state.starting = false;
        }
        self.shared.owner_ready.notify_all();
        info!("executor running on {:?}", current);

        let frame = self.create_frame();
        let result = self.push_frame(frame.as_ref());

        self.shared.state.lock().running = false;
        info!("executor stopped running on {:?}", current);
        result
    }

    /// Run the executor on a new thread.
    ///
    /// The returned operation completes once the new owner thread has started
    /// processing; if startup fails, the failure is delivered through it.
    pub fn run_async(&self) -> ExecutorResult<Operation<()>> {
        let startup = Operation::typed(&self.shared, || Ok(()))?;
        let core = startup.handle().core().clone();

        let depth = {
            let mut state = self.shared.state.lock();
            if state.shutdown_started {
                return Err(ExecutorError::Shutdown);
            }
            if state.running || state.starting {
                return Err(ExecutorError::AlreadyRunning);
            }
            state.queue.push_back(core.clone());
            state.starting = true;
            state.previous_owner = state.owner.take();
            state.queue.len()
        };
        self.shared.stats.record_queued(depth);

        let mut builder = thread::Builder::new().name(self.shared.config.thread_name.clone());
        if let Some(stack_size) = self.shared.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let executor = self.clone();
        let started = core.clone();
        let spawned = builder.spawn(move || {
            if let Err(error) = executor.run() {
                warn!("executor failed to start: {}", error);
                executor.abort_start(&started);
                started.fault(error.into());
            }
        });

        match spawned {
            Ok(handle) => {
                *self.shared.run_thread.lock() = Some(handle);
                Ok(startup)
            }
            Err(error) => {
                self.abort_start(&core);
                core.mark_canceled();
                Err(ExecutorError::Spawn(error.to_string()))
            }
        }
    }

    /// Undo a `run_async` hand-off that never reached the pump.
    fn abort_start(
        &self,
        startup: &Arc<OperationCore>,
    ) {
        {
            let mut state = self.shared.state.lock();
            state.queue.retain(|queued| !Arc::ptr_eq(queued, startup));
            state.starting = false;
            if state.owner.is_none() {
                state.owner = state.previous_owner.take();
            }
        }
        self.shared.owner_ready.notify_all();
    }

    /// Begin shutting down.
    ///
    /// Every running frame exits; when the outermost one has unwound (or
    /// right away if none is running) the queue is drained and every
    /// operation still in it is canceled.
    pub fn shutdown(&self) {
        let complete_now = {
            let mut state = self.shared.state.lock();
            if state.shutdown_started {
                return;
            }
            state.shutdown_started = true;
            state.frame_depth == 0 && !state.starting
        };
        info!("executor shutdown started");
        self.shared.work_available.notify_all();

        if complete_now {
            self.complete_shutdown();
        }
    }

    fn complete_shutdown(&self) {
        let drained: Vec<Arc<OperationCore>> = {
            let mut state = self.shared.state.lock();
            if state.shutdown_complete {
                return;
            }
            state.shutdown_complete = true;
            state.queue.drain(..).collect()
        };

        let mut canceled = 0;
        for core in drained {
            if core.mark_canceled() {
                self.shared.stats.record_canceled();
                canceled += 1;
            }
        }

        registry::unregister(&self.shared);
        self.shared.shutdown_done.notify_all();
        self.shared.work_available.notify_all();
        info!("executor shutdown complete ({} queued operations canceled)", canceled);

        if self.shared.config.collect_stats {
            info!("executor stats: {:?}", self.shared.stats.snapshot());
        }
    }

    /// Block until shutdown completes or the timeout elapses. Returns
    /// whether shutdown is complete.
    pub fn await_shutdown(
        &self,
        timeout: impl Into<Timeout>,
    ) -> bool {
        let deadline = timeout.into().deadline_from(Instant::now());
        let mut state = self.shared.state.lock();

        while !state.shutdown_complete {
            match deadline {
                None => self.shared.shutdown_done.wait(&mut state),
                Some(deadline) => {
                    if self.shared.shutdown_done.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        state.shutdown_complete
    }

    /// Join the thread started by [`run_async`](Executor::run_async), if any.
    pub fn join(&self) -> anyhow::Result<()> {
        let handle = self.shared.run_thread.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            *self.shared.run_thread.lock() = Some(handle);
            return Err(ExecutorError::JoinSelf.into());
        }
        handle
            .join()
            .map_err(|payload| OperationPanicked::from_payload(payload.as_ref()).into())
    }

    /// Make every pump loop re-evaluate its frame.
    pub fn wake(&self) {
        // A pump checks its frame under this lock before sleeping; taking it
        // here keeps the notify from landing between that check and the wait.
        let _state = self.shared.state.lock();
        self.shared.work_available.notify_all();
    }

    /// Install this executor's dispatcher as the ambient one for the calling
    /// thread until the guard drops.
    pub fn switch_context(&self) -> ContextGuard {
        dispatch::install(ExecutorDispatcher::new(self.clone()))
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Executor {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Executor {}

impl fmt::Debug for Executor {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Executor")
            .field("owner", &state.owner)
            .field("queued", &state.queue.len())
            .field("frame_depth", &state.frame_depth)
            .field("disable_requests", &state.disable_requests)
            .field("shutdown_started", &state.shutdown_started)
            .field("shutdown_complete", &state.shutdown_complete)
            .finish()
    }
}

#[cfg(test)]
mod tests;
