//! Timeouts, the foreign-thread wait handle and the one-shot timer used by
//! owner-thread wait frames.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::operation::{ObserverId, ObserverKind, OperationHandle};

/// Stand-in deadline for delays too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How long a wait may last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Only check the status.
    Zero,
    /// Wait at most this long.
    After(Duration),
    /// Wait until the operation finishes.
    Infinite,
}

impl Timeout {
    /// Whether the wait should not block at all.
    #[inline]
    pub fn is_zero(&self) -> bool {
        matches!(self, Timeout::Zero)
    }

    /// The instant the wait gives up, measured from `now`.
    pub fn deadline_from(
        &self,
        now: Instant,
    ) -> Option<Instant> {
        match self {
            Timeout::Zero => Some(now),
            Timeout::After(duration) => now.checked_add(*duration),
            Timeout::Infinite => None,
        }
    }

    /// Build from milliseconds; negative values mean "forever".
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            m if m < 0 => Timeout::Infinite,
            0 => Timeout::Zero,
            m => Timeout::After(Duration::from_millis(m as u64)),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Timeout::Zero
        } else {
            Timeout::After(duration)
        }
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(Timeout::Infinite, Timeout::from)
    }
}

#[derive(Default)]
struct Signal {
    set: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    fn set(&self) {
        *self.set.lock() = true;
        self.condvar.notify_all();
    }
}

/// Blocks a foreign thread until an operation finishes.
pub(crate) struct WaitEvent {
    signal: Arc<Signal>,
    operation: OperationHandle,
    observer: Option<ObserverId>,
}

impl WaitEvent {
    pub(crate) fn new(operation: OperationHandle) -> Self {
        let signal = Arc::new(Signal::default());

        let observer = {
            let signal = signal.clone();
            operation
                .core()
                .observe(ObserverKind::Finished, move |_| signal.set())
        };
        // Finished before we could subscribe.
        if observer.is_none() {
            signal.set();
        }

        Self {
            signal,
            operation,
            observer,
        }
    }

    /// Block until signaled or the timeout elapses. Returns whether the
    /// operation finished.
    pub(crate) fn wait(
        &self,
        timeout: Timeout,
    ) -> bool {
        let deadline = timeout.deadline_from(Instant::now());
        let mut set = self.signal.set.lock();

        while !*set {
            match deadline {
                None => self.signal.condvar.wait(&mut set),
                Some(deadline) => {
                    if self.signal.condvar.wait_until(&mut set, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        *set
    }
}

impl Drop for WaitEvent {
    fn drop(&mut self) {
        if let Some(id) = self.observer.take() {
            self.operation.remove_observer(id);
        }
    }
}

impl fmt::Debug for WaitEvent {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WaitEvent")
            .field("operation", &self.operation.id())
            .field("set", &*self.signal.set.lock())
            .finish()
    }
}

/// A timer that fires its callback once, the first time it is polled at or
/// after its deadline.
///
/// The pump bounds every idle wait by the deadline of the frame it is
/// serving, so polling happens no later than the deadline itself.
pub struct OneShotTimer {
    deadline: Instant,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl OneShotTimer {
    /// Arm a timer that fires `callback` after `delay`.
    pub fn new(
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> Self {
        let now = Instant::now();
        Self {
            deadline: now.checked_add(delay).unwrap_or(now + FAR_FUTURE),
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }

    /// When the timer fires.
    #[inline]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Fire the callback if the deadline has passed. Returns whether the
    /// timer has fired (now or earlier).
    pub fn poll(&self) -> bool {
        if Instant::now() < self.deadline {
            return false;
        }
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    /// Disarm without firing.
    pub fn cancel(&self) {
        self.callback.lock().take();
    }
}

impl fmt::Debug for OneShotTimer {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("OneShotTimer")
            .field("deadline", &self.deadline)
            .field("armed", &self.callback.lock().is_some())
            .finish()
    }
}
