//! Executor unit tests
//!
//! Tests here run on the test thread, which owns every executor it creates,
//! so operations are driven by owner-thread waits and explicit frames.


use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::executor::Executor;
use crate::util::config::ExecutorConfig;

/// Executor with a short idle timeout so paused pumps re-check quickly.
pub(crate) fn test_executor() -> Executor {
    Executor::with_config(ExecutorConfig {
        idle_timeout_ms: 5,
        ..ExecutorConfig::default()
    })
}

/// Shared append-only log for ordering assertions.
pub(crate) fn new_log() -> Arc<Mutex<Vec<&'static str>>> {
    Arc::new(Mutex::new(Vec::new()))
}
