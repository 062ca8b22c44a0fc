//! Shared helpers for integration tests

use frameloop::{Executor, ExecutorConfig};

/// Executor running on its own thread.
pub fn started_executor() -> Executor {
    let executor = Executor::with_config(ExecutorConfig {
        thread_name: "frameloop-test".to_string(),
        idle_timeout_ms: 5,
        ..ExecutorConfig::default()
    });
    executor.run_async().unwrap().result().unwrap();
    executor
}

/// Shut the executor down and join its thread.
pub fn stop(executor: &Executor) {
    executor.shutdown();
    executor.join().unwrap();
    assert!(executor.is_shutdown_complete());
}
