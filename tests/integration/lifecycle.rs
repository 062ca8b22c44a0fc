//! Executor lifecycle: run, run_async, shutdown, registry

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use frameloop::{Executor, ExecutorError, OperationStatus};

use crate::common::{started_executor, stop};

#[test]
fn test_run_async_twice_is_rejected() {
    let executor = started_executor();
    assert!(executor.is_running());
    assert!(matches!(executor.run_async(), Err(ExecutorError::AlreadyRunning)));
    assert_eq!(executor.run(), Err(ExecutorError::AlreadyRunning));
    stop(&executor);
}

#[test]
fn test_run_on_dedicated_thread() {
    let executor = Executor::new();
    let runner = executor.clone();
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        tx.send(thread::current().id()).unwrap();
        runner.run()
    });
    let runner_id = rx.recv().unwrap();
    while executor.thread_id() != runner_id {
        thread::yield_now();
    }

    let seen = executor.invoke(|| Ok(thread::current().id())).unwrap();
    assert_eq!(seen, runner_id);
    assert_eq!(executor.thread_id(), runner_id);

    executor.shutdown();
    assert_eq!(handle.join().unwrap(), Ok(()));
    assert!(executor.is_shutdown_complete());
}

#[test]
fn test_startup_failure_surfaces_through_operation() {
    let executor = Executor::new();
    executor.disable().unwrap();

    let startup = executor.run_async().unwrap();
    let error = startup.result().unwrap_err();
    assert_eq!(
        error.downcast_ref::<ExecutorError>(),
        Some(&ExecutorError::ProcessingDisabled)
    );

    // Ownership falls back to the original thread.
    assert!(executor.is_owner_thread());
    assert!(!executor.is_running());
    executor.join().unwrap();
}

#[test]
fn test_shutdown_cancels_queued_operations() {
    let executor = started_executor();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let blocker = executor
        .invoke_async(move || {
            started_tx.send(()).ok();
            release_rx.recv_timeout(Duration::from_secs(5)).ok();
            Ok(())
        })
        .unwrap();
    started_rx.recv().unwrap();
    let queued = executor.invoke_async(|| Ok(())).unwrap();

    executor.shutdown();
    assert!(executor.is_shutdown_started());
    assert!(matches!(executor.invoke_async(|| Ok(())), Err(ExecutorError::Shutdown)));
    release_tx.send(()).unwrap();

    assert!(executor.await_shutdown(Duration::from_secs(5)));
    executor.join().unwrap();
    assert_eq!(blocker.status(), OperationStatus::Completed);
    assert_eq!(queued.status(), OperationStatus::Canceled);
    assert!(executor.stats().snapshot().operations_canceled >= 1);
}

#[test]
fn test_await_shutdown_times_out() {
    let executor = started_executor();
    assert!(!executor.await_shutdown(Duration::from_millis(20)));
    stop(&executor);
}

#[test]
fn test_created_on_executor_thread() {
    let executor = started_executor();
    let owner = executor.thread_id();

    let found = Executor::created_on(owner).unwrap();
    assert_eq!(found, executor);
    assert!(executor.invoke(|| Ok(Executor::current().is_some())).unwrap());

    stop(&executor);
    assert!(Executor::created_on(owner).is_none());
}
