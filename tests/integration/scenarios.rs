//! End-to-end scenarios: foreign invoke, async errors, cancellation,
//! disable counting and timed waits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use frameloop::{Executor, ExecutorError, OperationCanceled, OperationStatus, Timeout};
use thiserror::Error;

use crate::common::{started_executor, stop};

#[derive(Debug, Error)]
#[error("{0}")]
struct FormatError(String);

#[test]
fn test_foreign_invoke_runs_on_owner() {
    let executor = started_executor();
    let owner = executor.thread_id();
    assert_ne!(owner, thread::current().id());

    let (value, seen) = executor
        .invoke(|| Ok((2 + 2, thread::current().id())))
        .unwrap();
    assert_eq!(value, 4);
    assert_eq!(seen, owner);

    stop(&executor);
}

#[tokio::test]
async fn test_awaited_error_is_reraised() {
    let executor = started_executor();

    let operation = executor
        .invoke_async(|| -> anyhow::Result<()> { Err(FormatError("x".to_string()).into()) })
        .unwrap();
    let error = operation.await.unwrap_err();
    assert_eq!(error.to_string(), "x");
    assert!(error.downcast_ref::<FormatError>().is_some());

    stop(&executor);
}

#[tokio::test]
async fn test_awaited_value() {
    let executor = started_executor();
    let name = executor
        .invoke_async(|| Ok(thread::current().name().map(str::to_string)))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(name.as_deref(), Some("frameloop-test"));
    stop(&executor);
}

#[test]
fn test_cancel_before_pump_runs() {
    // The test thread owns this executor and never pumps it.
    let executor = Executor::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let operation = {
        let calls = calls.clone();
        executor
            .invoke_async(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap()
    };
    assert!(operation.cancel());
    assert_eq!(operation.status(), OperationStatus::Canceled);

    // Pumping afterwards must not resurrect it.
    let frame = executor.create_frame();
    let probe = executor.invoke_async({
        let frame = frame.clone();
        move || {
            frame.exit();
            Ok(())
        }
    });
    executor.push_frame(frame.as_ref()).unwrap();
    assert!(probe.unwrap().result().is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let error = operation.result().unwrap_err();
    assert!(error.downcast_ref::<OperationCanceled>().is_some());
}

#[test]
fn test_disable_counting() {
    let executor = Executor::with_config(frameloop::ExecutorConfig {
        idle_timeout_ms: 5,
        ..Default::default()
    });
    executor.disable().unwrap();
    executor.disable().unwrap();
    executor.enable().unwrap();
    assert_eq!(executor.disable_requests(), 1);

    let operation = executor.invoke_async(|| Ok(())).unwrap();
    let error = operation.wait(Duration::from_millis(30)).unwrap_err();
    assert_eq!(
        error.downcast_ref::<ExecutorError>(),
        Some(&ExecutorError::ProcessingDisabled)
    );
    assert_eq!(operation.status(), OperationStatus::Pending);

    executor.enable().unwrap();
    assert_eq!(executor.disable_requests(), 0);
    assert_eq!(operation.wait(Timeout::Infinite).unwrap(), OperationStatus::Completed);
}

#[test]
fn test_timed_wait_returns_while_running() {
    let executor = started_executor();
    let (started_tx, started_rx) = mpsc::channel();

    let operation = executor
        .invoke_async(move || {
            started_tx.send(()).ok();
            thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap();

    started_rx.recv().unwrap();
    let status = operation.wait(Duration::from_millis(50)).unwrap();
    assert_eq!(status, OperationStatus::Running);

    assert_eq!(operation.wait(Timeout::Infinite).unwrap(), OperationStatus::Completed);
    stop(&executor);
}
