//! Property tests over a shared executor thread

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use frameloop::{Executor, ExecutorError, OperationHandle, OperationStatus, Timeout};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

use crate::common::{started_executor, stop};

static SHARED: Lazy<Executor> = Lazy::new(started_executor);

proptest! {
    #[test]
    fn invoke_returns_value_computed_on_owner(a in any::<i64>(), b in any::<i64>()) {
        let executor = &*SHARED;
        let owner = executor.thread_id();

        let (sum, seen) = executor
            .invoke(move || Ok((a.wrapping_add(b), thread::current().id())))
            .unwrap();
        prop_assert_eq!(sum, a.wrapping_add(b));
        prop_assert_eq!(seen, owner);
    }

    #[test]
    fn invoke_preserves_error_message(message in "[a-z]{1,16}") {
        let expected = message.clone();
        let error = SHARED
            .invoke(move || -> anyhow::Result<()> { Err(anyhow::anyhow!(message)) })
            .unwrap_err();
        prop_assert_eq!(error.to_string(), expected);
    }
}

#[test]
fn test_cancel_running_operation_is_refused() {
    let executor = started_executor();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let operation = executor
        .invoke_async(move || {
            started_tx.send(()).ok();
            release_rx.recv_timeout(Duration::from_secs(5)).ok();
            Ok(9)
        })
        .unwrap();

    started_rx.recv().unwrap();
    assert_eq!(operation.status(), OperationStatus::Running);
    assert!(!operation.cancel());
    release_tx.send(()).unwrap();

    assert_eq!(operation.wait(Timeout::Infinite).unwrap(), OperationStatus::Completed);
    assert_eq!(operation.result().unwrap(), 9);
    stop(&executor);
}

#[test]
fn test_repeated_waits_are_idempotent() {
    let executor = started_executor();
    let operation = executor.invoke_async(|| Ok("steady")).unwrap();

    let first = operation.wait(Timeout::Infinite).unwrap();
    for _ in 0..5 {
        assert_eq!(operation.wait(Timeout::Infinite).unwrap(), first);
        assert_eq!(operation.wait(Timeout::Zero).unwrap(), first);
    }
    assert_eq!(operation.result().unwrap(), "steady");

    let faulted = executor
        .invoke_async(|| -> anyhow::Result<()> { Err(anyhow::anyhow!("x")) })
        .unwrap();
    for _ in 0..5 {
        let error = faulted.wait(Timeout::Infinite).unwrap_err();
        assert_eq!(error.to_string(), "x");
        assert_eq!(faulted.status(), OperationStatus::Completed);
    }
    assert_eq!(faulted.result().unwrap_err().to_string(), "x");
    stop(&executor);
}

#[test]
fn test_same_thread_wait_from_executor_thread() {
    let executor = started_executor();
    let slot: Arc<Mutex<Option<OperationHandle>>> = Arc::new(Mutex::new(None));
    let (ready_tx, ready_rx) = mpsc::channel::<()>();

    let operation = {
        let slot = slot.clone();
        executor
            .invoke_async(move || {
                ready_rx.recv_timeout(Duration::from_secs(5)).ok();
                let handle = slot.lock().clone().ok_or_else(|| anyhow::anyhow!("no handle"))?;
                match handle.wait(Timeout::Infinite) {
                    Err(error) => Ok(error.downcast_ref::<ExecutorError>() == Some(&ExecutorError::SameThreadWait)),
                    Ok(_) => Ok(false),
                }
            })
            .unwrap()
    };
    *slot.lock() = Some(operation.handle());
    ready_tx.send(()).unwrap();

    assert!(operation.result().unwrap());
    stop(&executor);
}

#[test]
fn test_fifo_per_producer() {
    let executor = started_executor();
    let log = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let executor = executor.clone();
            let log = log.clone();
            thread::spawn(move || {
                let operations: Vec<_> = (0..50)
                    .map(|index| {
                        let log = log.clone();
                        executor
                            .invoke_async(move || {
                                log.lock().push((producer, index));
                                Ok(())
                            })
                            .unwrap()
                    })
                    .collect();
                for operation in operations {
                    operation.result().unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let log = log.lock();
    assert_eq!(log.len(), 200);
    for producer in 0..4 {
        let order: Vec<_> = log.iter().filter(|(p, _)| *p == producer).map(|(_, i)| *i).collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }
    drop(log);
    stop(&executor);
}
