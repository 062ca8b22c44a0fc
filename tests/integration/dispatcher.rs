//! Ambient dispatcher from foreign threads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use frameloop::runtime::executor::Payload;
use frameloop::{ExecutorDispatcher, OperationStatus, Timeout};

use crate::common::{started_executor, stop};

#[test]
fn test_post_then_send_preserves_order() {
    let executor = started_executor();
    let dispatcher = ExecutorDispatcher::new(executor.clone());
    let posted = Arc::new(AtomicBool::new(false));

    {
        let posted = posted.clone();
        dispatcher
            .post(
                move |_| {
                    posted.store(true, Ordering::SeqCst);
                    Ok(None)
                },
                None,
            )
            .unwrap();
    }

    let observed = {
        let posted = posted.clone();
        dispatcher
            .send(
                move |_| Ok(Some(Box::new(posted.load(Ordering::SeqCst)) as Payload)),
                None,
            )
            .unwrap()
    };
    let observed = observed.and_then(|value| value.downcast::<bool>().ok()).map(|value| *value);
    assert_eq!(observed, Some(true));

    stop(&executor);
}

#[test]
fn test_current_dispatcher_inside_operation() {
    let executor = started_executor();
    assert!(ExecutorDispatcher::current().is_none());

    let expected = executor.clone();
    let matches = executor
        .invoke(move || Ok(ExecutorDispatcher::current().map(|d| d.executor() == &expected)))
        .unwrap();
    assert_eq!(matches, Some(true));

    stop(&executor);
}

#[test]
fn test_posted_error_filter() {
    let executor = started_executor();
    let handled = Arc::new(AtomicBool::new(false));
    {
        let handled = handled.clone();
        executor.add_error_filter(move |_| {
            handled.store(true, Ordering::SeqCst);
            true
        });
    }

    let dispatcher = ExecutorDispatcher::new(executor.clone());
    let handle = dispatcher.post(|_| Err(anyhow::anyhow!("posted")), None).unwrap();
    assert_eq!(handle.wait(Timeout::Infinite).unwrap(), OperationStatus::Completed);
    assert!(handled.load(Ordering::SeqCst));

    stop(&executor);
}

#[test]
fn test_send_argument_round_trip() {
    let executor = started_executor();
    let dispatcher = ExecutorDispatcher::new(executor.clone());

    let reply = dispatcher
        .send(
            |argument| {
                let text = argument
                    .and_then(|value| value.downcast::<String>().ok())
                    .map(|value| value.to_uppercase())
                    .unwrap_or_default();
                Ok(Some(Box::new(text) as Payload))
            },
            Some(Box::new("hello".to_string()) as Payload),
        )
        .unwrap();
    let reply = reply.and_then(|value| value.downcast::<String>().ok()).map(|value| *value);
    assert_eq!(reply.as_deref(), Some("HELLO"));

    stop(&executor);
}
