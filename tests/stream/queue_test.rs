//! Producer/consumer behaviour of the event queue.

use std::sync::Arc;
use std::time::Duration;

use gerrit_stream::events::EventDecoder;
use gerrit_stream::stream::{EventQueue, OverflowPolicy, PushOutcome, QueueConfig, QueueError};
use gerrit_stream::Event;
use serde_json::Value;

fn event(seq: u64) -> Event {
    EventDecoder::new()
        .decode(&format!(r#"{{"type":"ref-updated","seq":{seq}}}"#))
        .unwrap()
        .unwrap()
}

fn seq(event: &Event) -> u64 {
    event.raw().get("seq").and_then(Value::as_u64).unwrap()
}

#[tokio::test]
async fn consumer_sees_producer_order() {
    let queue = Arc::new(EventQueue::new(QueueConfig::bounded(4, OverflowPolicy::Block)));

    let producer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            for n in 0..50 {
                queue.push(event(n)).await.unwrap();
            }
            queue.close();
        })
    };

    let mut seen = Vec::new();
    while let Some(event) = queue.pop(Some(Duration::from_secs(2))).await {
        seen.push(seq(&event));
    }
    producer.await.unwrap();

    assert_eq!(seen, (0..50).collect::<Vec<_>>());
}

#[tokio::test]
async fn blocked_consumer_wakes_on_close() {
    let queue = Arc::new(EventQueue::default());
    let consumer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.pop(None).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();

    let result = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .expect("consumer should wake")
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn blocked_producer_resumes_when_space_frees() {
    let queue = Arc::new(EventQueue::new(QueueConfig::bounded(1, OverflowPolicy::Block)));
    queue.push(event(1)).await.unwrap();

    let producer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.push(event(2)).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(seq(&queue.try_pop().unwrap()), 1);

    assert_eq!(producer.await.unwrap(), Ok(PushOutcome::Queued));
    assert_eq!(seq(&queue.try_pop().unwrap()), 2);
}

#[tokio::test]
async fn blocking_push_times_out() {
    let queue = EventQueue::new(
        QueueConfig::bounded(1, OverflowPolicy::Block).with_push_timeout(Duration::from_millis(30)),
    );
    queue.push(event(1)).await.unwrap();

    assert_eq!(queue.push(event(2)).await, Err(QueueError::Full));
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn drop_oldest_keeps_newest() {
    let queue = EventQueue::new(QueueConfig::bounded(2, OverflowPolicy::DropOldest));
    for n in 0..5 {
        queue.push(event(n)).await.unwrap();
    }

    assert_eq!(seq(&queue.try_pop().unwrap()), 3);
    assert_eq!(seq(&queue.try_pop().unwrap()), 4);
    assert!(queue.try_pop().is_none());
}

#[tokio::test]
async fn pop_times_out_on_empty_queue() {
    let queue = EventQueue::default();
    let started = tokio::time::Instant::now();

    assert!(queue.pop(Some(Duration::from_millis(50))).await.is_none());
    assert!(started.elapsed() >= Duration::from_millis(50));
}
