use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::Mutex;

use super::*;

fn ack(host: &str) -> Frame {
    Frame::Ack {
        host: host.to_string(),
    }
}

struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl FrameHandler for CountingHandler {
    fn handle(&self, _frame: Frame) -> BoxFuture<'static, ()> {
        let count = self.count.clone();
        Box::pin(async move {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }
}

struct RecordingHandler {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl FrameHandler for RecordingHandler {
    fn handle(&self, frame: Frame) -> BoxFuture<'static, ()> {
        let frames = self.frames.clone();
        Box::pin(async move {
            frames.lock().await.push(frame);
        })
    }
}

#[tokio::test]
async fn test_publish_no_receivers() {
    let substrate = MemorySubstrate::new();
    let channel = substrate.open("lonely").await.unwrap();

    // Should not error even with no subscribers
    assert!(channel.publish(ack("h")).await.is_ok());
}

#[tokio::test]
async fn test_subscribe_and_receive() {
    let substrate = MemorySubstrate::new();
    let channel = substrate.open("topic").await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    channel
        .subscribe(Box::new(CountingHandler {
            count: count.clone(),
        }))
        .await
        .unwrap();

    channel.publish(ack("h")).await.unwrap();

    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handles_on_same_name_share_traffic() {
    let substrate = MemorySubstrate::new();
    let publisher = substrate.open("shared").await.unwrap();
    let subscriber = substrate.open("shared").await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    subscriber
        .subscribe(Box::new(CountingHandler {
            count: count.clone(),
        }))
        .await
        .unwrap();

    publisher.publish(ack("h")).await.unwrap();

    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_distinct_names_are_isolated() {
    let substrate = MemorySubstrate::new();
    let a = substrate.open("a").await.unwrap();
    let b = substrate.open("b").await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    a.subscribe(Box::new(CountingHandler {
        count: count.clone(),
    }))
    .await
    .unwrap();

    b.publish(ack("h")).await.unwrap();

    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_frames_preserve_order() {
    let substrate = MemorySubstrate::new();
    let channel = substrate.open("ordered").await.unwrap();

    let frames = Arc::new(Mutex::new(Vec::new()));
    channel
        .subscribe(Box::new(RecordingHandler {
            frames: frames.clone(),
        }))
        .await
        .unwrap();

    for i in 0..5 {
        channel
            .publish(Frame::Data {
                host: "h".to_string(),
                body: json!(i),
            })
            .await
            .unwrap();
    }

    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    let received = frames.lock().await;
    let bodies: Vec<_> = received
        .iter()
        .map(|f| match f {
            Frame::Data { body, .. } => body.clone(),
            other => panic!("Unexpected frame {:?}", other),
        })
        .collect();
    assert_eq!(bodies, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
}

#[tokio::test]
async fn test_close_stops_delivery() {
    let substrate = MemorySubstrate::new();
    let channel = substrate.open("closing").await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    channel
        .subscribe(Box::new(CountingHandler {
            count: count.clone(),
        }))
        .await
        .unwrap();

    channel.close().await.unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

    // Publish through a second handle: the topic still exists, but the
    // closed handle's consumer must not see the frame.
    let other = substrate.open("closing").await.unwrap();
    other.publish(ack("h")).await.unwrap();

    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let substrate = MemorySubstrate::new();
    let channel = substrate.open("twice").await.unwrap();

    assert!(channel.close().await.is_ok());
    assert!(channel.close().await.is_ok());
}

#[tokio::test]
async fn test_dropping_handle_stops_consumer() {
    let substrate = MemorySubstrate::new();
    let count = Arc::new(AtomicUsize::new(0));

    {
        let channel = substrate.open("scoped").await.unwrap();
        channel
            .subscribe(Box::new(CountingHandler {
                count: count.clone(),
            }))
            .await
            .unwrap();
    }
    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

    let other = substrate.open("scoped").await.unwrap();
    other.publish(ack("h")).await.unwrap();

    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}
