//! End-to-end broadcast conversations over the in-memory substrate.

use std::sync::Arc;

use serde_json::json;
use tokio::time::{timeout, Duration};

use tannoy::channel::MemorySubstrate;
use tannoy::frame::{reply_channel, Frame};
use tannoy::{
    Broadcast, BroadcastError, BroadcastEvent, Channel, ListenEvent, RequestOptions, Substrate,
    TimeoutConfig,
};

fn node(substrate: &Arc<MemorySubstrate>, hostname: &str) -> Broadcast {
    Broadcast::builder()
        .with_substrate(substrate.clone())
        .with_hostname(hostname)
        .build()
}

/// Service every request on `name` by replying each body, then ending.
async fn spawn_replier(broadcast: &Broadcast, name: &str, replies: Vec<serde_json::Value>) {
    let mut listener = broadcast.listen(name).await.unwrap();
    assert!(matches!(listener.recv().await, Some(ListenEvent::Ready)));

    tokio::spawn(async move {
        while let Some(event) = listener.recv().await {
            if let ListenEvent::Request { responder, .. } = event {
                for body in &replies {
                    responder.reply(body.clone()).await.unwrap();
                }
                responder.end().await.unwrap();
            }
        }
    });
}

async fn drain(convo: &mut tannoy::Conversation) -> Vec<BroadcastEvent> {
    let mut events = Vec::new();
    while let Some(event) = timeout(Duration::from_secs(5), convo.recv())
        .await
        .expect("conversation stalled")
    {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn standard_roundtrip() {
    tannoy::telemetry::init_tracing();

    let substrate = Arc::new(MemorySubstrate::new());
    let broadcast = node(&substrate, "self");
    spawn_replier(&broadcast, "test", vec![json!("test-response")]).await;

    let mut convo = broadcast
        .request(
            "test",
            json!("test-request"),
            RequestOptions::expecting(["self"]),
        )
        .await;

    let events = drain(&mut convo).await;
    assert_eq!(events.len(), 4);

    match &events[0] {
        BroadcastEvent::Ack { host } => assert_eq!(host, "self"),
        other => panic!("Expected ack first, got {:?}", other),
    }
    match &events[1] {
        BroadcastEvent::Data { host, body } => {
            assert_eq!(host, "self");
            assert_eq!(body, &json!("test-response"));
        }
        other => panic!("Expected data second, got {:?}", other),
    }
    match &events[2] {
        BroadcastEvent::HostEnd { host, responses } => {
            assert_eq!(host, "self");
            assert_eq!(responses, &vec![json!("test-response")]);
        }
        other => panic!("Expected host end third, got {:?}", other),
    }
    match &events[3] {
        BroadcastEvent::End {
            responses,
            expecting,
        } => {
            assert_eq!(responses.len(), 1);
            assert_eq!(responses["self"], vec![json!("test-response")]);
            assert!(expecting.is_empty());
        }
        other => panic!("Expected end last, got {:?}", other),
    }
}

#[tokio::test]
async fn reply_after_end_is_rejected() {
    let substrate = Arc::new(MemorySubstrate::new());
    let broadcast = node(&substrate, "self");

    let mut listener = broadcast.listen("test").await.unwrap();
    assert!(matches!(listener.recv().await, Some(ListenEvent::Ready)));

    let (late_tx, late_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Some(ListenEvent::Request { responder, .. }) = listener.recv().await {
            responder.reply(json!("first")).await.unwrap();
            responder.end().await.unwrap();
            let late = responder.reply(json!("second")).await;
            let _ = late_tx.send(late);
        }
    });

    let mut convo = broadcast
        .request("test", json!(null), RequestOptions::expecting(["self"]))
        .await;
    let events = drain(&mut convo).await;

    // The late reply failed on the listener side...
    let late = late_rx.await.unwrap();
    assert!(matches!(late, Err(BroadcastError::ReplyAfterEnd)));

    // ...and the requester saw exactly one data frame.
    let data: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BroadcastEvent::Data { body, .. } => Some(body.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(data, vec![json!("first")]);
}

#[tokio::test]
async fn concurrent_conversations_do_not_cross_talk() {
    let substrate = Arc::new(MemorySubstrate::new());
    let broadcast = Arc::new(node(&substrate, "self"));

    for i in 0..4 {
        spawn_replier(&broadcast, &format!("test{}", i), vec![json!(i)]).await;
    }

    let mut handles = Vec::new();
    for i in 0..4 {
        let broadcast = broadcast.clone();
        handles.push(tokio::spawn(async move {
            let mut convo = broadcast
                .request(
                    &format!("test{}", i),
                    json!(i),
                    RequestOptions::expecting(["self"]),
                )
                .await;
            let events = drain(&mut convo).await;

            let data: Vec<_> = events
                .iter()
                .filter_map(|e| match e {
                    BroadcastEvent::Data { body, .. } => Some(body.clone()),
                    _ => None,
                })
                .collect();
            assert_eq!(data, vec![json!(i)], "conversation {} got foreign data", i);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn connect_timeout_with_no_responders() {
    let substrate = Arc::new(MemorySubstrate::new());
    let broadcast = node(&substrate, "self");

    // No listener bound anywhere.
    let mut convo = broadcast
        .request(
            "test",
            json!(null),
            RequestOptions::expecting(["self"]).with_timeout(TimeoutConfig {
                connect: 10,
                idle: 5000,
            }),
        )
        .await;

    let events = drain(&mut convo).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        BroadcastEvent::Error { error, expecting } => {
            assert_eq!(
                error.to_string(),
                "Did not receive a message within the connect timeout interval of 10ms"
            );
            assert_eq!(expecting, &vec!["self".to_string()]);
        }
        other => panic!("Expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn expected_host_that_never_responds() {
    let substrate = Arc::new(MemorySubstrate::new());
    let broadcast = node(&substrate, "self");

    // This node ends immediately without replying; host1 never shows up.
    spawn_replier(&broadcast, "test", Vec::new()).await;

    let mut convo = broadcast
        .request(
            "test",
            json!(null),
            RequestOptions::expecting(["host1"]).with_timeout(TimeoutConfig {
                connect: 5000,
                idle: 100,
            }),
        )
        .await;

    let events = drain(&mut convo).await;
    match events.last() {
        Some(BroadcastEvent::End {
            responses,
            expecting,
        }) => {
            assert_eq!(expecting, &vec!["host1".to_string()]);
            assert_eq!(responses["self"], Vec::<serde_json::Value>::new());
            assert!(!responses.contains_key("host1"));
        }
        other => panic!("Expected end, got {:?}", other),
    }
}

#[tokio::test]
async fn unexpected_acker_blocks_completion() {
    let substrate = Arc::new(MemorySubstrate::new());
    let broadcast = node(&substrate, "self");

    let mut listener = broadcast.listen("test").await.unwrap();
    assert!(matches!(listener.recv().await, Some(ListenEvent::Ready)));

    // While servicing the request, also impersonate "host1" with a
    // synthetic ack on the reply channel, then end our own reply.
    let handler_substrate = substrate.clone();
    tokio::spawn(async move {
        if let Some(ListenEvent::Request { responder, .. }) = listener.recv().await {
            let reply = handler_substrate
                .open(&reply_channel("test", responder.broadcast_id()))
                .await
                .unwrap();
            reply
                .publish(Frame::Ack {
                    host: "host1".to_string(),
                })
                .await
                .unwrap();
            responder.end().await.unwrap();
        }
    });

    let mut convo = broadcast
        .request(
            "test",
            json!(null),
            RequestOptions::expecting(["self"]).with_timeout(TimeoutConfig {
                connect: 5000,
                idle: 100,
            }),
        )
        .await;

    let events = drain(&mut convo).await;

    let host_ends: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BroadcastEvent::HostEnd { host, responses } => Some((host.clone(), responses.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(host_ends, vec![("self".to_string(), Vec::new())]);

    match events.last() {
        Some(BroadcastEvent::End {
            responses,
            expecting,
        }) => {
            assert_eq!(expecting, &vec!["host1".to_string()]);
            assert_eq!(responses["self"], Vec::<serde_json::Value>::new());
            assert_eq!(responses["host1"], Vec::<serde_json::Value>::new());
        }
        other => panic!("Expected end, got {:?}", other),
    }
}

#[tokio::test]
async fn multiple_listeners_all_reply() {
    let substrate = Arc::new(MemorySubstrate::new());

    let alpha = node(&substrate, "alpha");
    let beta = node(&substrate, "beta");
    spawn_replier(&alpha, "roll-call", vec![json!("alpha here")]).await;
    spawn_replier(&beta, "roll-call", vec![json!("beta here")]).await;

    let requester = node(&substrate, "self");
    let mut convo = requester
        .request(
            "roll-call",
            json!(null),
            RequestOptions::expecting(["alpha", "beta"]),
        )
        .await;

    let events = drain(&mut convo).await;
    match events.last() {
        Some(BroadcastEvent::End {
            responses,
            expecting,
        }) => {
            assert!(expecting.is_empty());
            assert_eq!(responses["alpha"], vec![json!("alpha here")]);
            assert_eq!(responses["beta"], vec![json!("beta here")]);
        }
        other => panic!("Expected end, got {:?}", other),
    }
}
