//! The broadcast node facade.
//!
//! Ties a substrate, an identity, and a presence registry together into
//! the two public operations: `listen` and `request`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use tannoy::{Broadcast, ListenEvent, MemorySubstrate, RequestOptions, StaticPresence};
//!
//! let node = Broadcast::builder()
//!     .with_substrate(Arc::new(MemorySubstrate::new()))
//!     .with_hostname("node-1")
//!     .build();
//!
//! let mut listener = node.listen("deploy").await?;
//! tokio::spawn(async move {
//!     while let Some(event) = listener.recv().await {
//!         if let ListenEvent::Request { body, responder } = event {
//!             responder.reply(json!("done")).await.ok();
//!             responder.end().await.ok();
//!         }
//!     }
//! });
//!
//! let mut convo = node
//!     .request("deploy", json!("restart"), RequestOptions::expecting(["node-1"]))
//!     .await;
//! while let Some(event) = convo.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::sync::Arc;

use crate::channel::{ChannelError, MemorySubstrate, Substrate};
use crate::frame::Body;
use crate::identity::NodeIdentity;
use crate::listener::{self, Listener};
use crate::presence::{Presence, StaticPresence};
use crate::requester::{self, Conversation, RequestOptions};

/// Errors surfaced by broadcast conversations.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// A reply or end was attempted after the response stream ended.
    #[error("Reply after end")]
    ReplyAfterEnd,

    /// No inbound frame arrived within the connect window.
    #[error("Did not receive a message within the connect timeout interval of {0}ms")]
    ConnectTimeout(u64),

    /// Inter-frame silence exceeded the idle window.
    #[error("Did not receive a message with the idle timeout interval of {0}ms")]
    IdleTimeout(u64),

    /// The pub/sub layer failed.
    #[error(transparent)]
    Transport(#[from] ChannelError),
}

/// Builder for a [`Broadcast`] node.
pub struct BroadcastBuilder {
    substrate: Option<Arc<dyn Substrate>>,
    identity: Option<NodeIdentity>,
    presence: Option<Arc<dyn Presence>>,
}

impl BroadcastBuilder {
    fn new() -> Self {
        Self {
            substrate: None,
            identity: None,
            presence: None,
        }
    }

    /// Use the given substrate. Defaults to an in-memory substrate.
    pub fn with_substrate(mut self, substrate: Arc<dyn Substrate>) -> Self {
        self.substrate = Some(substrate);
        self
    }

    /// Stamp outgoing frames with this hostname. Defaults to environment
    /// detection.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.identity = Some(NodeIdentity::new(hostname));
        self
    }

    /// Use the given presence registry. Defaults to an empty one.
    pub fn with_presence(mut self, presence: Arc<dyn Presence>) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn build(self) -> Broadcast {
        Broadcast {
            substrate: self
                .substrate
                .unwrap_or_else(|| Arc::new(MemorySubstrate::new())),
            identity: self.identity.unwrap_or_else(NodeIdentity::from_env),
            presence: self
                .presence
                .unwrap_or_else(|| Arc::new(StaticPresence::empty())),
        }
    }
}

/// A broadcast node: one participant on the bus, able to listen for
/// requests and to issue its own.
pub struct Broadcast {
    substrate: Arc<dyn Substrate>,
    identity: NodeIdentity,
    presence: Arc<dyn Presence>,
}

impl Broadcast {
    pub fn builder() -> BroadcastBuilder {
        BroadcastBuilder::new()
    }

    /// A node over the given substrate with defaults for the rest.
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        Self::builder().with_substrate(substrate).build()
    }

    /// This node's hostname.
    pub fn hostname(&self) -> &str {
        self.identity.hostname()
    }

    /// Subscribe to broadcasts of `name`.
    ///
    /// The returned [`Listener`] emits `Ready` once, then one `Request`
    /// per inbound broadcast until closed.
    pub async fn listen(&self, name: &str) -> Result<Listener, BroadcastError> {
        listener::listen(
            self.substrate.clone(),
            self.identity.hostname().to_string(),
            name,
        )
        .await
    }

    /// Broadcast `data` to every listener of `name` and aggregate their
    /// replies.
    ///
    /// The default expected-host set is a snapshot of presence taken
    /// here; later presence changes do not affect the conversation. The
    /// returned [`Conversation`] emits exactly one terminal event.
    pub async fn request(&self, name: &str, data: Body, options: RequestOptions) -> Conversation {
        let expect = options
            .expect
            .unwrap_or_else(|| self.presence.hosts());

        requester::request(
            self.substrate.clone(),
            self.identity.hostname().to_string(),
            name,
            data,
            expect,
            options.timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::requester::BroadcastEvent;

    #[tokio::test]
    async fn test_default_expect_is_presence_snapshot() {
        let node = Broadcast::builder()
            .with_hostname("me")
            .with_presence(Arc::new(StaticPresence::new(["peer"])))
            .build();

        // No listener for "peer": the conversation times out still
        // expecting it, proving the presence snapshot seeded the set.
        let mut convo = node
            .request(
                "t",
                json!(null),
                RequestOptions::default().with_timeout(crate::config::TimeoutConfig {
                    connect: 10,
                    idle: 10,
                }),
            )
            .await;

        match convo.recv().await {
            Some(BroadcastEvent::Error { expecting, .. }) => {
                assert_eq!(expecting, vec!["peer".to_string()]);
            }
            other => panic!("Expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_presence_ends_immediately() {
        let node = Broadcast::builder().with_hostname("me").build();

        let mut convo = node
            .request("t", json!(null), RequestOptions::default())
            .await;

        assert!(matches!(
            convo.recv().await,
            Some(BroadcastEvent::End { .. })
        ));
    }

    #[test]
    fn test_error_messages_are_stable() {
        assert_eq!(
            BroadcastError::ConnectTimeout(5000).to_string(),
            "Did not receive a message within the connect timeout interval of 5000ms"
        );
        assert_eq!(
            BroadcastError::IdleTimeout(100).to_string(),
            "Did not receive a message with the idle timeout interval of 100ms"
        );
    }
}
