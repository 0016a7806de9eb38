//! In-memory channel substrate for standalone mode.
//!
//! Uses tokio broadcast channels for pub/sub within a single process.
//! Ideal for local development and testing without external dependencies.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, error};

use super::{Channel, FrameHandler, Result, Substrate};
use crate::frame::Frame;

/// Per-topic capacity for broadcast.
const TOPIC_CAPACITY: usize = 1024;

/// In-memory substrate backed by tokio broadcast channels.
///
/// Topics are created lazily on first `open` and shared by every handle
/// opened for the same name, so publishers and subscribers within one
/// process rendezvous without any external broker.
#[derive(Default)]
pub struct MemorySubstrate {
    topics: RwLock<HashMap<String, broadcast::Sender<Frame>>>,
}

impl MemorySubstrate {
    /// Create a new in-memory substrate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the broadcast sender for a topic.
    async fn topic(&self, name: &str) -> broadcast::Sender<Frame> {
        {
            let topics = self.topics.read().await;
            if let Some(sender) = topics.get(name) {
                return sender.clone();
            }
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Substrate for MemorySubstrate {
    async fn open(&self, name: &str) -> Result<Arc<dyn Channel>> {
        let sender = self.topic(name).await;
        Ok(Arc::new(MemoryChannel::new(name.to_string(), sender)))
    }
}

/// One handle to an in-memory topic.
pub struct MemoryChannel {
    name: String,
    sender: broadcast::Sender<Frame>,
    /// Signals consumer tasks of this handle to stop.
    shutdown: watch::Sender<bool>,
}

impl MemoryChannel {
    fn new(name: String, sender: broadcast::Sender<Frame>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name,
            sender,
            shutdown,
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, handler: Box<dyn FrameHandler>) -> Result<()> {
        // The receiver must exist before this call returns so no frame
        // published after subscription is missed.
        let mut receiver = self.sender.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Handle close() and dropped handles alike.
                    _ = shutdown.changed() => break,
                    received = receiver.recv() => match received {
                        Ok(frame) => handler.handle(frame).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            error!(channel = %name, skipped = n, "Consumer lagged, skipped frames");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(channel = %name, "Consumer stopped");
        });

        Ok(())
    }

    async fn publish(&self, frame: Frame) -> Result<()> {
        match self.sender.send(frame) {
            Ok(receiver_count) => {
                debug!(
                    channel = %self.name,
                    receivers = receiver_count,
                    "Published frame"
                );
            }
            Err(_) => {
                // No receivers, which is fine for fire-and-forget publishes.
                debug!(channel = %self.name, "Published frame (no receivers)");
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // send only fails when every consumer is already gone.
        let _ = self.shutdown.send(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
