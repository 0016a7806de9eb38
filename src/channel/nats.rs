//! NATS Core channel substrate.
//!
//! Channel names map to NATS subjects (`:` becomes `.`), frames travel as
//! JSON payloads. Reconnection is handled by the `async-nats` client.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info};

use super::{Channel, ChannelError, FrameHandler, Result, Substrate};
use crate::frame::Frame;

/// Configuration for the NATS substrate.
#[derive(Clone, Debug)]
pub struct NatsConfig {
    /// NATS server URL (e.g., nats://localhost:4222).
    pub url: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
        }
    }
}

/// Substrate backed by a NATS Core connection.
pub struct NatsSubstrate {
    client: async_nats::Client,
}

impl NatsSubstrate {
    /// Connect to the configured NATS server.
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to connect: {}", e)))?;

        info!(url = %config.url, "Connected to NATS");

        Ok(Self { client })
    }

    /// NATS subjects use `.` as the token separator.
    fn subject(name: &str) -> String {
        name.replace(':', ".")
    }
}

#[async_trait]
impl Substrate for NatsSubstrate {
    async fn open(&self, name: &str) -> Result<Arc<dyn Channel>> {
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(NatsChannel {
            name: name.to_string(),
            subject: Self::subject(name),
            client: self.client.clone(),
            shutdown,
        }))
    }
}

struct NatsChannel {
    name: String,
    subject: String,
    client: async_nats::Client,
    shutdown: watch::Sender<bool>,
}

#[async_trait]
impl Channel for NatsChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, handler: Box<dyn FrameHandler>) -> Result<()> {
        let mut subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| ChannelError::Subscribe(format!("Failed to subscribe: {}", e)))?;

        let mut shutdown = self.shutdown.subscribe();
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        let _ = subscriber.unsubscribe().await;
                        break;
                    }
                    message = subscriber.next() => match message {
                        Some(message) => match Frame::decode(&message.payload) {
                            Ok(frame) => handler.handle(frame).await,
                            Err(e) => {
                                debug!(channel = %name, error = %e, "Discarded undecodable frame");
                            }
                        },
                        None => break,
                    },
                }
            }
            debug!(channel = %name, "Consumer stopped");
        });

        Ok(())
    }

    async fn publish(&self, frame: Frame) -> Result<()> {
        let payload = frame
            .encode()
            .map_err(|e| ChannelError::Publish(format!("Failed to encode frame: {}", e)))?;

        self.client
            .publish(self.subject.clone(), Bytes::from(payload))
            .await
            .map_err(|e| ChannelError::Publish(format!("Failed to publish: {}", e)))?;

        debug!(channel = %self.name, subject = %self.subject, "Published frame");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        Ok(())
    }
}
