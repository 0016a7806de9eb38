//! Mock channel substrate for testing.
//!
//! Records published frames without delivering them, injects failures on
//! demand, and lets tests hand-deliver frames to registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Channel, ChannelError, FrameHandler, Result, Substrate};
use crate::frame::Frame;

#[derive(Default)]
struct MockState {
    handlers: RwLock<HashMap<String, Vec<Box<dyn FrameHandler>>>>,
    published: RwLock<Vec<(String, Frame)>>,
    fail_on_publish: RwLock<bool>,
    fail_on_subscribe: RwLock<bool>,
}

/// Mock substrate for testing.
#[derive(Default)]
pub struct MockSubstrate {
    state: Arc<MockState>,
}

impl MockSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.state.fail_on_publish.write().await = fail;
    }

    pub async fn set_fail_on_subscribe(&self, fail: bool) {
        *self.state.fail_on_subscribe.write().await = fail;
    }

    /// Number of frames published so far, across all channels.
    pub async fn published_count(&self) -> usize {
        self.state.published.read().await.len()
    }

    /// Snapshot of `(channel, frame)` publishes in order.
    pub async fn published(&self) -> Vec<(String, Frame)> {
        self.state.published.read().await.clone()
    }

    /// Drain recorded publishes.
    pub async fn take_published(&self) -> Vec<(String, Frame)> {
        std::mem::take(&mut *self.state.published.write().await)
    }

    /// Deliver a frame to every handler subscribed on `channel`.
    ///
    /// Publishes are recorded, never delivered; this is how tests drive
    /// the receiving side.
    pub async fn inject(&self, channel: &str, frame: Frame) {
        let handlers = self.state.handlers.read().await;
        if let Some(subscribed) = handlers.get(channel) {
            for handler in subscribed {
                handler.handle(frame.clone()).await;
            }
        }
    }
}

#[async_trait]
impl Substrate for MockSubstrate {
    async fn open(&self, name: &str) -> Result<Arc<dyn Channel>> {
        Ok(Arc::new(MockChannel {
            name: name.to_string(),
            state: self.state.clone(),
        }))
    }
}

struct MockChannel {
    name: String,
    state: Arc<MockState>,
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, handler: Box<dyn FrameHandler>) -> Result<()> {
        if *self.state.fail_on_subscribe.read().await {
            return Err(ChannelError::Subscribe(
                "Mock subscribe failure".to_string(),
            ));
        }
        self.state
            .handlers
            .write()
            .await
            .entry(self.name.clone())
            .or_default()
            .push(handler);
        Ok(())
    }

    async fn publish(&self, frame: Frame) -> Result<()> {
        if *self.state.fail_on_publish.read().await {
            return Err(ChannelError::Publish("Mock publish failure".to_string()));
        }
        self.state
            .published
            .write()
            .await
            .push((self.name.clone(), frame));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.handlers.write().await.remove(&self.name);
        Ok(())
    }
}
