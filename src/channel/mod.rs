//! Pub/sub channel substrate for broadcast conversations.
//!
//! This module contains:
//! - `Substrate` trait: opens named channels on a shared message bus
//! - `Channel` trait: subscribe/publish/close on one named channel
//! - `FrameHandler` trait: callback for inbound frames
//! - Implementations: in-memory (tokio broadcast), NATS, mock, lossy

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::frame::Frame;

// Implementation modules
pub mod lossy;
pub mod memory;
pub mod mock;
#[cfg(feature = "nats")]
pub mod nats;

// Re-exports
pub use lossy::{LossyConfig, LossyStats, LossySubstrate};
pub use memory::MemorySubstrate;
pub use mock::MockSubstrate;
#[cfg(feature = "nats")]
pub use nats::{NatsConfig, NatsSubstrate};

/// Result type for substrate operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors that can occur at the pub/sub layer.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Close failed: {0}")]
    Close(String),
}

/// Handler invoked for each frame received on a subscribed channel.
///
/// Handlers are dispatched serially per channel: the consumer awaits each
/// invocation before delivering the next frame, so a handler never runs
/// concurrently with itself for the same subscription.
pub trait FrameHandler: Send + Sync {
    /// Process one inbound frame.
    fn handle(&self, frame: Frame) -> BoxFuture<'static, ()>;
}

/// One named channel on the bus.
///
/// Handles to the same name share traffic: a frame published through any
/// handle reaches every subscription on that name.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The channel name this handle is bound to.
    fn name(&self) -> &str;

    /// Begin receiving frames, dispatching each to `handler`.
    ///
    /// Receiving is active once this returns `Ok`; frames published before
    /// that may not be observed.
    async fn subscribe(&self, handler: Box<dyn FrameHandler>) -> Result<()>;

    /// Publish one frame to every subscriber of this channel's name.
    ///
    /// Publishing with no subscribers is not an error.
    async fn publish(&self, frame: Frame) -> Result<()>;

    /// Cease receiving and release the handle. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Factory for channel handles on a shared bus.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Obtain a handle to the channel called `name`, creating it if the
    /// transport requires.
    async fn open(&self, name: &str) -> Result<Arc<dyn Channel>>;
}
