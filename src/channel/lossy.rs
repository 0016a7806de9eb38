//! Lossy substrate wrapper for testing unreliable frame delivery.
//!
//! Wraps any `Substrate` implementation and optionally drops outbound
//! frames based on a configurable probability. Useful for exercising
//! partial-failure behavior: hosts that ack and then go silent, replies
//! that never arrive, end frames that get lost.
//!
//! # Example
//!
//! ```ignore
//! use tannoy::channel::{LossyConfig, LossySubstrate, MemorySubstrate};
//!
//! // Drop 10% of published frames
//! let inner = Arc::new(MemorySubstrate::new());
//! let lossy = LossySubstrate::new(inner, LossyConfig::with_drop_rate(0.1));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use super::{Channel, FrameHandler, Result, Substrate};
use crate::frame::Frame;

/// Configuration for lossy behavior.
#[derive(Clone, Debug)]
pub struct LossyConfig {
    /// Probability of dropping a published frame (0.0 to 1.0).
    pub drop_rate: f64,
    /// Whether to log dropped frames.
    pub log_drops: bool,
}

impl Default for LossyConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl LossyConfig {
    /// Never drop frames (pass-through).
    pub fn none() -> Self {
        Self {
            drop_rate: 0.0,
            log_drops: false,
        }
    }

    /// Drop frames with the given probability, clamped to [0, 1].
    pub fn with_drop_rate(rate: f64) -> Self {
        Self {
            drop_rate: rate.clamp(0.0, 1.0),
            log_drops: true,
        }
    }

    /// Drop every frame.
    pub fn drop_all() -> Self {
        Self {
            drop_rate: 1.0,
            log_drops: true,
        }
    }
}

/// Counters for the lossy wrapper.
#[derive(Debug, Default)]
pub struct LossyStats {
    /// Frames handed to publish.
    pub total: AtomicU64,
    /// Frames dropped.
    pub dropped: AtomicU64,
    /// Frames passed through to the inner substrate.
    pub passed: AtomicU64,
}

impl LossyStats {
    /// Snapshot of (total, dropped, passed).
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.total.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
            self.passed.load(Ordering::Relaxed),
        )
    }
}

/// Substrate wrapper that drops a fraction of published frames.
pub struct LossySubstrate {
    inner: Arc<dyn Substrate>,
    config: LossyConfig,
    stats: Arc<LossyStats>,
}

impl LossySubstrate {
    pub fn new(inner: Arc<dyn Substrate>, config: LossyConfig) -> Self {
        Self {
            inner,
            config,
            stats: Arc::new(LossyStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<LossyStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl Substrate for LossySubstrate {
    async fn open(&self, name: &str) -> Result<Arc<dyn Channel>> {
        let inner = self.inner.open(name).await?;
        Ok(Arc::new(LossyChannel {
            inner,
            config: self.config.clone(),
            stats: self.stats.clone(),
        }))
    }
}

struct LossyChannel {
    inner: Arc<dyn Channel>,
    config: LossyConfig,
    stats: Arc<LossyStats>,
}

#[async_trait]
impl Channel for LossyChannel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn subscribe(&self, handler: Box<dyn FrameHandler>) -> Result<()> {
        self.inner.subscribe(handler).await
    }

    async fn publish(&self, frame: Frame) -> Result<()> {
        self.stats.total.fetch_add(1, Ordering::Relaxed);

        let drop = self.config.drop_rate > 0.0
            && rand::thread_rng().gen::<f64>() < self.config.drop_rate;
        if drop {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            if self.config.log_drops {
                debug!(channel = %self.inner.name(), "Dropped frame");
            }
            return Ok(());
        }

        self.stats.passed.fetch_add(1, Ordering::Relaxed);
        self.inner.publish(frame).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
