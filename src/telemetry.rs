//! Tracing initialization for tannoy binaries and tests.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the `TANNOY_LOG` environment variable.
///
/// Defaults to "info" if `TANNOY_LOG` is not set. Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
