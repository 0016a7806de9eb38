//! Process-local identity for broadcast participants.

use uuid::Uuid;

/// Environment variable overriding the detected hostname.
pub const HOST_ENV_VAR: &str = "TANNOY_HOST";

/// The name this node stamps on every outgoing frame.
///
/// Stable for the process lifetime: resolve it once at startup and share
/// the value.
#[derive(Clone, Debug)]
pub struct NodeIdentity {
    hostname: String,
}

impl NodeIdentity {
    /// Identity with an explicit hostname.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }

    /// Resolve identity from the environment.
    ///
    /// Checks `TANNOY_HOST`, then `HOSTNAME`, falling back to
    /// `"localhost"`.
    pub fn from_env() -> Self {
        let hostname = std::env::var(HOST_ENV_VAR)
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".to_string());
        Self { hostname }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

/// Mint a fresh broadcast id.
pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}
