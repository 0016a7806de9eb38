//! Presence registry: which hosts are currently known to this node.
//!
//! The requester snapshots presence once, at request construction, to
//! seed its default expected-host set. Later presence changes never alter
//! an in-flight conversation.

use std::collections::BTreeSet;
use std::sync::RwLock;

/// Source of currently-known peer hostnames.
pub trait Presence: Send + Sync {
    /// Snapshot of the known hosts.
    fn hosts(&self) -> Vec<String>;
}

/// Presence over a fixed host list.
#[derive(Debug, Default)]
pub struct StaticPresence {
    hosts: Vec<String>,
}

impl StaticPresence {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }

    /// Presence with no known hosts.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl Presence for StaticPresence {
    fn hosts(&self) -> Vec<String> {
        self.hosts.clone()
    }
}

/// Mutable presence registry for nodes that join and leave.
#[derive(Debug, Default)]
pub struct RegistryPresence {
    hosts: RwLock<BTreeSet<String>>,
}

impl RegistryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a host as present. Returns false if it was already known.
    pub fn register(&self, host: impl Into<String>) -> bool {
        self.hosts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(host.into())
    }

    /// Remove a host. Returns false if it was not known.
    pub fn deregister(&self, host: &str) -> bool {
        self.hosts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(host)
    }
}

impl Presence for RegistryPresence {
    fn hosts(&self) -> Vec<String> {
        self.hosts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
