//! tannoy - broadcast request/reply conversations over a message bus
//!
//! A requester publishes a named broadcast; any number of listeners
//! receive it, ack, stream back reply frames, and signal completion. The
//! requester aggregates per-host replies under connect and idle timeouts
//! against a dynamically updated expected-host set, and delivers an
//! ordered event stream to its consumer.

pub mod channel;
pub mod config;
pub mod facade;
pub mod frame;
pub mod identity;
pub mod listener;
pub mod presence;
pub mod requester;
pub mod telemetry;

// Re-export common types for library usage
pub use channel::{Channel, ChannelError, FrameHandler, MemorySubstrate, Substrate};
pub use config::{BroadcastConfig, TimeoutConfig};
pub use facade::{Broadcast, BroadcastBuilder, BroadcastError};
pub use frame::{Body, Frame};
pub use identity::NodeIdentity;
pub use listener::{ListenEvent, Listener, Responder};
pub use presence::{Presence, RegistryPresence, StaticPresence};
pub use requester::{BroadcastEvent, Conversation, RequestOptions};
