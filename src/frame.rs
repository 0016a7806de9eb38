//! Wire frames and channel naming for broadcast conversations.
//!
//! Every frame carries a `type` discriminator and the sender's `host`.
//! Bodies are opaque JSON values; the codec transports them without
//! inspection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque request/reply payload.
///
/// The conversation layer never interprets bodies; they are forwarded
/// verbatim between requester and listeners.
pub type Body = Value;

/// Channel name prefix for request channels.
const REQUEST_PREFIX: &str = "broadcast:request";

/// Channel name prefix for reply channels.
const REPLY_PREFIX: &str = "broadcast:reply";

/// One message on a broadcast channel.
///
/// `Request` travels requester → listeners on the shared request channel;
/// `Ack`, `Data`, and `End` travel listener → requester on the
/// per-conversation reply channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// A broadcast request. Fans out to every listener of the name.
    Request {
        host: String,
        #[serde(rename = "broadcastId")]
        broadcast_id: String,
        body: Body,
    },
    /// A listener acknowledging that it will service the request.
    Ack { host: String },
    /// One reply body from a listener.
    Data { host: String, body: Body },
    /// A listener signalling that it is done replying.
    End { host: String },
}

impl Frame {
    /// The hostname stamped on this frame by its sender.
    pub fn host(&self) -> &str {
        match self {
            Frame::Request { host, .. }
            | Frame::Ack { host }
            | Frame::Data { host, .. }
            | Frame::End { host } => host,
        }
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from the wire representation.
    ///
    /// Frames with an unknown `type` fail to decode; receivers discard
    /// them.
    pub fn decode(bytes: &[u8]) -> Result<Frame, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Name of the shared request channel for a broadcast name.
///
/// All listeners of `name` subscribe to the same request channel.
pub fn request_channel(name: &str) -> String {
    format!("{}:{}", REQUEST_PREFIX, name)
}

/// Name of the per-conversation reply channel.
///
/// Unique per `(name, broadcast_id)` pair, so replies from concurrent
/// conversations never mix.
pub fn reply_channel(name: &str, broadcast_id: &str) -> String {
    format!("{}:{}:{}", REPLY_PREFIX, name, broadcast_id)
}
