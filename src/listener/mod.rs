//! Listener role: receive broadcast requests, ack them, stream replies.
//!
//! A listener subscribes to the shared request channel for a name. For
//! each inbound request it opens that conversation's reply channel, acks,
//! and hands the consumer a [`Responder`] bound to the request. Consumers
//! reply any number of times, then end; the responder's terminal flag
//! rejects replies after end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::channel::{Channel, FrameHandler, Substrate};
use crate::facade::BroadcastError;
use crate::frame::{self, Body, Frame};

/// Capacity of the listener's event queue.
const EVENT_CAPACITY: usize = 1024;

/// Events surfaced by a [`Listener`].
#[derive(Debug)]
pub enum ListenEvent {
    /// The subscription on the request channel is active.
    Ready,
    /// An inbound broadcast request.
    Request {
        /// The request body, forwarded verbatim.
        body: Body,
        /// Reply handle bound to this request's reply channel.
        responder: Responder,
    },
}

/// An active subscription to a broadcast name.
///
/// Emits [`ListenEvent::Ready`] once, then one
/// [`ListenEvent::Request`] per inbound request, until closed or
/// dropped.
pub struct Listener {
    events: mpsc::Receiver<ListenEvent>,
    channel: Arc<dyn Channel>,
}

impl Listener {
    /// Receive the next event, or `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<ListenEvent> {
        self.events.recv().await
    }

    /// Unsubscribe from the request channel.
    pub async fn close(&self) -> Result<(), BroadcastError> {
        self.channel.close().await.map_err(BroadcastError::from)
    }
}

/// Subscribe to broadcasts of `name`, stamping `host` on outgoing frames.
pub(crate) async fn listen(
    substrate: Arc<dyn Substrate>,
    host: String,
    name: &str,
) -> Result<Listener, BroadcastError> {
    let channel = substrate.open(&frame::request_channel(name)).await?;
    let (events, rx) = mpsc::channel(EVENT_CAPACITY);

    // Queued ahead of the subscription so consumers always observe Ready
    // before the first request.
    let _ = events.send(ListenEvent::Ready).await;

    let handler = RequestHandler {
        name: name.to_string(),
        substrate,
        host,
        events,
    };
    channel.subscribe(Box::new(handler)).await?;

    debug!(name = %name, "Listening for broadcasts");

    Ok(Listener {
        events: rx,
        channel,
    })
}

/// Per-request servicing: open the reply channel, ack, surface the
/// request.
struct RequestHandler {
    name: String,
    substrate: Arc<dyn Substrate>,
    host: String,
    events: mpsc::Sender<ListenEvent>,
}

impl FrameHandler for RequestHandler {
    fn handle(&self, frame: Frame) -> BoxFuture<'static, ()> {
        let name = self.name.clone();
        let substrate = self.substrate.clone();
        let host = self.host.clone();
        let events = self.events.clone();

        Box::pin(async move {
            let Frame::Request {
                broadcast_id,
                body,
                host: requester,
            } = frame
            else {
                // Only request frames travel the request channel.
                return;
            };

            debug!(
                name = %name,
                broadcast_id = %broadcast_id,
                from = %requester,
                "Received broadcast request"
            );

            let reply_name = frame::reply_channel(&name, &broadcast_id);
            let reply = match substrate.open(&reply_name).await {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(
                        channel = %reply_name,
                        error = %e,
                        "Failed to open reply channel, dropping request"
                    );
                    return;
                }
            };

            // An unackable request is dropped without surfacing it.
            if let Err(e) = reply.publish(Frame::Ack { host: host.clone() }).await {
                warn!(
                    channel = %reply_name,
                    error = %e,
                    "Failed to ack broadcast request, dropping it"
                );
                if let Err(e) = reply.close().await {
                    debug!(channel = %reply_name, error = %e, "Failed to close reply channel");
                }
                return;
            }

            let responder = Responder {
                host,
                broadcast_id,
                channel: reply,
                closed: Arc::new(AtomicBool::new(false)),
            };
            let _ = events.send(ListenEvent::Request { body, responder }).await;
        })
    }
}

/// Reply handle for one broadcast request.
///
/// `reply` streams bodies back to the requester; `end` signals completion
/// and closes the reply channel. Once ended, further calls fail without
/// publishing.
#[derive(Clone)]
pub struct Responder {
    host: String,
    broadcast_id: String,
    channel: Arc<dyn Channel>,
    closed: Arc<AtomicBool>,
}

impl Responder {
    /// The conversation this responder belongs to.
    pub fn broadcast_id(&self) -> &str {
        &self.broadcast_id
    }

    /// Whether `end` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one reply body to the requester.
    pub async fn reply(&self, body: Body) -> Result<(), BroadcastError> {
        if self.closed.load(Ordering::SeqCst) {
            error!(
                broadcast_id = %self.broadcast_id,
                "Reply attempted after end"
            );
            return Err(BroadcastError::ReplyAfterEnd);
        }

        self.channel
            .publish(Frame::Data {
                host: self.host.clone(),
                body,
            })
            .await
            .map_err(BroadcastError::from)
    }

    /// Signal completion and close the reply channel.
    ///
    /// The terminal flag flips before any publish, so a racing `reply` on
    /// a clone of this responder observes the closed state. Publish and
    /// close failures are logged as warnings; the first is returned and
    /// the responder is terminal regardless.
    pub async fn end(&self) -> Result<(), BroadcastError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            error!(
                broadcast_id = %self.broadcast_id,
                "End attempted after end"
            );
            return Err(BroadcastError::ReplyAfterEnd);
        }

        let mut first_error: Option<BroadcastError> = None;

        if let Err(e) = self
            .channel
            .publish(Frame::End {
                host: self.host.clone(),
            })
            .await
        {
            warn!(
                broadcast_id = %self.broadcast_id,
                error = %e,
                "Failed to publish end frame"
            );
            first_error = Some(e.into());
        }

        if let Err(e) = self.channel.close().await {
            warn!(
                broadcast_id = %self.broadcast_id,
                error = %e,
                "Failed to close reply channel"
            );
            first_error.get_or_insert(e.into());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("host", &self.host)
            .field("broadcast_id", &self.broadcast_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
