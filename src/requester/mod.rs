//! Requester role: broadcast a request and aggregate streamed replies.
//!
//! Each conversation is driven by one task that owns all of its state:
//! inbound frames arrive through a mailbox, a periodic tick evaluates the
//! connect and idle timeouts, and every event the consumer sees is sent
//! from that single task. Exactly one terminal event is emitted per
//! conversation, after teardown has closed the channels.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

use crate::channel::{Channel, FrameHandler, Substrate};
use crate::config::TimeoutConfig;
use crate::facade::BroadcastError;
use crate::frame::{self, Body, Frame};

/// Capacity of the conversation's event queue.
const EVENT_CAPACITY: usize = 1024;

/// Capacity of the inbound frame mailbox.
const MAILBOX_CAPACITY: usize = 1024;

/// Timeout evaluation resolution.
const TICK: Duration = Duration::from_millis(10);

/// Per-call options for [`crate::Broadcast::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Hostnames completion is awaited from. Defaults to the presence
    /// snapshot taken when the request is constructed.
    pub expect: Option<Vec<String>>,
    /// Connect/idle timeouts for this conversation.
    pub timeout: TimeoutConfig,
}

impl RequestOptions {
    /// Options awaiting the given hosts.
    pub fn expecting<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expect: Some(hosts.into_iter().map(Into::into).collect()),
            timeout: TimeoutConfig::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Events surfaced by a [`Conversation`].
///
/// Per host, events form a prefix of ack, data*, host-end. `End` and
/// `Error` are terminal: exactly one is emitted, nothing follows it.
#[derive(Debug)]
pub enum BroadcastEvent {
    /// A host acknowledged the request.
    Ack { host: String },
    /// A host streamed one reply body.
    Data { host: String, body: Body },
    /// A host signalled completion, with its replies so far.
    HostEnd { host: String, responses: Vec<Body> },
    /// The conversation finished with at least one inbound frame, or
    /// every expected host completed. `expecting` lists hosts still
    /// awaited at teardown (empty on normal completion).
    End {
        responses: BTreeMap<String, Vec<Body>>,
        expecting: Vec<String>,
    },
    /// The conversation failed before any host produced a frame, or
    /// setup failed outright.
    Error {
        error: BroadcastError,
        expecting: Vec<String>,
    },
}

/// One side of a broadcast conversation: the aggregated event stream.
pub struct Conversation {
    events: mpsc::Receiver<BroadcastEvent>,
}

impl Conversation {
    /// Receive the next event, or `None` after the terminal event.
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        self.events.recv().await
    }

    /// Consume as a `Stream` of events.
    pub fn into_stream(self) -> ReceiverStream<BroadcastEvent> {
        ReceiverStream::new(self.events)
    }
}

/// Start a conversation. Called through [`crate::Broadcast::request`].
pub(crate) fn request(
    substrate: Arc<dyn Substrate>,
    host: String,
    name: &str,
    data: Body,
    expect: Vec<String>,
    timeout: TimeoutConfig,
) -> Conversation {
    let (events, rx) = mpsc::channel(EVENT_CAPACITY);

    if expect.is_empty() {
        // Nothing to await: terminate asynchronously without touching the
        // substrate.
        tokio::spawn(async move {
            let _ = events
                .send(BroadcastEvent::End {
                    responses: BTreeMap::new(),
                    expecting: Vec::new(),
                })
                .await;
        });
        return Conversation { events: rx };
    }

    let driver = Driver {
        name: name.to_string(),
        broadcast_id: crate::identity::random_id(),
        host,
        data,
        expect,
        timeout,
        substrate,
        events,
    };
    tokio::spawn(driver.run());

    Conversation { events: rx }
}

/// Forwards subscription frames into the driver's mailbox.
struct MailboxHandler {
    frames: mpsc::Sender<Frame>,
}

impl FrameHandler for MailboxHandler {
    fn handle(&self, frame: Frame) -> BoxFuture<'static, ()> {
        let frames = self.frames.clone();
        Box::pin(async move {
            let _ = frames.send(frame).await;
        })
    }
}

/// How a conversation reached its terminal event.
enum Terminal {
    /// Every expected host delivered its end frame.
    Complete,
    /// No frame arrived within the connect window.
    ConnectTimeout,
    /// Inter-frame silence exceeded the idle window.
    IdleTimeout,
    /// Substrate setup failed.
    Fatal(BroadcastError),
}

/// The task that owns one conversation.
struct Driver {
    name: String,
    broadcast_id: String,
    host: String,
    data: Body,
    expect: Vec<String>,
    timeout: TimeoutConfig,
    substrate: Arc<dyn Substrate>,
    events: mpsc::Sender<BroadcastEvent>,
}

impl Driver {
    async fn run(self) {
        let Driver {
            name,
            broadcast_id,
            host,
            data,
            expect,
            timeout,
            substrate,
            events,
        } = self;

        let mut state = State::new(expect, timeout, events);

        debug!(
            name = %name,
            broadcast_id = %broadcast_id,
            expecting = ?state.expecting,
            "Broadcasting request"
        );

        // Reply subscription must be live before the request goes out, or
        // immediate acks would be lost.
        let reply = match substrate
            .open(&frame::reply_channel(&name, &broadcast_id))
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                state.finish(&[], Terminal::Fatal(e.into())).await;
                return;
            }
        };

        let (frames_tx, mut mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        if let Err(e) = reply
            .subscribe(Box::new(MailboxHandler { frames: frames_tx }))
            .await
        {
            state
                .finish(&[reply], Terminal::Fatal(e.into()))
                .await;
            return;
        }

        let requests = match substrate.open(&frame::request_channel(&name)).await {
            Ok(channel) => channel,
            Err(e) => {
                state.finish(&[reply], Terminal::Fatal(e.into())).await;
                return;
            }
        };

        let channels = [reply, requests.clone()];

        // The timeout clock starts before the publish: a request that
        // never makes it onto the bus still times out.
        state.start = Instant::now();
        let mut tick = tokio::time::interval(TICK);

        if let Err(e) = requests
            .publish(Frame::Request {
                host,
                broadcast_id: broadcast_id.clone(),
                body: data,
            })
            .await
        {
            state.finish(&channels, Terminal::Fatal(e.into())).await;
            return;
        }

        let mut mailbox_open = true;
        loop {
            tokio::select! {
                received = mailbox.recv(), if mailbox_open => match received {
                    Some(received_frame) => {
                        if let Some(terminal) = state.handle_frame(received_frame).await {
                            state.finish(&channels, terminal).await;
                            return;
                        }
                    }
                    // Subscription gone; nothing more can arrive, so the
                    // timeout driver decides the outcome.
                    None => mailbox_open = false,
                },
                _ = tick.tick() => {
                    if let Some(terminal) = state.check_timeouts() {
                        state.finish(&channels, terminal).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Aggregation state owned by the driver task.
struct State {
    /// Per-host reply bodies, in arrival order. A host is present iff it
    /// acked or delivered data.
    responses: BTreeMap<String, Vec<Body>>,
    /// Hosts completion is still awaited from.
    expecting: BTreeSet<String>,
    /// Hosts whose end frame has been observed; later frames from them
    /// are discarded.
    ended: BTreeSet<String>,
    timeout: TimeoutConfig,
    start: Instant,
    last_message: Option<Instant>,
    closed: bool,
    events: mpsc::Sender<BroadcastEvent>,
}

impl State {
    fn new(
        expect: Vec<String>,
        timeout: TimeoutConfig,
        events: mpsc::Sender<BroadcastEvent>,
    ) -> Self {
        Self {
            responses: BTreeMap::new(),
            expecting: expect.into_iter().collect(),
            ended: BTreeSet::new(),
            timeout,
            start: Instant::now(),
            last_message: None,
            closed: false,
            events,
        }
    }

    /// Process one inbound frame; returns the terminal outcome if the
    /// conversation is over.
    async fn handle_frame(&mut self, received: Frame) -> Option<Terminal> {
        match received {
            Frame::Ack { host } => {
                if self.ended.contains(&host) {
                    trace!(host = %host, "Discarded ack after host end");
                    return None;
                }
                self.touch();
                // Unexpected ackers are awaited too.
                self.expecting.insert(host.clone());
                self.responses.entry(host.clone()).or_default();
                self.emit(BroadcastEvent::Ack { host }).await;
                None
            }
            Frame::Data { host, body } => {
                if self.ended.contains(&host) {
                    trace!(host = %host, "Discarded data after host end");
                    return None;
                }
                self.touch();
                self.responses
                    .entry(host.clone())
                    .or_default()
                    .push(body.clone());
                // Data without a prior ack still registers the host.
                self.expecting.insert(host.clone());
                self.emit(BroadcastEvent::Data { host, body }).await;
                None
            }
            Frame::End { host } => {
                if self.ended.contains(&host) {
                    trace!(host = %host, "Discarded duplicate end");
                    return None;
                }
                self.touch();
                self.ended.insert(host.clone());
                self.expecting.remove(&host);
                let responses = self.responses.get(&host).cloned().unwrap_or_default();
                self.emit(BroadcastEvent::HostEnd { host, responses }).await;
                if self.expecting.is_empty() {
                    Some(Terminal::Complete)
                } else {
                    None
                }
            }
            Frame::Request { .. } => {
                // Reply channels never carry requests; discard.
                trace!("Discarded request frame on reply channel");
                None
            }
        }
    }

    /// Evaluate the connect/idle windows against monotonic time.
    fn check_timeouts(&self) -> Option<Terminal> {
        let now = Instant::now();
        match self.last_message {
            None if now.duration_since(self.start) > self.timeout.connect_duration() => {
                Some(Terminal::ConnectTimeout)
            }
            Some(last) if now.duration_since(last) > self.timeout.idle_duration() => {
                Some(Terminal::IdleTimeout)
            }
            _ => None,
        }
    }

    fn touch(&mut self) {
        self.last_message = Some(Instant::now());
    }

    async fn emit(&self, event: BroadcastEvent) {
        // A dropped consumer is not an error; the conversation just goes
        // unobserved.
        let _ = self.events.send(event).await;
    }

    /// Tear down, then emit the terminal event. Idempotent.
    async fn finish(&mut self, channels: &[Arc<dyn Channel>], terminal: Terminal) {
        if self.closed {
            return;
        }
        self.closed = true;

        // Teardown runs before the terminal emission so no late frame can
        // mutate state in between.
        for channel in channels {
            if let Err(e) = channel.close().await {
                warn!(channel = %channel.name(), error = %e, "Failed to close channel");
            }
        }

        let expecting: Vec<String> = self.expecting.iter().cloned().collect();
        let responses = std::mem::take(&mut self.responses);

        let event = match terminal {
            Terminal::Complete => BroadcastEvent::End {
                responses,
                expecting: Vec::new(),
            },
            Terminal::ConnectTimeout if responses.is_empty() => BroadcastEvent::Error {
                error: BroadcastError::ConnectTimeout(self.timeout.connect),
                expecting,
            },
            Terminal::IdleTimeout if responses.is_empty() => BroadcastEvent::Error {
                error: BroadcastError::IdleTimeout(self.timeout.idle),
                expecting,
            },
            // A timed-out conversation that heard anything at all still
            // ends normally, carrying the hosts yet to complete.
            Terminal::ConnectTimeout | Terminal::IdleTimeout => BroadcastEvent::End {
                responses,
                expecting,
            },
            Terminal::Fatal(error) => BroadcastEvent::Error { error, expecting },
        };
        self.emit(event).await;
    }
}
