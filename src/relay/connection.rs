//! Connection handles and per-connection outcomes.
//!
//! # Responsibilities
//! - Allocate unique connection IDs for tracing and registry identity
//! - Carry the sending half of a connection's bounded outbound queue
//! - Classify per-connection reads into an explicit tagged result

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Utf8Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough, we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An immutable text payload received from upstream.
///
/// Cloning shares the underlying buffer, so fanning one message out to many
/// connections does not copy it. The buffer is the WebSocket text payload
/// itself, so turning it into a frame is free as well.
#[derive(Debug, Clone)]
pub struct Message(Utf8Bytes);

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self(Utf8Bytes::from(text.into()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Payload for an outgoing text frame, sharing this message's buffer.
    pub fn into_frame(self) -> Utf8Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Message {}

impl Hash for Message {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to hand a message to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The outbound queue is full; the client is not keeping up.
    #[error("outbound queue full")]
    QueueFull,

    /// The connection's writer has gone away.
    #[error("connection closed")]
    Closed,
}

impl SendError {
    /// Label used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SendError::QueueFull => "queue_full",
            SendError::Closed => "closed",
        }
    }
}

/// Result of one read from a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The client sent something. Content is irrelevant to the relay.
    Payload(String),
    /// The client closed the connection or the stream ended.
    Disconnected,
    /// The transport failed.
    Error(String),
}

impl ReadOutcome {
    /// Whether the read loop should stop after this outcome.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReadOutcome::Payload(_))
    }
}

/// Handle to one live client connection.
///
/// Identity is the [`ConnectionId`]; clones refer to the same connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<Message>,
}

impl Connection {
    /// Create a connection with a fresh ID and an outbound queue of the given capacity.
    ///
    /// Returns the handle and the receiving half, which the connection's writer drains.
    pub fn open(queue_capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        (Self { id: ConnectionId::next(), outbound: tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue a message without waiting.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}
