//! Upstream feed subsystem.
//!
//! # Data Flow
//! ```text
//! engine PUB socket
//!     → zmq.rs (SUB socket, empty filter)
//!     → subscriber.rs (receive loop, reconnect with backoff)
//!     → relay::Broadcaster
//! ```
//!
//! # Design Decisions
//! - The transport sits behind the `Connector` trait so the loop can be
//!   driven by an in-process feed in tests
//! - Every upstream failure is transient; only shutdown stops the loop

use std::future::Future;

use thiserror::Error;

use crate::relay::Message;

pub mod subscriber;
pub mod zmq;

pub use subscriber::{SubscriberLoop, SubscriberState};
pub use zmq::ZmqConnector;

/// Upstream failures. All of them are retried.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("message is not valid text: {0}")]
    Decode(String),

    #[error("no message for {0} seconds")]
    IdleTimeout(u64),
}

impl UpstreamError {
    /// Label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Connect { .. } => "connect",
            UpstreamError::Receive(_) => "receive",
            UpstreamError::Decode(_) => "decode",
            UpstreamError::IdleTimeout(_) => "idle_timeout",
        }
    }

    /// Whether the subscription is still usable after this error.
    pub fn keeps_subscription(&self) -> bool {
        matches!(self, UpstreamError::Decode(_))
    }
}

/// Opens subscriptions to the upstream feed.
pub trait Connector: Send + Sync {
    type Subscription: Subscription + 'static;

    /// Open an unfiltered subscription to `endpoint`.
    fn connect(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<Self::Subscription, UpstreamError>> + Send;
}

/// A live subscription. Dropping it releases the upstream connection.
pub trait Subscription: Send {
    /// Wait for the next message.
    fn recv(&mut self) -> impl Future<Output = Result<Message, UpstreamError>> + Send;
}
