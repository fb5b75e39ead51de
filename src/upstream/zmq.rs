//! ZeroMQ SUB transport for the upstream feed.
//!
//! A `zeromq` SUB socket neither reports a refused connection (it retries
//! internally) nor reconnects after its publisher goes away. Both are surfaced
//! here as `UpstreamError`s so the subscriber loop's own backoff governs every
//! retry.

use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use zeromq::{Socket, SocketEvent, SocketRecv, SubSocket, ZmqMessage};

use crate::config::UpstreamConfig;
use crate::relay::Message;
use crate::upstream::{Connector, Subscription, UpstreamError};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Connects SUB sockets subscribed to every topic.
#[derive(Debug, Clone, Copy)]
pub struct ZmqConnector {
    connect_timeout: Duration,
}

impl ZmqConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new().with_connect_timeout(Duration::from_millis(config.connect_timeout_ms))
    }

    /// Give up on a connection attempt after `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for ZmqConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for ZmqConnector {
    type Subscription = ZmqSubscription;

    async fn connect(&self, endpoint: &str) -> Result<ZmqSubscription, UpstreamError> {
        let connect_error = |reason: String| UpstreamError::Connect {
            endpoint: endpoint.to_string(),
            reason,
        };

        let mut socket = SubSocket::new();
        let events = socket.monitor().boxed();

        match tokio::time::timeout(self.connect_timeout, socket.connect(endpoint)).await {
            Ok(result) => result.map_err(|e| connect_error(e.to_string()))?,
            Err(_) => {
                return Err(connect_error(format!(
                    "no publisher after {:?}",
                    self.connect_timeout
                )))
            }
        }
        // The empty prefix matches every topic
        socket
            .subscribe("")
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        tracing::debug!(endpoint = %endpoint, "SUB socket connected");
        Ok(ZmqSubscription { socket, events })
    }
}

/// A connected SUB socket and its event monitor.
pub struct ZmqSubscription {
    socket: SubSocket,
    events: BoxStream<'static, SocketEvent>,
}

impl Subscription for ZmqSubscription {
    async fn recv(&mut self) -> Result<Message, UpstreamError> {
        loop {
            tokio::select! {
                frame = self.socket.recv() => {
                    let frame = frame.map_err(|e| UpstreamError::Receive(e.to_string()))?;
                    return decode(frame);
                }
                event = self.events.next() => match event {
                    Some(SocketEvent::Disconnected(_)) => {
                        return Err(UpstreamError::Receive("publisher disconnected".into()));
                    }
                    Some(event) => {
                        tracing::trace!(event = ?event, "SUB socket event");
                    }
                    None => {
                        return Err(UpstreamError::Receive("socket monitor closed".into()));
                    }
                },
            }
        }
    }
}

/// Join the frames of one ZeroMQ message into a text payload.
fn decode(frame: ZmqMessage) -> Result<Message, UpstreamError> {
    let bytes: Vec<u8> = frame.into_vec().into_iter().flatten().collect();
    String::from_utf8(bytes)
        .map(Message::from)
        .map_err(|e| UpstreamError::Decode(e.to_string()))
}
