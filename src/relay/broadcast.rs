//! Fan-out of upstream messages to every registered connection.

use std::sync::Arc;

use crate::observability::metrics;
use crate::relay::connection::{Message, SendError};
use crate::relay::registry::ConnectionRegistry;

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections in the snapshot.
    pub recipients: usize,
    /// Connections the message was enqueued for.
    pub delivered: usize,
    /// Connections that could not take the message.
    pub failed: usize,
}

/// Delivers messages to a snapshot of the registry.
///
/// Never deregisters connections; that is left to the connection's own
/// lifecycle handler, which sees the disconnect on its read side.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send `message` to every connection registered right now.
    ///
    /// Each send is a non-blocking enqueue, so a stalled client cannot hold up
    /// the others. Failures are logged and counted, never returned.
    pub fn broadcast(&self, message: &Message) -> BroadcastReport {
        let snapshot = self.registry.snapshot();
        let mut report = BroadcastReport {
            recipients: snapshot.len(),
            ..Default::default()
        };

        for conn in &snapshot {
            match conn.send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    metrics::record_send_failure(e.as_str());
                    match e {
                        SendError::QueueFull => tracing::warn!(
                            connection_id = %conn.id(),
                            message_len = message.len(),
                            "Client not keeping up, dropping message"
                        ),
                        SendError::Closed => tracing::debug!(
                            connection_id = %conn.id(),
                            "Client closed before broadcast reached it"
                        ),
                    }
                }
            }
        }

        metrics::record_broadcast(report.delivered);
        tracing::trace!(
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast complete"
        );
        report
    }
}
