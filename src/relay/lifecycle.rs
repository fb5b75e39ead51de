//! Per-connection lifecycle: accept, watch for disconnect, tear down.
//!
//! # Responsibilities
//! - Register a connection as soon as its handshake completes
//! - Drain the connection's outbound queue onto the socket
//! - Read from the socket only to notice the client going away
//! - Deregister exactly once, whichever side notices first
//!
//! # Connection States
//! ```text
//! accept → Registered → { read loop | write loop | shutdown } ends → Deregistered → Closed
//! ```

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::config::BroadcastConfig;
use crate::lifecycle::ShutdownSignal;
use crate::relay::connection::{Connection, ConnectionId, Message, ReadOutcome};
use crate::relay::registry::{ConnectionRegistry, RelayError};

/// Why a connection was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The read side saw a disconnect or transport error.
    Read(ReadOutcome),
    /// Writing to the socket failed or timed out.
    Write(String),
    /// The process is shutting down.
    Shutdown,
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Read(ReadOutcome::Disconnected) => f.write_str("client disconnected"),
            CloseReason::Read(ReadOutcome::Error(e)) => write!(f, "read error: {}", e),
            CloseReason::Read(ReadOutcome::Payload(_)) => f.write_str("read loop ended"),
            CloseReason::Write(e) => write!(f, "write error: {}", e),
            CloseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Accepts client connections and owns their teardown.
#[derive(Debug)]
pub struct ConnectionLifecycleHandler {
    registry: Arc<ConnectionRegistry>,
    queue_capacity: usize,
    send_timeout: Duration,
}

impl ConnectionLifecycleHandler {
    pub fn new(registry: Arc<ConnectionRegistry>, config: &BroadcastConfig) -> Self {
        Self {
            registry,
            queue_capacity: config.queue_capacity,
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Create and register a connection for a freshly upgraded socket.
    ///
    /// Returns the handle and the outbound queue the writer must drain.
    pub fn accept(&self) -> Result<(Connection, mpsc::Receiver<Message>), RelayError> {
        let (conn, outbound) = Connection::open(self.queue_capacity);
        self.registry.register(conn.clone())?;
        tracing::info!(
            connection_id = %conn.id(),
            clients = self.registry.len(),
            "Client connected"
        );
        Ok((conn, outbound))
    }

    /// Read until the client goes away, then deregister it.
    pub async fn read_loop<S, E>(&self, conn: &Connection, frames: &mut S) -> ReadOutcome
    where
        S: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: Display,
    {
        let outcome = watch_frames(conn.id(), frames).await;
        self.release(conn, &CloseReason::Read(outcome.clone()));
        outcome
    }

    /// Forward queued messages to the socket until the queue closes or a write fails.
    ///
    /// Each write is bounded by the configured send timeout.
    pub async fn write_loop<K>(
        &self,
        conn: ConnectionId,
        mut outbound: mpsc::Receiver<Message>,
        sink: &mut K,
    ) -> Result<(), String>
    where
        K: Sink<WsMessage> + Unpin,
        K::Error: Display,
    {
        while let Some(message) = outbound.recv().await {
            let frame = WsMessage::Text(message.into_frame());
            match tokio::time::timeout(self.send_timeout, sink.send(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e.to_string()),
                Err(_) => {
                    tracing::warn!(
                        connection_id = %conn,
                        timeout = ?self.send_timeout,
                        "Send to client timed out"
                    );
                    return Err(format!("send timed out after {:?}", self.send_timeout));
                }
            }
        }
        Ok(())
    }

    /// Run a connection from handshake to teardown.
    ///
    /// The writer and the read loop run concurrently; the first to finish, or
    /// shutdown, ends the connection.
    pub async fn serve<S, E>(&self, socket: S, mut shutdown: ShutdownSignal)
    where
        S: Stream<Item = Result<WsMessage, E>> + Sink<WsMessage, Error = E> + Send,
        E: Display + Send,
    {
        let (conn, outbound) = match self.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(error = %e, "Failed to register connection");
                return;
            }
        };
        let (mut sink, mut stream) = socket.split();

        let reason = tokio::select! {
            outcome = self.read_loop(&conn, &mut stream) => CloseReason::Read(outcome),
            written = self.write_loop(conn.id(), outbound, &mut sink) => match written {
                Ok(()) => CloseReason::Write("outbound queue closed".to_string()),
                Err(e) => CloseReason::Write(e),
            },
            _ = shutdown.recv() => CloseReason::Shutdown,
        };

        self.release(&conn, &reason);

        if !matches!(reason, CloseReason::Read(ReadOutcome::Disconnected)) {
            let frame = WsMessage::Close(Some(CloseFrame {
                code: if reason == CloseReason::Shutdown {
                    close_code::AWAY
                } else {
                    close_code::ERROR
                },
                reason: reason.to_string().into(),
            }));
            let _ = tokio::time::timeout(self.send_timeout, sink.send(frame)).await;
        }
        let _ = tokio::time::timeout(self.send_timeout, sink.close()).await;
    }

    fn release(&self, conn: &Connection, reason: &CloseReason) {
        if self.registry.deregister(conn.id()) {
            tracing::info!(
                connection_id = %conn.id(),
                reason = %reason,
                clients = self.registry.len(),
                "Client disconnected"
            );
        }
    }
}

async fn watch_frames<S, E>(conn: ConnectionId, frames: &mut S) -> ReadOutcome
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    loop {
        match classify(frames.next().await) {
            ReadOutcome::Payload(payload) => {
                tracing::trace!(connection_id = %conn, len = payload.len(), "Ignoring client frame");
            }
            outcome => return outcome,
        }
    }
}

fn classify<E: Display>(frame: Option<Result<WsMessage, E>>) -> ReadOutcome {
    match frame {
        None | Some(Ok(WsMessage::Close(_))) => ReadOutcome::Disconnected,
        Some(Ok(WsMessage::Text(text))) => ReadOutcome::Payload(text.as_str().to_owned()),
        Some(Ok(WsMessage::Binary(bytes))) => {
            ReadOutcome::Payload(String::from_utf8_lossy(&bytes).into_owned())
        }
        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => ReadOutcome::Payload(String::new()),
        Some(Err(e)) => ReadOutcome::Error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use futures::channel::mpsc as mpsc_unbounded;
    use futures_util::stream;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn handler() -> ConnectionLifecycleHandler {
        ConnectionLifecycleHandler::new(
            Arc::new(ConnectionRegistry::new()),
            &BroadcastConfig::default(),
        )
    }

    #[test]
    fn classify_frames() {
        let text: Option<Result<WsMessage, String>> = Some(Ok(WsMessage::Text("hb".into())));
        assert_eq!(classify(text), ReadOutcome::Payload("hb".into()));
        assert_eq!(classify::<String>(None), ReadOutcome::Disconnected);
        assert_eq!(
            classify::<String>(Some(Ok(WsMessage::Close(None)))),
            ReadOutcome::Disconnected
        );
        assert_eq!(
            classify(Some(Err("reset by peer".to_string()))),
            ReadOutcome::Error("reset by peer".into())
        );
    }

    #[tokio::test]
    async fn accept_registers() {
        let handler = handler();
        let (conn, _outbound) = handler.accept().unwrap();
        assert!(handler.registry().contains(conn.id()));
    }

    #[tokio::test]
    async fn read_loop_ignores_payloads_until_close() {
        let handler = handler();
        let (conn, _outbound) = handler.accept().unwrap();

        let mut frames = stream::iter(vec![
            Ok::<_, String>(WsMessage::Text("heartbeat".into())),
            Ok(WsMessage::Ping(Default::default())),
            Ok(WsMessage::Close(None)),
            Ok(WsMessage::Text("never read".into())),
        ]);

        let outcome = handler.read_loop(&conn, &mut frames).await;
        assert_eq!(outcome, ReadOutcome::Disconnected);
        assert!(handler.registry().is_empty());
        // The frame after Close is left unread
        assert!(frames.next().await.is_some());
    }

    #[tokio::test]
    async fn read_error_deregisters_once() {
        let handler = handler();
        let (conn, _outbound) = handler.accept().unwrap();
        let (other, _other_outbound) = handler.accept().unwrap();

        let mut frames = stream::iter(vec![Err::<WsMessage, _>("connection reset".to_string())]);
        let outcome = handler.read_loop(&conn, &mut frames).await;
        assert_eq!(outcome, ReadOutcome::Error("connection reset".into()));

        // Second disconnect signal for the same connection is harmless
        let mut again = stream::iter(Vec::<Result<WsMessage, String>>::new());
        assert_eq!(handler.read_loop(&conn, &mut again).await, ReadOutcome::Disconnected);

        assert_eq!(handler.registry().snapshot().ids(), vec![other.id()]);
    }

    #[tokio::test]
    async fn write_loop_forwards_in_order() {
        let handler = handler();
        let (conn, outbound) = handler.accept().unwrap();
        conn.send("m1".into()).unwrap();
        conn.send("m2".into()).unwrap();
        // Dropping every sender closes the queue once it is drained
        handler.registry().deregister(conn.id());
        drop(conn);

        let (mut tx, rx) = mpsc_unbounded::unbounded::<WsMessage>();
        handler
            .write_loop(ConnectionId::next(), outbound, &mut tx)
            .await
            .unwrap();
        drop(tx);

        let texts: Vec<String> = rx
            .filter_map(|frame| async move {
                match frame {
                    WsMessage::Text(text) => Some(text.as_str().to_owned()),
                    _ => None,
                }
            })
            .collect()
            .await;
        assert_eq!(texts, vec!["m1", "m2"]);
    }

    /// In-memory WebSocket: frames pushed into `incoming` are read by the
    /// relay, frames the relay sends come out of `outgoing`.
    struct MemorySocket {
        incoming: mpsc_unbounded::UnboundedReceiver<Result<WsMessage, String>>,
        outgoing: mpsc_unbounded::UnboundedSender<WsMessage>,
    }

    type SocketEnds = (
        MemorySocket,
        mpsc_unbounded::UnboundedSender<Result<WsMessage, String>>,
        mpsc_unbounded::UnboundedReceiver<WsMessage>,
    );

    fn memory_socket() -> SocketEnds {
        let (client_tx, incoming) = mpsc_unbounded::unbounded();
        let (outgoing, client_rx) = mpsc_unbounded::unbounded();
        (MemorySocket { incoming, outgoing }, client_tx, client_rx)
    }

    impl Stream for MemorySocket {
        type Item = Result<WsMessage, String>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.incoming.poll_next_unpin(cx)
        }
    }

    impl Sink<WsMessage> for MemorySocket {
        type Error = String;

        fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            self.outgoing.poll_ready_unpin(cx).map_err(|e| e.to_string())
        }

        fn start_send(mut self: Pin<&mut Self>, item: WsMessage) -> Result<(), String> {
            self.outgoing.start_send_unpin(item).map_err(|e| e.to_string())
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            self.outgoing.poll_flush_unpin(cx).map_err(|e| e.to_string())
        }

        fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            self.outgoing.poll_close_unpin(cx).map_err(|e| e.to_string())
        }
    }

    async fn wait_registered(handler: &ConnectionLifecycleHandler) -> Connection {
        for _ in 0..1000 {
            if let Some(conn) = handler.registry().snapshot().first() {
                return conn.clone();
            }
            tokio::task::yield_now().await;
        }
        panic!("connection never registered");
    }

    #[tokio::test]
    async fn serve_relays_until_client_closes() {
        let handler = Arc::new(handler());
        let shutdown = Shutdown::new();
        let (socket, client_tx, mut client_rx) = memory_socket();

        let serving = tokio::spawn({
            let handler = Arc::clone(&handler);
            let signal = shutdown.subscribe();
            async move { handler.serve(socket, signal).await }
        });

        let conn = wait_registered(&handler).await;
        conn.send("price:100".into()).unwrap();
        match client_rx.next().await {
            Some(WsMessage::Text(text)) => assert_eq!(text.as_str(), "price:100"),
            other => panic!("expected text frame, got {:?}", other),
        }

        client_tx.unbounded_send(Ok(WsMessage::Close(None))).unwrap();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .expect("serve did not return")
            .unwrap();

        assert!(handler.registry().is_empty());
        // No close frame is echoed to a client that already left
        assert!(client_rx.next().await.is_none());
    }

    #[tokio::test]
    async fn serve_closes_with_away_on_shutdown() {
        let handler = Arc::new(handler());
        let shutdown = Shutdown::new();
        let (socket, _client_tx, mut client_rx) = memory_socket();

        let serving = tokio::spawn({
            let handler = Arc::clone(&handler);
            let signal = shutdown.subscribe();
            async move { handler.serve(socket, signal).await }
        });

        wait_registered(&handler).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .expect("serve did not return")
            .unwrap();

        assert!(handler.registry().is_empty());
        match client_rx.next().await {
            Some(WsMessage::Close(Some(frame))) => assert_eq!(frame.code, close_code::AWAY),
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_socket_times_out() {
        let handler = handler();
        let (conn, outbound) = handler.accept().unwrap();
        conn.send("m1".into()).unwrap();

        let mut stalled = Box::pin(futures_util::sink::unfold((), |_, _frame: WsMessage| async {
            std::future::pending::<Result<(), String>>().await
        }));

        let result = handler.write_loop(conn.id(), outbound, &mut stalled).await;
        assert!(result.unwrap_err().contains("timed out"));
    }
}
