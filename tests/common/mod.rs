//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use feed_relay::config::RelayConfig;
use feed_relay::relay::{ConnectionRegistry, Message};
use feed_relay::upstream::{Connector, Subscription, SubscriberState, UpstreamError};
use feed_relay::{RelayServer, Shutdown};
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum FeedEvent {
    Message(String),
    #[allow(dead_code)]
    Drop,
}

/// In-process upstream feed shared by every subscription the relay opens.
pub struct ChannelConnector {
    feed: Arc<Mutex<mpsc::UnboundedReceiver<FeedEvent>>>,
    connects: Arc<AtomicU32>,
}

pub struct ChannelSubscription {
    feed: Arc<Mutex<mpsc::UnboundedReceiver<FeedEvent>>>,
}

impl Connector for ChannelConnector {
    type Subscription = ChannelSubscription;

    async fn connect(&self, _endpoint: &str) -> Result<ChannelSubscription, UpstreamError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ChannelSubscription {
            feed: Arc::clone(&self.feed),
        })
    }
}

impl Subscription for ChannelSubscription {
    async fn recv(&mut self) -> Result<Message, UpstreamError> {
        match self.feed.lock().await.recv().await {
            Some(FeedEvent::Message(text)) => Ok(Message::from(text)),
            Some(FeedEvent::Drop) => Err(UpstreamError::Receive("publisher restarted".into())),
            None => std::future::pending().await,
        }
    }
}

/// Test-side handle that publishes into a [`ChannelConnector`].
#[derive(Clone)]
pub struct FeedHandle {
    tx: mpsc::UnboundedSender<FeedEvent>,
    #[allow(dead_code)]
    connects: Arc<AtomicU32>,
}

impl FeedHandle {
    pub fn publish(&self, text: impl Into<String>) {
        self.tx.send(FeedEvent::Message(text.into())).unwrap();
    }

    /// Make the current subscription fail as if the publisher went away.
    #[allow(dead_code)]
    pub fn drop_connection(&self) {
        self.tx.send(FeedEvent::Drop).unwrap();
    }

    #[allow(dead_code)]
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

pub fn channel_feed() -> (ChannelConnector, FeedHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connects = Arc::new(AtomicU32::new(0));
    (
        ChannelConnector {
            feed: Arc::new(Mutex::new(rx)),
            connects: Arc::clone(&connects),
        },
        FeedHandle { tx, connects },
    )
}

/// A relay running on an ephemeral port.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    pub upstream_state: watch::Receiver<SubscriberState>,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), std::io::Error>>,
}

impl TestRelay {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    #[allow(dead_code)]
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a relay fed by `connector` and wait until it is subscribed.
pub async fn start_relay(mut config: RelayConfig, connector: ChannelConnector) -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    config.listener.bind_address = addr.to_string();

    let shutdown = Shutdown::new();
    let server = RelayServer::with_connector(config, connector, shutdown.clone())
        .with_backoff(|_| Duration::from_millis(10));
    let registry = Arc::clone(server.registry());
    let mut upstream_state = server.upstream_state();
    let task = tokio::spawn(server.run(listener));

    tokio::time::timeout(
        Duration::from_secs(5),
        upstream_state.wait_for(|s| *s == SubscriberState::Receiving),
    )
    .await
    .expect("relay never subscribed")
    .unwrap();

    TestRelay {
        addr,
        registry,
        upstream_state,
        shutdown,
        task,
    }
}

pub async fn connect_client(relay: &TestRelay) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(relay.ws_url())
        .await
        .expect("WebSocket handshake failed");
    client
}

/// Wait until the registry holds exactly `count` connections.
pub async fn wait_for_clients(registry: &ConnectionRegistry, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while registry.len() != count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} clients, registry has {}",
            count,
            registry.len()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Next text frame from the relay, skipping control frames.
pub async fn next_text(client: &mut Client) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection ended")
            .expect("read failed");
        match frame {
            WsMessage::Text(text) => return text.as_str().to_owned(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
