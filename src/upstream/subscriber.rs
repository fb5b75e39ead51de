//! Upstream subscriber loop.
//!
//! # Responsibilities
//! - Keep one subscription to the upstream feed open
//! - Forward every received message to the broadcaster, in order
//! - Reconnect after failures, waiting a backoff delay first
//!
//! # States
//! ```text
//! Disconnected → Connecting → Receiving ─(error)→ Backoff → Connecting → …
//!                     └──────(connect error)───────┘
//! any state ─(shutdown)→ Stopped
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::UpstreamConfig;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::relay::{Broadcaster, Message};
use crate::resilience::BackoffPolicy;
use crate::upstream::{Connector, Subscription, UpstreamError};

/// Where the subscriber loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connecting,
    Receiving,
    Backoff,
    Stopped,
}

impl SubscriberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberState::Disconnected => "disconnected",
            SubscriberState::Connecting => "connecting",
            SubscriberState::Receiving => "receiving",
            SubscriberState::Backoff => "backoff",
            SubscriberState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// How a receive session ended.
enum SessionEnd {
    Shutdown,
    Failed(UpstreamError),
}

/// Receives from the upstream feed and forwards to the broadcaster until shutdown.
pub struct SubscriberLoop<C: Connector> {
    connector: C,
    endpoint: String,
    broadcaster: Broadcaster,
    backoff: BackoffFn,
    idle_timeout: Option<Duration>,
    state: watch::Sender<SubscriberState>,
}

impl<C: Connector> SubscriberLoop<C> {
    pub fn new(connector: C, endpoint: impl Into<String>, broadcaster: Broadcaster) -> Self {
        let policy = BackoffPolicy::default();
        let (state, _) = watch::channel(SubscriberState::Disconnected);
        Self {
            connector,
            endpoint: endpoint.into(),
            broadcaster,
            backoff: Arc::new(move |attempt| policy.delay(attempt)),
            idle_timeout: None,
            state,
        }
    }

    /// Build a loop from the `upstream` config section.
    pub fn from_config(connector: C, config: &UpstreamConfig, broadcaster: Broadcaster) -> Self {
        let policy = BackoffPolicy::from_config(config);
        let idle_timeout = (config.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(config.idle_timeout_secs));
        Self::new(connector, config.endpoint.clone(), broadcaster)
            .with_backoff(move |attempt| policy.delay(attempt))
            .with_idle_timeout(idle_timeout)
    }

    /// Replace the delay function. It receives the 1-based retry attempt.
    pub fn with_backoff<F>(mut self, backoff: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Treat silence longer than `timeout` as a dead upstream.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SubscriberState) {
        self.state.send_replace(state);
    }

    /// Run until `shutdown` fires.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        tracing::info!(endpoint = %self.endpoint, "Subscriber loop started");
        let mut attempt: u32 = 0;

        loop {
            self.set_state(SubscriberState::Connecting);
            let connected = tokio::select! {
                _ = shutdown.recv() => break,
                result = self.connector.connect(&self.endpoint) => result,
            };

            let error = match connected {
                Ok(mut subscription) => {
                    if attempt > 0 {
                        metrics::record_upstream_reconnect();
                    }
                    attempt = 0;
                    self.set_state(SubscriberState::Receiving);
                    tracing::info!(endpoint = %self.endpoint, "Subscribed to upstream feed");

                    match self.receive(&mut subscription, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Failed(e) => e,
                    }
                    // subscription dropped here, closing the socket
                }
                Err(e) => e,
            };

            metrics::record_upstream_error(error.kind());
            attempt = attempt.saturating_add(1);
            let delay = (self.backoff)(attempt);
            self.set_state(SubscriberState::Backoff);
            tracing::warn!(
                endpoint = %self.endpoint,
                error = %error,
                attempt,
                delay = ?delay,
                "Upstream unavailable, retrying"
            );

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(SubscriberState::Stopped);
        tracing::info!(endpoint = %self.endpoint, "Subscriber loop stopped");
    }

    async fn receive(
        &self,
        subscription: &mut C::Subscription,
        shutdown: &mut ShutdownSignal,
    ) -> SessionEnd {
        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => return SessionEnd::Shutdown,
                result = self.next_message(subscription) => result,
            };

            match received {
                Ok(message) => {
                    metrics::record_message_received();
                    self.broadcaster.broadcast(&message);
                }
                Err(e) if e.keeps_subscription() => {
                    metrics::record_upstream_error(e.kind());
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "Skipping upstream message");
                }
                Err(e) => return SessionEnd::Failed(e),
            }
        }
    }

    async fn next_message(
        &self,
        subscription: &mut C::Subscription,
    ) -> Result<Message, UpstreamError> {
        match self.idle_timeout {
            Some(timeout) => tokio::time::timeout(timeout, subscription.recv())
                .await
                .unwrap_or_else(|_| Err(UpstreamError::IdleTimeout(timeout.as_secs()))),
            None => subscription.recv().await,
        }
    }
}
