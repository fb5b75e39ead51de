//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the feed relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Client-facing listener (bind address, WebSocket path).
    pub listener: ListenerConfig,

    /// Upstream pub/sub feed and reconnect policy.
    pub upstream: UpstreamConfig,

    /// Per-connection delivery settings.
    pub broadcast: BroadcastConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8001").
    pub bind_address: String,

    /// Path that accepts WebSocket upgrades.
    pub ws_path: String,

    /// Maximum concurrent client connections (0 = unbounded).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8001".to_string(),
            ws_path: "/ws".to_string(),
            max_connections: 0,
        }
    }
}

/// Upstream feed configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Publisher endpoint (e.g., "tcp://engine:5555").
    pub endpoint: String,

    /// Delay before the first reconnect attempt in milliseconds.
    pub backoff_base_ms: u64,

    /// Upper bound on the reconnect delay in milliseconds.
    pub backoff_max_ms: u64,

    /// Growth factor between consecutive attempts (1.0 = fixed delay).
    pub backoff_factor: f64,

    /// Random extra delay as a fraction of the computed delay (0.0 - 1.0).
    pub jitter_ratio: f64,

    /// Reconnect if the feed is silent this long (0 = never).
    ///
    /// A SUB socket does not reconnect on its own once its publisher
    /// restarts, so this stays on unless the feed can be quiet for long.
    pub idle_timeout_secs: u64,

    /// Deadline for opening the SUB connection in milliseconds. A refused
    /// connection counts as a failed attempt once this elapses.
    pub connect_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:5555".to_string(),
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            backoff_factor: 1.0,
            jitter_ratio: 0.0,
            idle_timeout_secs: 10,
            connect_timeout_ms: 1000,
        }
    }
}

/// Per-connection delivery configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Messages buffered per client before new ones are dropped.
    pub queue_capacity: usize,

    /// Deadline for a single write to a client socket in milliseconds.
    pub send_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            send_timeout_ms: 5000,
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for tasks to finish after the signal.
    pub grace_period_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
