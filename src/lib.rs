//! Real-time feed relay library.
//!
//! Subscribes to an upstream ZeroMQ publisher and fans every message out to
//! all connected WebSocket clients.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod relay;
pub mod resilience;
pub mod upstream;

pub use config::RelayConfig;
pub use http::RelayServer;
pub use lifecycle::Shutdown;
