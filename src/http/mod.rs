//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tracing layer)
//!     → websocket.rs (upgrade on the configured path)
//!     → relay::ConnectionLifecycleHandler
//!
//! GET /status → JSON client count and upstream state
//! GET /health → liveness probe
//! ```

pub mod server;
pub mod websocket;

pub use server::{AppState, RelayServer, RelayStatus};
