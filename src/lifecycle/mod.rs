//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → subscriber loop stops → connection tasks close sockets
//!     → HTTP server stops accepting → exit after grace period
//! ```
//!
//! # Design Decisions
//! - One latched signal shared by every long-running task
//! - Shutdown has timeout: forced exit after deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
