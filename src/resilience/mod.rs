//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream failure:
//!     → backoff.rs (delay before the next connect attempt)
//!     → subscriber loop reconnects
//! ```
//!
//! # Design Decisions
//! - Fixed delay by default; growth and jitter are opt-in
//! - The delay function is a plain value so tests can swap it out

pub mod backoff;

pub use backoff::BackoffPolicy;
