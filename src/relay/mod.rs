//! Relay core: connection registry, broadcast fan-out, connection lifecycle.
//!
//! # Data Flow
//! ```text
//! upstream::SubscriberLoop
//!     → broadcast.rs (snapshot registry, enqueue on every connection)
//!     → connection.rs (bounded per-connection outbound queue)
//!     → lifecycle.rs writer (queue → socket)
//!
//! Client side:
//!     WebSocket upgrade → lifecycle.rs accept (register)
//!     → read loop (disconnect detection) → deregister
//! ```
//!
//! # Design Decisions
//! - Only the lifecycle handler removes connections; the broadcaster just
//!   counts failed sends, so a dead connection may see one extra broadcast
//! - Broadcast never waits on a client: queues are bounded and full queues drop
//! - The registry lock is never held across an await point

pub mod broadcast;
pub mod connection;
pub mod lifecycle;
pub mod registry;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use connection::{Connection, ConnectionId, Message, ReadOutcome, SendError};
pub use lifecycle::{CloseReason, ConnectionLifecycleHandler};
pub use registry::{ConnectionRegistry, RelayError, Snapshot};
