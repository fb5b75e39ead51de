//! Registry of live client connections.
//!
//! All operations take a short-lived `std::sync::Mutex`. The lock is never
//! held across an `.await`; broadcasting works on a [`Snapshot`] taken under
//! the lock and iterated after it is released.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::observability::metrics;
use crate::relay::connection::{Connection, ConnectionId};

/// Internal invariant violations in the relay core.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
}

/// Insertion-ordered set of active connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<Vec<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Connection>> {
        // Every critical section leaves the Vec consistent, so a poisoned lock is still usable.
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection. Registering the same connection twice is a bug in the caller.
    pub fn register(&self, conn: Connection) -> Result<(), RelayError> {
        let count = {
            let mut connections = self.lock();
            if connections.iter().any(|c| c.id() == conn.id()) {
                tracing::error!(connection_id = %conn.id(), "Connection registered twice");
                return Err(RelayError::DuplicateConnection(conn.id()));
            }
            connections.push(conn);
            connections.len()
        };
        metrics::record_active_connections(count);
        Ok(())
    }

    /// Remove a connection if present. Returns whether anything was removed.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let (removed, count) = {
            let mut connections = self.lock();
            match connections.iter().position(|c| c.id() == id) {
                Some(index) => {
                    connections.remove(index);
                    (true, connections.len())
                }
                None => (false, connections.len()),
            }
        };
        if removed {
            metrics::record_active_connections(count);
        } else {
            tracing::trace!(connection_id = %id, "Deregister of unknown connection ignored");
        }
        removed
    }

    /// Point-in-time copy of the registered connections, in registration order.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.lock().as_slice().into())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().iter().any(|c| c.id() == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Immutable copy of the registry contents.
#[derive(Debug, Clone)]
pub struct Snapshot(Arc<[Connection]>);

impl Snapshot {
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.0.iter().map(Connection::id).collect()
    }
}

impl Deref for Snapshot {
    type Target = [Connection];

    fn deref(&self) -> &[Connection] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Connection;
    type IntoIter = std::slice::Iter<'a, Connection>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
