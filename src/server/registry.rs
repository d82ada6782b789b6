//! Shared lookup tables for live connections.
//!
//! Two indices live behind one lock so a reader never sees a username that
//! points at a connection the descriptor index no longer holds.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::server::connection::{ConnId, Connection};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no live connection with id {0}")]
    UnknownConnection(ConnId),
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<ConnId, Arc<Connection>>,
    by_user: HashMap<String, ConnId>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Indices>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a freshly accepted connection. A stale entry under the same id is
    /// replaced and returned.
    pub fn insert(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write();
        let previous = inner.by_id.insert(conn.id(), conn);
        if let Some(old) = &previous {
            unlink_username(&mut inner, old);
        }
        previous
    }

    pub fn get(&self, id: ConnId) -> Option<Arc<Connection>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.inner.read().by_id.contains_key(&id)
    }

    /// Marks `id` as a WebSocket client named `username`.
    ///
    /// A username already bound elsewhere now resolves to `id`; the earlier
    /// connection stays registered under its descriptor.
    pub fn bind_username(&self, id: ConnId, username: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let conn = inner
            .by_id
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnknownConnection(id))?;

        unlink_username(&mut inner, &conn);
        conn.become_websocket(username);

        if let Some(displaced) = inner.by_user.insert(username.to_string(), id) {
            if displaced != id {
                tracing::debug!(username, from = displaced.0, to = id.0, "Username rebound");
            }
        }
        Ok(())
    }

    pub fn by_username(&self, username: &str) -> Option<Arc<Connection>> {
        let inner = self.inner.read();
        let id = inner.by_user.get(username)?;
        inner.by_id.get(id).cloned()
    }

    /// Drops `id` from both indices.
    pub fn remove(&self, id: ConnId) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write();
        let conn = inner.by_id.remove(&id)?;
        unlink_username(&mut inner, &conn);
        Some(conn)
    }

    /// Every WebSocket client currently holding a username, other than
    /// `except`. A connection displaced by a newer one under its name is left
    /// out.
    pub fn websocket_peers(&self, except: ConnId) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        inner
            .by_user
            .values()
            .filter(|id| **id != except)
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.inner.read().by_user.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }

    /// Empties the registry, handing back everything that was in it.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let mut inner = self.inner.write();
        inner.by_user.clear();
        inner.by_id.drain().map(|(_, conn)| conn).collect()
    }
}

/// Removes the username entry of `conn` if it still points at `conn`.
fn unlink_username(inner: &mut Indices, conn: &Connection) {
    if let Some(name) = conn.username() {
        if inner.by_user.get(&name) == Some(&conn.id()) {
            inner.by_user.remove(&name);
        }
    }
}
