//! Registry of live connections and notification fan-out.
//!
//! Connections are indexed by connection ID and by client ID. Both indexes
//! sit behind a single lock so they never disagree. Disconnects happen after
//! the lock is released: a connection's teardown may call back into the
//! manager.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use thinghub_core::{NotificationMessage, Result, TransportError};
use tracing::{debug, error, info, warn};

use crate::connection::ServerConnection;

#[derive(Default)]
struct ConnectionIndex {
    by_connection_id: HashMap<String, Arc<dyn ServerConnection>>,
    by_client_id: HashMap<String, Vec<String>>,
}

impl ConnectionIndex {
    fn remove(&mut self, connection_id: &str) -> Option<Arc<dyn ServerConnection>> {
        let Some(conn) = self.by_connection_id.remove(connection_id) else {
            self.purge_client_entries(connection_id);
            return None;
        };
        let client_id = conn.client_id();
        match self.by_client_id.get_mut(client_id) {
            Some(ids) => {
                ids.retain(|id| id != connection_id);
                if ids.is_empty() {
                    let _ = self.by_client_id.remove(client_id);
                }
            }
            None => warn!(connection_id, client_id, "connection missing from client index"),
        }
        Some(conn)
    }

    /// Drop `connection_id` from the client index when the connection index
    /// no longer knows it.
    fn purge_client_entries(&mut self, connection_id: &str) {
        let mut stale = false;
        self.by_client_id.retain(|_, ids| {
            let before = ids.len();
            ids.retain(|id| id != connection_id);
            stale |= ids.len() != before;
            !ids.is_empty()
        });
        if stale {
            warn!(connection_id, "connection missing from connection index");
        }
    }
}

/// Tracks every connection across all protocols.
#[derive(Default)]
pub struct ConnectionManager {
    index: RwLock<ConnectionIndex>,
}

impl ConnectionManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    ///
    /// A connection ID that is already registered is treated as a protocol
    /// violation: the incumbent is removed, both connections are closed, and
    /// `DuplicateConnectionId` is returned.
    pub fn add_connection(&self, conn: Arc<dyn ServerConnection>) -> Result<()> {
        let connection_id = conn.connection_id().to_string();
        let incumbent = {
            let mut index = self.index.write();
            if index.by_connection_id.contains_key(&connection_id) {
                index.remove(&connection_id)
            } else {
                index
                    .by_client_id
                    .entry(conn.client_id().to_string())
                    .or_default()
                    .push(connection_id.clone());
                let _ = index.by_connection_id.insert(connection_id.clone(), conn.clone());
                None
            }
        };

        if let Some(existing) = incumbent {
            error!(
                connection_id = %connection_id,
                client_id = conn.client_id(),
                "duplicate connection ID, closing both connections"
            );
            existing.disconnect();
            conn.disconnect();
            return Err(TransportError::DuplicateConnectionId(connection_id));
        }

        info!(
            connection_id = %connection_id,
            client_id = conn.client_id(),
            protocol = %conn.protocol_type(),
            "connection added"
        );
        Ok(())
    }

    /// Remove a connection by ID. Unknown IDs are ignored.
    pub fn remove_connection(&self, connection_id: &str) -> Option<Arc<dyn ServerConnection>> {
        let removed = self.index.write().remove(connection_id);
        if removed.is_some() {
            debug!(connection_id, "connection removed");
        }
        removed
    }

    /// Remove `conn` only if it is the instance registered under its ID.
    ///
    /// Protocol servers call this on teardown so a late cleanup cannot evict
    /// a newer connection that reused the ID.
    pub fn remove_connection_if(&self, conn: &Arc<dyn ServerConnection>) -> bool {
        let mut index = self.index.write();
        let same = index
            .by_connection_id
            .get(conn.connection_id())
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(conn)));
        if same {
            let _ = index.remove(conn.connection_id());
        }
        same
    }

    /// Look up a connection by ID.
    pub fn get_connection_by_connection_id(&self, connection_id: &str) -> Option<Arc<dyn ServerConnection>> {
        self.index.read().by_connection_id.get(connection_id).cloned()
    }

    /// First connection of a client, if any.
    ///
    /// Used to reach agents, which hold a single connection.
    pub fn get_connection_by_client_id(&self, client_id: &str) -> Option<Arc<dyn ServerConnection>> {
        let index = self.index.read();
        index
            .by_client_id
            .get(client_id)
            .and_then(|ids| ids.first())
            .and_then(|id| index.by_connection_id.get(id))
            .cloned()
    }

    /// Every connection of a client.
    pub fn client_connections(&self, client_id: &str) -> Vec<Arc<dyn ServerConnection>> {
        let index = self.index.read();
        index
            .by_client_id
            .get(client_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| index.by_connection_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove and close every connection of a client. Returns how many.
    pub fn close_all_client_connections(&self, client_id: &str) -> usize {
        let removed: Vec<_> = {
            let mut index = self.index.write();
            let ids = index.by_client_id.get(client_id).cloned().unwrap_or_default();
            ids.iter().filter_map(|id| index.remove(id)).collect()
        };
        for conn in &removed {
            conn.disconnect();
        }
        if !removed.is_empty() {
            info!(client_id, count = removed.len(), "closed client connections");
        }
        removed.len()
    }

    /// Remove and close every connection.
    pub fn close_all(&self) -> usize {
        let removed: Vec<_> = {
            let mut index = self.index.write();
            index.by_client_id.clear();
            index.by_connection_id.drain().map(|(_, conn)| conn).collect()
        };
        for conn in &removed {
            conn.disconnect();
        }
        info!(count = removed.len(), "closed all connections");
        removed.len()
    }

    /// Point-in-time copy of all connections.
    pub fn snapshot(&self) -> Vec<Arc<dyn ServerConnection>> {
        self.index.read().by_connection_id.values().cloned().collect()
    }

    /// Run `f` on a snapshot of all connections, outside the lock.
    pub fn for_each_connection(&self, mut f: impl FnMut(&Arc<dyn ServerConnection>)) {
        for conn in &self.snapshot() {
            f(conn);
        }
    }

    /// Deliver a notification to every connection whose subscriptions
    /// select it.
    ///
    /// Sends run concurrently on a snapshot. A connection whose send fails
    /// or panics is removed and closed; the others are unaffected.
    pub async fn publish_notification(&self, notif: &NotificationMessage) {
        let targets = self.snapshot();
        let sends = targets.iter().map(|conn| {
            let notif = notif.clone();
            AssertUnwindSafe(conn.send_notification(notif)).catch_unwind()
        });
        let results = futures::future::join_all(sends).await;

        for (conn, result) in targets.iter().zip(results) {
            let reason = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "panic during delivery".to_string(),
            };
            error!(
                connection_id = conn.connection_id(),
                client_id = conn.client_id(),
                operation = %notif.operation,
                thing_id = %notif.thing_id,
                reason = %reason,
                "notification delivery failed, dropping connection"
            );
            let _ = self.remove_connection_if(conn);
            conn.disconnect();
        }
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.index.read().by_connection_id.len()
    }

    /// Number of distinct clients with at least one connection.
    pub fn client_count(&self) -> usize {
        self.index.read().by_client_id.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
