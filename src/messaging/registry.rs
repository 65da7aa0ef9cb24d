/// Live connection registry
///
/// Tracks open messaging connections per account. One account may hold
/// several connections (multiple tabs or devices); each gets its own bounded
/// channel so a slow reader only loses its own events.
use super::PushEvent;
use crate::metrics;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Identifier of one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, HashMap<ConnectionId, mpsc::Sender<PushEvent>>>>,
    channel_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            channel_capacity,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(64)
    }

    /// Register a connection for an account
    pub async fn connect(&self, account_id: &str) -> (ConnectionId, mpsc::Receiver<PushEvent>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let id = ConnectionId::new();

        self.connections
            .write()
            .await
            .entry(account_id.to_string())
            .or_default()
            .insert(id, tx);

        metrics::LIVE_CONNECTIONS.inc();
        tracing::debug!("Connection {} opened for {}", id, account_id);
        (id, rx)
    }

    /// Forget a connection; empty account entries are removed
    pub async fn disconnect(&self, account_id: &str, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(account) = connections.get_mut(account_id) {
            if account.remove(&id).is_some() {
                metrics::LIVE_CONNECTIONS.dec();
            }
            if account.is_empty() {
                connections.remove(account_id);
            }
        }
        tracing::debug!("Connection {} closed for {}", id, account_id);
    }

    /// Deliver an event to every connection of an account without waiting.
    ///
    /// Returns how many connections accepted the event. Full or closed
    /// channels drop the event.
    pub async fn push(&self, account_id: &str, event: &PushEvent) -> usize {
        let connections = self.connections.read().await;
        let Some(account) = connections.get(account_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, sender) in account {
            match sender.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    metrics::record_push(true);
                }
                Err(e) => {
                    metrics::record_push(false);
                    tracing::warn!("Dropped push to {} on connection {}: {}", account_id, id, e);
                }
            }
        }
        delivered
    }

    pub async fn is_online(&self, account_id: &str) -> bool {
        self.connections.read().await.contains_key(account_id)
    }

    pub async fn connection_count(&self, account_id: &str) -> usize {
        self.connections
            .read()
            .await
            .get(account_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
