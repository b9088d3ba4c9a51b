//! Connection tracker
//!
//! Every subscriber connection of a topic, registered or inert. The liveness
//! monitor probes this set rather than the registry so that connections with
//! an unknown channel are reaped as well.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::handle::{ConnectionId, SubscriberHandle};

/// All live subscriber connections of one topic
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    connections: RwLock<HashMap<ConnectionId, Arc<SubscriberHandle>>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a connection
    pub async fn insert(&self, handle: Arc<SubscriberHandle>) {
        self.connections.write().await.insert(handle.id(), handle);
    }

    /// Stop tracking a connection. Idempotent.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        self.connections.write().await.remove(&id).is_some()
    }

    /// Point-in-time copy of the tracked connections
    pub async fn snapshot(&self) -> Vec<Arc<SubscriberHandle>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
