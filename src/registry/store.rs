//! Channel registry implementation
//!
//! Per-topic accounting of which subscriber connections are registered under
//! which channel key.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::error::RegistryError;
use super::key::{ChannelKey, ChannelSet, TopicName};
use crate::session::{ConnectionId, SubscriberHandle};

type Members = HashMap<ConnectionId, Arc<SubscriberHandle>>;

/// Registry of subscriber connections for one topic
///
/// Thread-safe via `RwLock`. Fan-out takes the read lock per chunk and never
/// holds it across a socket write, so register/unregister are never stalled
/// by a slow subscriber.
#[derive(Debug)]
pub struct ChannelRegistry {
    topic: TopicName,

    /// Known channels; fixed at construction
    known: ChannelSet,

    /// Channel key to registered connections
    channels: RwLock<HashMap<ChannelKey, Members>>,
}

impl ChannelRegistry {
    /// Create a registry with one empty membership set per known channel
    pub fn new(topic: TopicName, known: ChannelSet) -> Self {
        let channels = known
            .iter()
            .map(|key| (key.clone(), Members::new()))
            .collect();

        Self {
            topic,
            known,
            channels: RwLock::new(channels),
        }
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    pub fn known_channels(&self) -> &ChannelSet {
        &self.known
    }

    /// Check whether a channel key is accepted by this topic
    pub fn is_known(&self, channel: &str) -> bool {
        self.known.contains(channel)
    }

    /// Register a connection under a channel
    ///
    /// Unknown channels leave the registry untouched and are logged.
    pub async fn register(
        &self,
        channel: &ChannelKey,
        conn: Arc<SubscriberHandle>,
    ) -> Result<(), RegistryError> {
        let mut channels = self.channels.write().await;

        let Some(members) = channels.get_mut(channel.as_str()) else {
            tracing::warn!(
                topic = %self.topic,
                channel = %channel,
                conn_id = conn.id(),
                "Register on unknown channel ignored"
            );
            return Err(RegistryError::UnknownChannel {
                topic: self.topic.clone(),
                channel: channel.clone(),
            });
        };

        let conn_id = conn.id();
        members.insert(conn_id, conn);

        tracing::debug!(
            topic = %self.topic,
            channel = %channel,
            conn_id = conn_id,
            subscribers = members.len(),
            "Subscriber registered"
        );

        Ok(())
    }

    /// Remove a connection from a channel. Idempotent.
    ///
    /// Returns true if the connection was registered.
    pub async fn unregister(&self, channel: &ChannelKey, conn_id: ConnectionId) -> bool {
        let mut channels = self.channels.write().await;

        let Some(members) = channels.get_mut(channel.as_str()) else {
            return false;
        };

        let removed = members.remove(&conn_id).is_some();
        if removed {
            tracing::debug!(
                topic = %self.topic,
                channel = %channel,
                conn_id = conn_id,
                subscribers = members.len(),
                "Subscriber unregistered"
            );
        }
        removed
    }

    /// Invoke `f` once per registered connection that is currently open
    ///
    /// Returns the number of connections visited. Connections registered or
    /// removed concurrently may or may not be visited; closing connections
    /// are filtered by their state.
    pub async fn for_each_open<F>(&self, channel: &str, mut f: F) -> usize
    where
        F: FnMut(&Arc<SubscriberHandle>),
    {
        let channels = self.channels.read().await;

        let Some(members) = channels.get(channel) else {
            return 0;
        };

        let mut visited = 0;
        for conn in members.values().filter(|conn| conn.is_open()) {
            f(conn);
            visited += 1;
        }
        visited
    }

    /// Number of connections registered on a channel
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map_or(0, HashMap::len)
    }

    /// Number of connections registered across all channels
    pub async fn total_subscribers(&self) -> usize {
        self.channels.read().await.values().map(HashMap::len).sum()
    }

    /// Subscriber count per channel, sorted by key
    pub async fn channel_counts(&self) -> Vec<(ChannelKey, usize)> {
        let channels = self.channels.read().await;
        let mut counts: Vec<_> = channels
            .iter()
            .map(|(key, members)| (key.clone(), members.len()))
            .collect();
        counts.sort_by(|a, b| a.0.cmp(&b.0));
        counts
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use bytes::Bytes;

    use super::*;
    use crate::session::{OverflowPolicy, SubscriberQueues};

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new("video".into(), ChannelSet::default())
    }

    fn open_conn(id: ConnectionId, channel: &str) -> (Arc<SubscriberHandle>, SubscriberQueues) {
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000 + id as u16);
        let (handle, queues) =
            SubscriberHandle::new(id, peer, Some(channel.into()), 8, OverflowPolicy::DropNewest);
        handle.mark_open();
        (handle, queues)
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = registry();
        let key = ChannelKey::from("01");
        let (conn, _q) = open_conn(1, "01");

        registry.register(&key, conn).await.unwrap();
        assert_eq!(registry.subscriber_count("01").await, 1);

        assert!(registry.unregister(&key, 1).await);
        assert_eq!(registry.subscriber_count("01").await, 0);

        // Second removal is a no-op
        assert!(!registry.unregister(&key, 1).await);
    }

    #[tokio::test]
    async fn test_register_unknown_channel() {
        let registry = registry();
        let key = ChannelKey::from("99");
        let (conn, _q) = open_conn(1, "99");

        let result = registry.register(&key, conn).await;
        assert!(matches!(
            result,
            Err(RegistryError::UnknownChannel { ref channel, .. }) if channel.as_str() == "99"
        ));
        assert_eq!(registry.total_subscribers().await, 0);
        assert!(!registry.unregister(&key, 1).await);
    }

    #[tokio::test]
    async fn test_for_each_open_filters_closing() {
        let registry = registry();
        let key = ChannelKey::from("03");
        let (a, _qa) = open_conn(1, "03");
        let (b, _qb) = open_conn(2, "03");

        registry.register(&key, a).await.unwrap();
        registry.register(&key, Arc::clone(&b)).await.unwrap();

        b.begin_close();

        let mut seen = Vec::new();
        let visited = registry
            .for_each_open("03", |conn| seen.push(conn.id()))
            .await;
        assert_eq!(visited, 1);
        assert_eq!(seen, vec![1]);
    }

    #[tokio::test]
    async fn test_for_each_open_other_channel() {
        let registry = registry();
        let (a, mut qa) = open_conn(1, "01");
        registry.register(&"01".into(), a).await.unwrap();

        let visited = registry
            .for_each_open("02", |conn| {
                conn.try_send(Bytes::from_static(b"x"));
            })
            .await;
        assert_eq!(visited, 0);
        assert!(qa.outbound.try_recv().is_err());

        assert_eq!(registry.for_each_open("nope", |_| {}).await, 0);
    }

    #[tokio::test]
    async fn test_channel_counts() {
        let registry = ChannelRegistry::new("status".into(), ["a", "b"].into_iter().collect());
        let (a, _qa) = open_conn(1, "a");
        let (b, _qb) = open_conn(2, "a");
        registry.register(&"a".into(), a).await.unwrap();
        registry.register(&"a".into(), b).await.unwrap();

        let counts = registry.channel_counts().await;
        assert_eq!(
            counts,
            vec![(ChannelKey::from("a"), 2), (ChannelKey::from("b"), 0)]
        );
        assert_eq!(registry.total_subscribers().await, 2);
    }
}
