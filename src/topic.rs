//! Relay topic
//!
//! One generic relay instance: a channel registry, the set of live
//! subscriber connections, a broadcaster and a liveness monitor, all
//! parameterised by a [`TopicConfig`]. The server builds one per configured
//! topic; topics share nothing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::broadcast::{Broadcaster, FanOutReport};
use crate::liveness::LivenessMonitor;
use crate::registry::{ChannelKey, ChannelRegistry, TopicName};
use crate::server::config::{RelayConfig, TopicConfig};
use crate::session::{ConnectionTracker, OverflowPolicy, SubscriberHandle, SubscriberQueues};
use crate::stats::TopicStats;

/// Why a subscriber connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame or end of stream from the client
    ClientClosed,
    /// Socket read or write failed
    Transport(String),
    /// Terminated by the liveness monitor, overflow policy, or shutdown
    Terminated,
}

/// One relay topic
#[derive(Debug)]
pub struct Topic {
    config: TopicConfig,
    registry: Arc<ChannelRegistry>,
    tracker: Arc<ConnectionTracker>,
    broadcaster: Broadcaster,
    liveness: Arc<LivenessMonitor>,
    stats: Arc<TopicStats>,
    next_conn_id: AtomicU64,
    queue_capacity: usize,
    overflow: OverflowPolicy,
    reject_unknown: bool,
}

impl Topic {
    /// Build a topic from its configuration and the relay-wide options
    pub fn new(config: TopicConfig, relay: &RelayConfig) -> Self {
        let stats = Arc::new(TopicStats::new());
        let registry = Arc::new(ChannelRegistry::new(
            config.name.clone(),
            config.channels.clone(),
        ));
        let tracker = Arc::new(ConnectionTracker::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry), Arc::clone(&stats));
        let liveness = Arc::new(LivenessMonitor::new(
            config.name.clone(),
            Arc::clone(&tracker),
            Arc::clone(&stats),
            relay.probe_interval,
        ));

        Self {
            config,
            registry,
            tracker,
            broadcaster,
            liveness,
            stats,
            next_conn_id: AtomicU64::new(1),
            queue_capacity: relay.subscriber_queue_capacity,
            overflow: relay.overflow_policy,
            reject_unknown: relay.reject_unknown_channels,
        }
    }

    pub fn name(&self) -> &TopicName {
        &self.config.name
    }

    pub fn config(&self) -> &TopicConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    pub fn liveness(&self) -> &Arc<LivenessMonitor> {
        &self.liveness
    }

    pub fn stats(&self) -> &Arc<TopicStats> {
        &self.stats
    }

    pub fn is_known_channel(&self, channel: &str) -> bool {
        self.registry.is_known(channel)
    }

    /// Whether upgrades for unknown channels are refused
    pub fn rejects_unknown_channels(&self) -> bool {
        self.reject_unknown
    }

    /// Attach a freshly upgraded connection
    ///
    /// The connection is tracked for liveness, registered under its channel
    /// when the channel is known, and opened. Connections with an unknown or
    /// missing channel stay open but inert.
    pub async fn attach(
        &self,
        peer_addr: SocketAddr,
        channel: Option<ChannelKey>,
    ) -> (Arc<SubscriberHandle>, SubscriberQueues) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (handle, queues) = SubscriberHandle::new(
            conn_id,
            peer_addr,
            channel,
            self.queue_capacity,
            self.overflow,
        );

        self.tracker.insert(Arc::clone(&handle)).await;
        self.stats.connection_opened();

        let registered = match handle.channel() {
            Some(channel) => self
                .registry
                .register(channel, Arc::clone(&handle))
                .await
                .is_ok(),
            None => {
                tracing::warn!(
                    topic = %self.name(),
                    conn_id = conn_id,
                    peer = %peer_addr,
                    "Subscriber connected without a channel"
                );
                false
            }
        };

        handle.mark_open();

        tracing::info!(
            topic = %self.name(),
            channel = ?handle.channel().map(ChannelKey::as_str),
            conn_id = conn_id,
            peer = %peer_addr,
            registered = registered,
            connections = self.stats.snapshot().connections_active,
            "Subscriber connected"
        );

        (handle, queues)
    }

    /// Run the close path for a connection. Idempotent.
    pub async fn detach(&self, handle: &SubscriberHandle, reason: CloseReason) {
        handle.begin_close();

        if let Some(channel) = handle.channel() {
            self.registry.unregister(channel, handle.id()).await;
        }

        if self.tracker.remove(handle.id()).await {
            self.stats.connection_closed();

            tracing::info!(
                topic = %self.name(),
                channel = ?handle.channel().map(ChannelKey::as_str),
                conn_id = handle.id(),
                peer = %handle.peer_addr(),
                reason = ?reason,
                delivered = handle.delivered(),
                dropped = handle.dropped(),
                connections = self.stats.snapshot().connections_active,
                "Subscriber disconnected"
            );
        }

        handle.finish_close();
    }

    /// Fan a chunk out to every open subscriber of `channel`
    pub async fn broadcast(&self, channel: &str, payload: Bytes) -> FanOutReport {
        self.broadcaster.fan_out(channel, payload).await
    }

    /// Terminate every connection of this topic
    pub async fn terminate_all(&self) -> usize {
        let connections = self.tracker.snapshot().await;
        for conn in &connections {
            conn.terminate();
        }
        connections.len()
    }
}
