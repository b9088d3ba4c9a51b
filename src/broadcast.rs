//! Fan-out broadcaster
//!
//! Delivers one ingested chunk to every open subscriber registered on its
//! channel. Delivery is a non-blocking enqueue per subscriber; the socket
//! write happens on the subscriber's own task, so a stalled peer never holds
//! up the ingest path or other subscribers.

use std::sync::Arc;

use bytes::Bytes;

use crate::registry::ChannelRegistry;
use crate::session::SendOutcome;
use crate::stats::TopicStats;

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Subscribers the chunk was queued for
    pub delivered: usize,
    /// Subscribers whose queue was full
    pub dropped: usize,
    /// Subscribers that closed between lookup and send
    pub skipped: usize,
}

/// Fan-out engine for one topic
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ChannelRegistry>,
    stats: Arc<TopicStats>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ChannelRegistry>, stats: Arc<TopicStats>) -> Self {
        Self { registry, stats }
    }

    /// Send `payload` unmodified to every open subscriber of `channel`
    ///
    /// Each subscriber receives the chunk as one discrete message. Callers
    /// that await this before reading their next chunk get per-source
    /// ordering on every subscriber.
    pub async fn fan_out(&self, channel: &str, payload: Bytes) -> FanOutReport {
        let mut report = FanOutReport::default();
        let len = payload.len();

        self.registry
            .for_each_open(channel, |conn| match conn.try_send(payload.clone()) {
                SendOutcome::Queued => report.delivered += 1,
                SendOutcome::Dropped => {
                    tracing::debug!(
                        topic = %self.registry.topic(),
                        channel = channel,
                        conn_id = conn.id(),
                        "Subscriber lagging, chunk dropped"
                    );
                    report.dropped += 1;
                }
                SendOutcome::Skipped | SendOutcome::Closed => report.skipped += 1,
            })
            .await;

        self.stats
            .chunk_relayed(len, report.delivered, report.dropped);

        tracing::trace!(
            topic = %self.registry.topic(),
            channel = channel,
            bytes = len,
            delivered = report.delivered,
            dropped = report.dropped,
            "Chunk relayed"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use super::*;
    use crate::registry::{ChannelKey, ChannelSet};
    use crate::session::{ConnectionId, OverflowPolicy, SubscriberHandle, SubscriberQueues};

    struct Fixture {
        registry: Arc<ChannelRegistry>,
        stats: Arc<TopicStats>,
        broadcaster: Broadcaster,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ChannelRegistry::new("video".into(), ChannelSet::default()));
        let stats = Arc::new(TopicStats::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry), Arc::clone(&stats));
        Fixture {
            registry,
            stats,
            broadcaster,
        }
    }

    async fn subscribe(
        registry: &ChannelRegistry,
        id: ConnectionId,
        channel: &str,
        capacity: usize,
        overflow: OverflowPolicy,
    ) -> (Arc<SubscriberHandle>, SubscriberQueues) {
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50000 + id as u16);
        let key = ChannelKey::from(channel);
        let (handle, queues) =
            SubscriberHandle::new(id, peer, Some(key.clone()), capacity, overflow);
        handle.mark_open();
        let _ = registry.register(&key, Arc::clone(&handle)).await;
        (handle, queues)
    }

    #[tokio::test]
    async fn test_fan_out_exact_payload() {
        let fx = fixture();
        let (_h, mut q) = subscribe(&fx.registry, 1, "05", 8, OverflowPolicy::DropNewest).await;

        let payload = Bytes::from_static(&[0x47, 0x00, 0x11, 0x10]);
        let report = fx.broadcaster.fan_out("05", payload.clone()).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(q.outbound.recv().await.unwrap(), payload);
        assert!(q.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let fx = fixture();
        let (_h, mut q) = subscribe(&fx.registry, 1, "01", 8, OverflowPolicy::DropNewest).await;

        for i in 0u8..5 {
            fx.broadcaster.fan_out("01", Bytes::from(vec![i])).await;
        }

        for i in 0u8..5 {
            assert_eq!(q.outbound.recv().await.unwrap().as_ref(), &[i]);
        }
    }

    #[tokio::test]
    async fn test_fan_out_channel_isolation() {
        let fx = fixture();
        let (_a, mut qa) = subscribe(&fx.registry, 1, "01", 8, OverflowPolicy::DropNewest).await;
        let (_b, mut qb) = subscribe(&fx.registry, 2, "02", 8, OverflowPolicy::DropNewest).await;

        let report = fx.broadcaster.fan_out("02", Bytes::from_static(b"two")).await;

        assert_eq!(report.delivered, 1);
        assert!(qa.outbound.try_recv().is_err());
        assert_eq!(qb.outbound.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_fan_out_skips_closed_subscriber() {
        let fx = fixture();
        let (a, mut qa) = subscribe(&fx.registry, 1, "01", 8, OverflowPolicy::DropNewest).await;
        let (_b, mut qb) = subscribe(&fx.registry, 2, "01", 8, OverflowPolicy::DropNewest).await;

        // Closing but not yet unregistered
        a.begin_close();

        let report = fx.broadcaster.fan_out("01", Bytes::from_static(b"data")).await;

        assert_eq!(report.delivered, 1);
        assert!(qa.outbound.try_recv().is_err());
        assert_eq!(qb.outbound.recv().await.unwrap(), "data");
    }

    #[tokio::test]
    async fn test_fan_out_slow_subscriber_does_not_block() {
        let fx = fixture();
        let (_slow, _qs) = subscribe(&fx.registry, 1, "01", 1, OverflowPolicy::DropNewest).await;
        let (_fast, mut qf) = subscribe(&fx.registry, 2, "01", 16, OverflowPolicy::DropNewest).await;

        let mut dropped = 0;
        for i in 0u8..4 {
            dropped += fx.broadcaster.fan_out("01", Bytes::from(vec![i])).await.dropped;
        }

        assert_eq!(dropped, 3);
        for i in 0u8..4 {
            assert_eq!(qf.outbound.recv().await.unwrap().as_ref(), &[i]);
        }

        let snap = fx.stats.snapshot();
        assert_eq!(snap.chunks_relayed, 4);
        assert_eq!(snap.deliveries, 5);
        assert_eq!(snap.dropped, 3);
    }

    #[tokio::test]
    async fn test_fan_out_disconnect_policy() {
        let fx = fixture();
        let (slow, _qs) = subscribe(&fx.registry, 1, "01", 1, OverflowPolicy::Disconnect).await;

        fx.broadcaster.fan_out("01", Bytes::from_static(b"a")).await;
        let report = fx.broadcaster.fan_out("01", Bytes::from_static(b"b")).await;

        assert_eq!(report.dropped, 1);
        assert!(slow.is_terminated());

        // Terminated subscribers are no longer visited
        let report = fx.broadcaster.fan_out("01", Bytes::from_static(b"c")).await;
        assert_eq!(report, FanOutReport::default());
    }

    #[tokio::test]
    async fn test_fan_out_unknown_channel() {
        let fx = fixture();

        let report = fx.broadcaster.fan_out("99", Bytes::from_static(b"x")).await;

        assert_eq!(report, FanOutReport::default());
    }
}
