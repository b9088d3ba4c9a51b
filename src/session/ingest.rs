//! Ingest session context
//!
//! One push request's lifetime. Holds routing and counters only; nothing
//! survives the session.

use std::net::SocketAddr;
use std::time::Instant;

use crate::broadcast::FanOutReport;
use crate::registry::{ChannelKey, TopicName};
use crate::stats::IngestStats;

/// How an ingest session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestEnd {
    /// Source finished the body
    Completed,
    /// No data within the idle timeout
    TimedOut,
    /// Body read failed (reset, malformed chunking)
    Reset,
}

/// Context of one ingest session
#[derive(Debug)]
pub struct IngestSession {
    /// Unique session ID
    pub session_id: u64,

    /// Remote source address
    pub peer_addr: SocketAddr,

    pub topic: TopicName,

    pub channel: ChannelKey,

    /// Whether the channel is in the topic's channel set
    pub routed: bool,

    pub started_at: Instant,

    pub stats: IngestStats,
}

impl IngestSession {
    /// Create a new session context
    pub fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        topic: TopicName,
        channel: ChannelKey,
        routed: bool,
    ) -> Self {
        Self {
            session_id,
            peer_addr,
            topic,
            channel,
            routed,
            started_at: Instant::now(),
            stats: IngestStats::new(),
        }
    }

    /// Account a chunk that was fanned out
    pub fn record_relayed(&mut self, len: usize, report: &FanOutReport) {
        self.stats.chunks += 1;
        self.stats.bytes += len as u64;
        self.stats.deliveries += report.delivered as u64;
        self.stats.dropped += report.dropped as u64;
    }

    /// Account a chunk discarded for an unknown channel
    pub fn record_discarded(&mut self, len: usize) {
        self.stats.chunks += 1;
        self.stats.bytes += len as u64;
        self.stats.discarded_chunks += 1;
    }

    /// Close the session and log its totals
    pub fn finish(mut self, end: IngestEnd) -> IngestStats {
        self.stats.duration = self.started_at.elapsed();
        self.stats.calculate_bitrate();

        tracing::info!(
            session_id = self.session_id,
            topic = %self.topic,
            channel = %self.channel,
            peer = %self.peer_addr,
            end = ?end,
            chunks = self.stats.chunks,
            bytes = self.stats.bytes,
            discarded = self.stats.discarded_chunks,
            deliveries = self.stats.deliveries,
            dropped = self.stats.dropped,
            bitrate = self.stats.bitrate,
            "Ingest session ended"
        );

        self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    #[test]
    fn test_session_accounting() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000);
        let mut session = IngestSession::new(1, addr, "video".into(), "05".into(), true);

        let report = FanOutReport {
            delivered: 2,
            dropped: 1,
            skipped: 0,
        };
        session.record_relayed(188, &report);
        session.record_relayed(188, &report);
        session.record_discarded(10);

        let stats = session.finish(IngestEnd::Completed);
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.bytes, 386);
        assert_eq!(stats.discarded_chunks, 1);
        assert_eq!(stats.deliveries, 4);
        assert_eq!(stats.dropped, 2);
    }
}
