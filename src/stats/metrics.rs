//! Statistics for relay topics and ingest sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-session ingest statistics
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    /// Chunks received from the source
    pub chunks: u64,
    /// Bytes received from the source
    pub bytes: u64,
    /// Chunks discarded because the channel is unknown
    pub discarded_chunks: u64,
    /// Total per-subscriber deliveries
    pub deliveries: u64,
    /// Total per-subscriber drops on overflow
    pub dropped: u64,
    /// Session duration
    pub duration: Duration,
    /// Bitrate estimate (bits/sec)
    pub bitrate: u64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate bitrate from bytes and duration
    pub fn calculate_bitrate(&mut self) {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.bitrate = ((self.bytes * 8) as f64 / secs) as u64;
        }
    }
}

/// Live counters for one topic
#[derive(Debug, Default)]
pub struct TopicStats {
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    ingest_sessions_total: AtomicU64,
    ingest_sessions_active: AtomicU64,
    chunks_relayed: AtomicU64,
    bytes_relayed: AtomicU64,
    deliveries: AtomicU64,
    dropped: AtomicU64,
    liveness_terminations: AtomicU64,
}

impl TopicStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn ingest_started(&self) {
        self.ingest_sessions_total.fetch_add(1, Ordering::Relaxed);
        self.ingest_sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ingest_ended(&self) {
        self.ingest_sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record one fanned-out chunk
    pub fn chunk_relayed(&self, bytes: usize, deliveries: usize, dropped: usize) {
        self.chunks_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed.fetch_add(bytes as u64, Ordering::Relaxed);
        self.deliveries.fetch_add(deliveries as u64, Ordering::Relaxed);
        self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub fn liveness_terminated(&self) {
        self.liveness_terminations.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> TopicStatsSnapshot {
        TopicStatsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            ingest_sessions_total: self.ingest_sessions_total.load(Ordering::Relaxed),
            ingest_sessions_active: self.ingest_sessions_active.load(Ordering::Relaxed),
            chunks_relayed: self.chunks_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            liveness_terminations: self.liveness_terminations.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`TopicStats`] counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicStatsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub ingest_sessions_total: u64,
    pub ingest_sessions_active: u64,
    pub chunks_relayed: u64,
    pub bytes_relayed: u64,
    pub deliveries: u64,
    pub dropped: u64,
    pub liveness_terminations: u64,
}
