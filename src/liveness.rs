//! Liveness monitor
//!
//! Detects half-open subscriber connections by pinging every tracked
//! connection of a topic on a fixed interval.
//!
//! On each tick, for every connection:
//! - alive flag clear (no pong since the previous ping): terminate it
//! - otherwise: clear the flag and send a new ping
//!
//! A pong sets the flag again. A connection is therefore terminated on the
//! first tick following a ping that was not answered before that tick,
//! exactly one interval after the unanswered ping went out. Measured from the
//! last pong a peer sent, detection takes more than one and at most two
//! intervals.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::registry::TopicName;
use crate::session::ConnectionTracker;
use crate::stats::TopicStats;

/// Outcome of one probe round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Connections that were sent a ping
    pub probed: usize,
    /// Connections terminated for missing the previous ping
    pub terminated: usize,
}

/// Periodic prober for one topic's connections
#[derive(Debug)]
pub struct LivenessMonitor {
    topic: TopicName,
    tracker: Arc<ConnectionTracker>,
    stats: Arc<TopicStats>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(
        topic: TopicName,
        tracker: Arc<ConnectionTracker>,
        stats: Arc<TopicStats>,
        interval: Duration,
    ) -> Self {
        Self {
            topic,
            tracker,
            stats,
            interval,
        }
    }

    /// Run one probe round
    pub async fn tick(&self) -> ProbeReport {
        let mut report = ProbeReport::default();

        for conn in self.tracker.snapshot().await {
            if conn.is_terminated() {
                continue;
            }

            if !conn.take_alive() {
                tracing::info!(
                    topic = %self.topic,
                    conn_id = conn.id(),
                    peer = %conn.peer_addr(),
                    "Liveness timeout, terminating connection"
                );
                conn.terminate();
                self.stats.liveness_terminated();
                report.terminated += 1;
                continue;
            }

            if conn.ping() {
                report.probed += 1;
            }
        }

        report
    }

    /// Spawn the background probe task
    ///
    /// The first round runs one interval after spawning. Returns a handle
    /// that can be used to abort the task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + monitor.interval, monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let report = monitor.tick().await;
                if report.terminated > 0 {
                    tracing::debug!(
                        topic = %monitor.topic,
                        probed = report.probed,
                        terminated = report.terminated,
                        "Liveness round"
                    );
                }
            }
        })
    }
}
