//! Relay statistics

pub mod metrics;

pub use metrics::{IngestStats, TopicStats, TopicStatsSnapshot};
