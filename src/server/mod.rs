//! Relay server
//!
//! HTTP ingest listeners, WebSocket subscribe listeners, and the
//! configuration that lays them out.

pub mod config;
pub mod ingest;
pub mod listener;
pub mod subscribe;

pub use config::{IngestRoute, RelayConfig, TopicConfig};
pub use listener::RelayServer;
pub use subscribe::channel_from_query;
