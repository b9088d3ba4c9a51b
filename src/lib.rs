//! # stream-relay
//!
//! Real-time broadcast relay: sources push byte or JSON streams over HTTP,
//! tagged by channel, and every chunk is fanned out to the WebSocket
//! subscribers of that channel.
//!
//! Each topic (video, encoder status, NIC monitor status) is an independent
//! instance of the same engine: a [`ChannelRegistry`], a [`Broadcaster`] and
//! a [`LivenessMonitor`], wired to its own ingest routes and subscribe port.
//!
//! ```text
//!   encoder ──POST /05──► Ingest ──► Registry("05") ──► Broadcaster
//!                                                        │   │   │
//!                                                        ▼   ▼   ▼
//!                                                   WebSocket subscribers
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stream_relay::{RelayConfig, RelayServer};
//!
//! # async fn example() -> stream_relay::Result<()> {
//! let server = RelayServer::bind(RelayConfig::default()).await?;
//! server
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod error;
pub mod liveness;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod topic;

pub use broadcast::{Broadcaster, FanOutReport};
pub use error::{Error, Result};
pub use liveness::{LivenessMonitor, ProbeReport};
pub use registry::{ChannelKey, ChannelRegistry, ChannelSet, RegistryError, TopicName};
pub use server::{IngestRoute, RelayConfig, RelayServer, TopicConfig};
pub use session::{ConnState, OverflowPolicy, SubscriberHandle};
pub use topic::{CloseReason, Topic};
