//! Channel registry for fan-out routing
//!
//! Each topic owns one registry mapping channel keys to the subscriber
//! connections registered under them.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<ChannelRegistry>
//!                  ┌──────────────────────────┐
//!                  │ channels: HashMap<Key,   │
//!                  │   HashMap<ConnId,        │
//!                  │     Arc<SubscriberHandle>│
//!                  │   >                      │
//!                  │ >                        │
//!                  └────────────┬─────────────┘
//!                               │
//!         ┌─────────────────────┼─────────────────────┐
//!         │                     │                     │
//!         ▼                     ▼                     ▼
//!   [IngestSession]       [Subscriber]          [Subscriber]
//!   body.next()           outbound.recv()       outbound.recv()
//!         │                     │                     │
//!         └──► for_each_open()──► try_send() ──► WebSocket
//! ```
//!
//! # Zero-Copy Design
//!
//! Chunks are `bytes::Bytes`; every subscriber queue holds a reference-counted
//! clone of the same allocation.

pub mod error;
pub mod key;
pub mod store;

pub use error::RegistryError;
pub use key::{ChannelKey, ChannelSet, TopicName};
pub use store::ChannelRegistry;
