//! Connection and session state
//!
//! Subscriber connections are long-lived WebSockets bound to one
//! (topic, channel); ingest sessions are single HTTP push requests.

pub mod handle;
pub mod ingest;
pub mod state;
pub mod tracker;

pub use handle::{
    ConnectionId, Control, OverflowPolicy, SendOutcome, SubscriberHandle, SubscriberQueues,
};
pub use ingest::{IngestEnd, IngestSession};
pub use state::{AtomicConnState, ConnState};
pub use tracker::ConnectionTracker;
