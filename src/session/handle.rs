//! Subscriber connection handle
//!
//! The handle is the shared half of a subscriber connection. The registry,
//! the broadcaster and the liveness monitor hold `Arc<SubscriberHandle>`;
//! the connection task owns the receiving ends of its queues.
//!
//! ```text
//!   Broadcaster ──try_send──► outbound (bounded) ──┐
//!                                                  ├──► writer ──► socket
//!   LivenessMonitor ──ping──► control ─────────────┘
//!   LivenessMonitor ──terminate──► Notify ──► connection task exits
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use super::state::{AtomicConnState, ConnState};
use crate::registry::ChannelKey;

/// Per-topic unique connection identifier
pub type ConnectionId = u64;

/// What to do when a subscriber's outbound queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Drop the chunk for this subscriber only
    #[default]
    DropNewest,
    /// Terminate the subscriber
    Disconnect,
}

/// Out-of-band requests for the connection writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Send a WebSocket ping
    Ping,
}

/// Result of a single non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Payload queued for the writer
    Queued,
    /// Connection not open; nothing queued
    Skipped,
    /// Queue full; payload discarded
    Dropped,
    /// Writer already gone
    Closed,
}

/// Receiving ends owned by the connection task
#[derive(Debug)]
pub struct SubscriberQueues {
    pub outbound: mpsc::Receiver<Bytes>,
    pub control: mpsc::UnboundedReceiver<Control>,
}

/// Shared state of one subscriber connection
#[derive(Debug)]
pub struct SubscriberHandle {
    id: ConnectionId,
    peer_addr: SocketAddr,
    channel: Option<ChannelKey>,
    state: AtomicConnState,
    alive: AtomicBool,
    outbound: mpsc::Sender<Bytes>,
    control: mpsc::UnboundedSender<Control>,
    overflow: OverflowPolicy,
    terminate: Notify,
    terminated: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl SubscriberHandle {
    /// Create a handle and the queues its connection task drains
    pub fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        channel: Option<ChannelKey>,
        capacity: usize,
        overflow: OverflowPolicy,
    ) -> (Arc<Self>, SubscriberQueues) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let handle = Arc::new(Self {
            id,
            peer_addr,
            channel,
            state: AtomicConnState::new(),
            alive: AtomicBool::new(true),
            outbound: outbound_tx,
            control: control_tx,
            overflow,
            terminate: Notify::new(),
            terminated: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let queues = SubscriberQueues {
            outbound: outbound_rx,
            control: control_rx,
        };

        (handle, queues)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Channel requested at handshake, if any
    pub fn channel(&self) -> Option<&ChannelKey> {
        self.channel.as_ref()
    }

    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state.get() == ConnState::Open
    }

    pub(crate) fn mark_open(&self) -> bool {
        self.state.open()
    }

    pub(crate) fn begin_close(&self) -> bool {
        self.state.begin_close()
    }

    pub(crate) fn finish_close(&self) {
        self.state.finish_close();
    }

    /// Record a probe response
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clear the alive flag, returning its previous value
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Ask the writer to send a ping. Returns false if the writer is gone.
    pub fn ping(&self) -> bool {
        self.control.send(Control::Ping).is_ok()
    }

    /// Force the connection closed
    ///
    /// Stops fan-out to this connection immediately; the connection task
    /// performs the rest of the close path.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            self.state.begin_close();
            self.terminate.notify_one();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Resolves once [`terminate`](Self::terminate) has been called
    pub async fn terminated(&self) {
        if self.is_terminated() {
            return;
        }
        self.terminate.notified().await;
    }

    /// Queue a payload without waiting
    pub fn try_send(&self, payload: Bytes) -> SendOutcome {
        if !self.is_open() {
            return SendOutcome::Skipped;
        }

        match self.outbound.try_send(payload) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Queued
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if self.overflow == OverflowPolicy::Disconnect {
                    tracing::warn!(
                        conn_id = self.id,
                        peer = %self.peer_addr,
                        "Subscriber queue full, disconnecting"
                    );
                    self.terminate();
                }
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Payloads queued for this connection so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Payloads discarded on overflow so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000)
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let (handle, mut queues) =
            SubscriberHandle::new(1, peer(), Some("01".into()), 4, OverflowPolicy::DropNewest);

        assert_eq!(
            handle.try_send(Bytes::from_static(b"early")),
            SendOutcome::Skipped
        );

        handle.mark_open();
        assert_eq!(
            handle.try_send(Bytes::from_static(b"data")),
            SendOutcome::Queued
        );
        assert_eq!(queues.outbound.recv().await.unwrap(), "data");
        assert_eq!(handle.delivered(), 1);
    }

    #[tokio::test]
    async fn test_overflow_drop_newest() {
        let (handle, mut queues) =
            SubscriberHandle::new(1, peer(), None, 1, OverflowPolicy::DropNewest);
        handle.mark_open();

        assert_eq!(handle.try_send(Bytes::from_static(b"a")), SendOutcome::Queued);
        assert_eq!(handle.try_send(Bytes::from_static(b"b")), SendOutcome::Dropped);
        assert_eq!(handle.dropped(), 1);
        assert!(handle.is_open());
        assert_eq!(queues.outbound.recv().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_overflow_disconnect() {
        let (handle, _queues) =
            SubscriberHandle::new(1, peer(), None, 1, OverflowPolicy::Disconnect);
        handle.mark_open();

        handle.try_send(Bytes::from_static(b"a"));
        assert_eq!(handle.try_send(Bytes::from_static(b"b")), SendOutcome::Dropped);
        assert!(handle.is_terminated());
        assert_eq!(handle.state(), ConnState::Closing);

        // Resolves immediately once terminated
        handle.terminated().await;
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (handle, queues) = SubscriberHandle::new(1, peer(), None, 4, OverflowPolicy::DropNewest);
        handle.mark_open();
        drop(queues);

        assert_eq!(handle.try_send(Bytes::from_static(b"x")), SendOutcome::Closed);
        assert!(!handle.ping());
    }

    #[test]
    fn test_alive_flag() {
        let (handle, _queues) =
            SubscriberHandle::new(1, peer(), None, 4, OverflowPolicy::DropNewest);

        assert!(handle.take_alive());
        assert!(!handle.take_alive());
        handle.mark_alive();
        assert!(handle.take_alive());
    }
}
