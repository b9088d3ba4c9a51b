//! Subscriber connection state machine
//!
//! Tracks a subscriber from upgrade to teardown:
//!
//! ```text
//! Connecting ──► Open ──► Closing ──► Closed
//!      │                     ▲
//!      └─────────────────────┘
//! ```
//!
//! Transitions are forward-only. Only `Open` connections receive fan-out.

use std::sync::atomic::{AtomicU8, Ordering};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    /// Upgraded, not yet attached to its topic
    Connecting = 0,
    /// Attached; receives fan-out if registered
    Open = 1,
    /// Teardown started (close frame, error, or forced termination)
    Closing = 2,
    /// Removed from the registry and tracker
    Closed = 3,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnState::Connecting,
            1 => ConnState::Open,
            2 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }
}

/// Lock-free holder for a [`ConnState`]
///
/// Read on every fan-out, written by the connection task and by the
/// liveness monitor.
#[derive(Debug)]
pub struct AtomicConnState(AtomicU8);

impl AtomicConnState {
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnState::Connecting as u8))
    }

    /// Current state
    pub fn get(&self) -> ConnState {
        ConnState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Connecting → Open`. Returns false if the connection already moved on.
    pub fn open(&self) -> bool {
        self.transition(ConnState::Connecting, ConnState::Open)
    }

    /// `Connecting | Open → Closing`. Returns true only for the caller that
    /// performed the transition.
    pub fn begin_close(&self) -> bool {
        self.transition(ConnState::Open, ConnState::Closing)
            || self.transition(ConnState::Connecting, ConnState::Closing)
    }

    /// Any state `→ Closed`
    pub fn finish_close(&self) {
        self.0.store(ConnState::Closed as u8, Ordering::Release);
    }

    fn transition(&self, from: ConnState, to: ConnState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicConnState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lifecycle() {
        let state = AtomicConnState::new();
        assert_eq!(state.get(), ConnState::Connecting);

        assert!(state.open());
        assert_eq!(state.get(), ConnState::Open);

        assert!(state.begin_close());
        assert_eq!(state.get(), ConnState::Closing);

        state.finish_close();
        assert_eq!(state.get(), ConnState::Closed);
    }

    #[test]
    fn test_close_is_claimed_once() {
        let state = AtomicConnState::new();
        state.open();

        assert!(state.begin_close());
        assert!(!state.begin_close());
    }

    #[test]
    fn test_no_reopen_after_close() {
        let state = AtomicConnState::new();

        assert!(state.begin_close());
        assert!(!state.open());
        assert_eq!(state.get(), ConnState::Closing);
    }
}
