use crate::Frame;

/// Notable things a [`PeerLink`](super::PeerLink) observed, drained with
/// [`PeerLink::events`](super::PeerLink::events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkEvent {
    /// Both sides agreed on `seed`.
    SeedShared {
        /// The agreed seed.
        seed: u32,
    },
    /// The handshake deadline passed.
    HandshakeTimedOut {
        /// Time since `start_connect`.
        elapsed_ms: u128,
    },
    /// The peer announced it is waiting to start `round`.
    PeerReady {
        /// Round the peer reset to.
        round: u32,
    },
    /// The peer's first press of the round arrived.
    RemotePressed {
        /// Frame the peer pressed on.
        frame: Frame,
    },
}

/// Result of one [`PeerLink::poll_handshake`](super::PeerLink::poll_handshake) step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStatus {
    /// `start_connect` has not been called.
    Idle,
    /// Still exchanging seeds.
    Pending,
    /// The seed is agreed.
    Shared(u32),
    /// The deadline passed.
    TimedOut {
        /// Time between `start_connect` and the deadline check that fired.
        elapsed_ms: u128,
    },
}
