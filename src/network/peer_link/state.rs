//! Handshake lifecycle of a [`PeerLink`](super::PeerLink).
//!
//! ```text
//!  ┌──────────┐  start_connect()   ┌─────────────┐
//!  │ Sleeping │ ─────────────────► │ SharingSeed │ ──── deadline ────┐
//!  └──────────┘                    └──────┬──────┘                   │
//!       ▲                                 │ SeedAck received         ▼
//!       │                                 │ (or SeedAck sent)  ┌──────────────────┐
//!       │                                 ▼                    │ HandshakeTimedOut│
//!       │                          ┌────────────┐              └──────────────────┘
//!       │                          │ SeedShared │
//!       │                          └──────┬─────┘
//!       │                                 │ first send_input()
//!       │                                 ▼
//!       │  close_connection()      ┌──────────┐
//!       └───────────────────────── │ GameLoop │
//!                                  └──────────┘
//! ```
//!
//! `close_connection()` returns to `Sleeping` from every state.

/// Where a link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeerState {
    /// No endpoint bound.
    #[default]
    Sleeping,
    /// Endpoint bound, seed not agreed yet.
    SharingSeed,
    /// Seed agreed; inputs may flow.
    SeedShared,
    /// At least one local input was sent.
    GameLoop,
    /// The deadline passed before a seed was agreed. Only
    /// `close_connection` leaves this state.
    HandshakeTimedOut,
}

impl PeerState {
    /// Label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sleeping => "Sleeping",
            Self::SharingSeed => "SharingSeed",
            Self::SeedShared => "SeedShared",
            Self::GameLoop => "GameLoop",
            Self::HandshakeTimedOut => "HandshakeTimedOut",
        }
    }

    /// `true` once a seed is agreed and inputs may be exchanged.
    #[must_use]
    pub const fn is_synchronized(self) -> bool {
        matches!(self, Self::SeedShared | Self::GameLoop)
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side proposes the seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Draws the seed and resends it until acknowledged.
    Initiator,
    /// Waits for a seed and acknowledges it once.
    Responder,
}

impl Role {
    /// `true` for [`Role::Initiator`].
    #[must_use]
    pub const fn is_initiator(self) -> bool {
        matches!(self, Self::Initiator)
    }
}
