//! Convenient re-exports for common usage.
//!
//! ```rust
//! use quickdraw_sync::prelude::*;
//!
//! struct Duel;
//!
//! impl Config for Duel {
//!     type Identity = u64;
//! }
//!
//! let rules = RoundRules::default();
//! let engine = MatchEngine::new(rules, 42).unwrap();
//! assert_eq!(engine.signal_frame(), Frame::NULL);
//! ```
//!
//! # What's Included
//!
//! - **Handshake**: [`PeerLink`], [`Role`], [`PeerState`], [`HandshakeStatus`], [`LinkEvent`]
//! - **Transport**: [`DatagramChannel`], [`ChannelEndpoint`], [`LoopbackChannel`], [`ChaosChannel`]
//! - **Presence**: [`PresenceTracker`], [`PresenceEvent`], [`SessionDirectory`],
//!   [`InMemoryDirectory`]
//! - **Rounds**: [`MatchEngine`], [`RoundOutcome`], [`RoundResult`], [`MatchStatus`], [`NetMatch`]
//! - **Configuration**: [`HandshakeConfig`], [`PresenceConfig`], [`RoundRules`]
//! - **Fundamental types**: [`Config`], [`Frame`], [`NULL_FRAME`], [`QuickdrawError`]

pub use crate::{ChannelEndpoint, Config, DatagramChannel, Frame, QuickdrawError, NULL_FRAME};

pub use crate::{HandshakeStatus, LinkEvent, PeerLink, PeerState, Role};

pub use crate::{ChaosChannel, ChaosConfig, LoopbackChannel};

pub use crate::{InMemoryDirectory, PresenceEvent, PresenceTracker, SessionDirectory};
#[cfg(feature = "tokio")]
pub use crate::{CancelSignal, PresenceService};

pub use crate::{
    MatchEngine, MatchEvent, MatchStatus, MatchWinner, NetMatch, RoundOutcome, RoundPhase,
    RoundResult, TickReport,
};

pub use crate::{HandshakeConfig, PresenceConfig, RoundRules};
