//! # quickdraw-sync
//!
//! Peer synchronization and deterministic round resolution for a two-player
//! quick-draw reaction game.
//!
//! The crate is sans-IO at its core: the handshake state machine, the presence
//! tracker and the round engine are plain state machines driven by the caller.
//! Transport and the session directory are consumed through the
//! [`DatagramChannel`] and [`SessionDirectory`] traits. With the `tokio`
//! feature (on by default) the crate also ships async drivers for the
//! handshake wait and the presence heartbeat/liveness loops.
//!
//! ```
//! use quickdraw_sync::{Frame, round::{resolve, RoundOutcome}};
//!
//! let signal = Frame::new(150);
//! assert_eq!(
//!     resolve(signal, Frame::new(160), Frame::new(165)),
//!     RoundOutcome::WinLocal
//! );
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
use std::{fmt::Debug, hash::Hash};

pub use config::{HandshakeConfig, PresenceConfig, RoundRules};
pub use error::QuickdrawError;
pub use input_ring::{InputHistory, InputRecord, InputRing, PressedFrame};
pub use network::chaos_channel::{ChaosChannel, ChaosConfig, ChaosStats};
pub use network::codec::CodecError;
pub use network::loopback::LoopbackChannel;
pub use network::messages::{Packet, PacketKind};
pub use network::peer_link::{HandshakeStatus, LinkEvent, LinkStats, PeerLink, PeerState, Role};
pub use presence::directory::{InMemoryDirectory, SessionDirectory};
pub use presence::tracker::{MemberPresenceRecord, PresenceEvent, PresenceTracker};
#[cfg(feature = "tokio")]
pub use presence::service::PresenceService;
pub use round::{MatchEngine, MatchStatus, MatchWinner, RoundOutcome, RoundPhase, RoundResult};
pub use sessions::event_drain::EventDrain;
pub use sessions::net_match::{MatchEvent, NetMatch, TickReport};

pub mod clock;
pub mod config;
#[doc(hidden)]
pub mod error;
pub mod input_ring;
pub mod prelude;
/// Minimal PCG32 generator used for seeds, signal scheduling and fault injection.
pub mod rng;
pub mod round;
pub mod telemetry;

/// Peer-to-peer wire format, channels and the handshake state machine.
pub mod network {
    pub mod chaos_channel;
    /// Binary codec for the packet kinds.
    pub mod codec;
    pub mod loopback;
    pub mod messages;
    pub mod peer_link;
}

/// Lobby presence: membership diffs, heartbeats and liveness.
pub mod presence {
    pub mod directory;
    #[cfg(feature = "tokio")]
    pub mod service;
    pub mod tracker;
}

/// Orchestration glue over the link and the round engine.
pub mod sessions {
    pub mod event_drain;
    pub mod net_match;
}

#[cfg(feature = "tokio")]
pub use cancel::CancelSignal;

#[cfg(feature = "tokio")]
mod cancel {
    use tokio::sync::watch;

    /// Cooperative cancellation shared by the async drivers.
    ///
    /// Cloning yields another handle to the same signal. Once [`cancel`](Self::cancel)
    /// is called every clone observes it, and pending [`cancelled`](Self::cancelled)
    /// futures resolve.
    #[derive(Debug, Clone)]
    pub struct CancelSignal {
        tx: std::sync::Arc<watch::Sender<bool>>,
        rx: watch::Receiver<bool>,
    }

    impl Default for CancelSignal {
        fn default() -> Self {
            Self::new()
        }
    }

    impl CancelSignal {
        /// Creates a signal that has not been cancelled.
        #[must_use]
        pub fn new() -> Self {
            let (tx, rx) = watch::channel(false);
            Self {
                tx: std::sync::Arc::new(tx),
                rx,
            }
        }

        /// Cancels every holder of this signal. Idempotent.
        pub fn cancel(&self) {
            self.tx.send_replace(true);
        }

        /// Returns `true` once [`cancel`](Self::cancel) has been called.
        #[must_use]
        pub fn is_cancelled(&self) -> bool {
            *self.rx.borrow()
        }

        /// Resolves when the signal is cancelled.
        pub async fn cancelled(&self) {
            let mut rx = self.rx.clone();
            // The sender lives as long as any clone, so wait_for only errors
            // when every handle is gone; treat that as cancelled too.
            let _ = rx.wait_for(|cancelled| *cancelled).await;
        }
    }
}

// #############
// # CONSTANTS #
// #############

/// Internally, -1 represents "not pressed yet" / no frame.
pub const NULL_FRAME: i32 = -1;

/// Size of the scratch buffer used when pulling datagrams off a channel.
pub const RECEIVE_BUFFER_SIZE: usize = 4096;

/// A simulation frame at the fixed 60 Hz game tick.
///
/// Frame numbers start at 0 for every round. [`Frame::NULL`] (-1) marks a
/// press that has not happened.
///
/// ```
/// use quickdraw_sync::Frame;
///
/// let frame = Frame::new(0);
/// assert!(frame.is_valid());
/// assert!(Frame::NULL.is_null());
/// assert_eq!((frame + 1).as_i32(), 1);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Frame(i32);

impl Frame {
    /// The null frame, equivalent to [`NULL_FRAME`].
    pub const NULL: Self = Self(NULL_FRAME);

    /// Wraps a raw frame number without validation.
    #[inline]
    #[must_use]
    pub const fn new(frame: i32) -> Self {
        Self(frame)
    }

    /// Returns the raw frame number.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// `true` for [`Frame::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_FRAME
    }

    /// `true` for non-negative frames.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// `Some(self)` for valid frames, `None` otherwise.
    #[inline]
    #[must_use]
    pub const fn to_option(self) -> Option<Self> {
        if self.is_valid() {
            Some(self)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "NULL_FRAME")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl std::ops::Add<i32> for Frame {
    type Output = Self;

    #[inline]
    fn add(self, rhs: i32) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl std::ops::AddAssign<i32> for Frame {
    #[inline]
    fn add_assign(&mut self, rhs: i32) {
        self.0 = self.0.saturating_add(rhs);
    }
}

impl std::ops::Sub<Frame> for Frame {
    type Output = i32;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

impl From<i32> for Frame {
    #[inline]
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<Frame> for i32 {
    #[inline]
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

impl PartialEq<i32> for Frame {
    #[inline]
    fn eq(&self, other: &i32) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<i32> for Frame {
    #[inline]
    fn partial_cmp(&self, other: &i32) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

// #############
// #  TRAITS   #
// #############

/// Compile time parameterization for links, trackers and matches.
///
/// Implement this on a marker struct to pick the identity type that names
/// peers and lobby members.
///
/// ```
/// use quickdraw_sync::Config;
///
/// struct LocalPlay;
///
/// impl Config for LocalPlay {
///     type Identity = String;
/// }
/// ```
pub trait Config: 'static {
    /// Opaque identity of a peer / lobby member.
    type Identity: Clone + PartialEq + Eq + PartialOrd + Ord + Hash + Debug + Send + Sync + 'static;
}

/// The `(local, remote, channel name)` triple a link talks over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelEndpoint<I> {
    /// Identity of this process.
    pub local: I,
    /// Identity of the peer.
    pub remote: I,
    /// Channel name; both peers must agree on it.
    pub channel: String,
}

impl<I> ChannelEndpoint<I> {
    /// Builds an endpoint.
    pub fn new(local: I, remote: I, channel: impl Into<String>) -> Self {
        Self {
            local,
            remote,
            channel: channel.into(),
        }
    }
}

/// An unreliable, unordered datagram channel between identities.
///
/// Implement this to plug a transport into [`PeerLink`]. Sends are
/// fire-and-forget; loss, duplication and reordering are all tolerated by the
/// handshake on top.
pub trait DatagramChannel<I> {
    /// Starts accepting datagrams from `endpoint.remote` on `endpoint.channel`.
    fn accept_incoming(&mut self, endpoint: &ChannelEndpoint<I>) -> Result<(), QuickdrawError>;

    /// Sends one datagram to the endpoint's remote.
    fn send_to(
        &mut self,
        endpoint: &ChannelEndpoint<I>,
        payload: &[u8],
    ) -> Result<(), QuickdrawError>;

    /// Pulls one pending datagram addressed to `local` on `channel` into `buf`.
    ///
    /// Returns the sender and the number of bytes written, or `None` when
    /// nothing is queued.
    fn try_receive(
        &mut self,
        local: &I,
        channel: &str,
        buf: &mut [u8],
    ) -> Result<Option<(I, usize)>, QuickdrawError>;

    /// Stops accepting from the endpoint's remote and drops any queued datagrams.
    fn close(&mut self, endpoint: &ChannelEndpoint<I>);
}

impl<I, C: DatagramChannel<I> + ?Sized> DatagramChannel<I> for Box<C> {
    fn accept_incoming(&mut self, endpoint: &ChannelEndpoint<I>) -> Result<(), QuickdrawError> {
        (**self).accept_incoming(endpoint)
    }

    fn send_to(
        &mut self,
        endpoint: &ChannelEndpoint<I>,
        payload: &[u8],
    ) -> Result<(), QuickdrawError> {
        (**self).send_to(endpoint, payload)
    }

    fn try_receive(
        &mut self,
        local: &I,
        channel: &str,
        buf: &mut [u8],
    ) -> Result<Option<(I, usize)>, QuickdrawError> {
        (**self).try_receive(local, channel, buf)
    }

    fn close(&mut self, endpoint: &ChannelEndpoint<I>) {
        (**self).close(endpoint);
    }
}
