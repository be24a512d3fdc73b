//! The datagrams peers exchange.
//!
//! ```text
//! Seed     [tag=0][seed: u32 LE]                                   5 bytes
//! SeedAck  [tag=1][seed: u32 LE]                                   5 bytes
//! Input    [tag=2][frame: i32 LE][last_ack: i32 LE][pressed: u8]  10 bytes
//! Ready    [tag=3][round: u32 LE]                                  5 bytes
//! ```
//!
//! `Ready` opens a round after a reset: inputs are only accepted once the
//! peer has announced the same round number.
//!
//! There is no version byte. A peer that receives a tag it does not know
//! drops the datagram.

use serde::{Deserialize, Serialize};

use crate::Frame;

/// Discriminant carried in the first byte of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PacketKind {
    /// Initiator's seed proposal.
    Seed = 0,
    /// Responder's echo of the accepted seed.
    SeedAck = 1,
    /// One frame of input.
    Input = 2,
    /// Round barrier after a reset.
    Ready = 3,
}

impl PacketKind {
    /// Tag byte on the wire.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Maps a tag byte back to a kind.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Seed),
            1 => Some(Self::SeedAck),
            2 => Some(Self::Input),
            3 => Some(Self::Ready),
            _ => None,
        }
    }

    /// Exact encoded size, tag included. Shorter payloads are rejected.
    #[must_use]
    pub const fn wire_len(self) -> usize {
        match self {
            Self::Seed | Self::SeedAck | Self::Ready => 5,
            Self::Input => 10,
        }
    }

    /// Label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seed => "Seed",
            Self::SeedAck => "SeedAck",
            Self::Input => "Input",
            Self::Ready => "Ready",
        }
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Packet {
    /// Seed proposal.
    Seed {
        /// Proposed shared seed.
        seed: u32,
    },
    /// Seed acknowledgement.
    SeedAck {
        /// The seed being acknowledged.
        seed: u32,
    },
    /// One frame of input.
    Input {
        /// Frame the input belongs to.
        frame: Frame,
        /// Highest remote frame the sender had received.
        last_ack: Frame,
        /// Whether this is the sender's press.
        pressed: bool,
    },
    /// The sender reset and waits for the peer before ticking `round`.
    Ready {
        /// Rounds since the link was synchronized; the first round is 0.
        round: u32,
    },
}

impl Packet {
    /// Kind of this packet.
    #[must_use]
    pub const fn kind(&self) -> PacketKind {
        match self {
            Self::Seed { .. } => PacketKind::Seed,
            Self::SeedAck { .. } => PacketKind::SeedAck,
            Self::Input { .. } => PacketKind::Input,
            Self::Ready { .. } => PacketKind::Ready,
        }
    }
}

// Bodies as bincode sees them; the tag byte is written separately.

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SeedBody {
    pub seed: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ReadyBody {
    pub round: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct InputBody {
    pub frame: Frame,
    pub last_ack: Frame,
    pub pressed: u8,
}
