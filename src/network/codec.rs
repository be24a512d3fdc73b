//! Encoding and decoding of [`Packet`]s.
//!
//! The tag byte is written by hand; the body after it goes through bincode
//! with a single fixed-width little-endian configuration, so every packet has
//! the exact size listed in [`messages`](crate::network::messages).
//!
//! ```
//! use quickdraw_sync::network::codec::{decode, encode_into};
//! use quickdraw_sync::{Frame, Packet};
//!
//! let packet = Packet::Input { frame: Frame::new(42), last_ack: Frame::new(40), pressed: true };
//! let mut buf = [0u8; 16];
//! let len = encode_into(&packet, &mut buf).expect("fits");
//! assert_eq!(len, 10);
//! assert_eq!(decode(&buf[..len]).expect("valid"), packet);
//! ```

use std::fmt;

use crate::network::messages::{InputBody, Packet, PacketKind, ReadyBody, SeedBody};

fn config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

/// Why a packet could not be encoded or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecError {
    /// Zero-length payload.
    Empty,
    /// First byte is not a known [`PacketKind`] tag.
    UnknownTag {
        /// The offending byte.
        tag: u8,
    },
    /// Payload is shorter than its kind requires.
    Truncated {
        /// Kind named by the tag.
        kind: PacketKind,
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        got: usize,
    },
    /// The output buffer cannot hold the packet.
    BufferTooSmall {
        /// Bytes required.
        required: usize,
        /// Bytes available.
        provided: usize,
    },
    /// bincode rejected the body while encoding.
    EncodeError {
        /// bincode's message; its errors carry no structure beyond `Display`.
        message: String,
    },
    /// bincode rejected the body while decoding.
    DecodeError {
        /// bincode's message.
        message: String,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty packet"),
            Self::UnknownTag { tag } => write!(f, "unknown packet tag {tag}"),
            Self::Truncated { kind, needed, got } => {
                write!(f, "{kind} packet needs {needed} bytes, got {got}")
            },
            Self::BufferTooSmall { required, provided } => write!(
                f,
                "buffer too small: needed {required} bytes, but only {provided} provided"
            ),
            Self::EncodeError { message } => write!(f, "encoding failed: {message}"),
            Self::DecodeError { message } => write!(f, "decoding failed: {message}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Reads the kind from the first byte without touching the rest.
pub fn peek_kind(bytes: &[u8]) -> CodecResult<PacketKind> {
    let tag = *bytes.first().ok_or(CodecError::Empty)?;
    PacketKind::from_tag(tag).ok_or(CodecError::UnknownTag { tag })
}

/// Encodes `packet` into the front of `buffer` and returns the bytes written.
pub fn encode_into(packet: &Packet, buffer: &mut [u8]) -> CodecResult<usize> {
    let kind = packet.kind();
    let required = kind.wire_len();
    let provided = buffer.len();
    let (tag, body) = match buffer.split_first_mut() {
        Some(split) if provided >= required => split,
        _ => return Err(CodecError::BufferTooSmall { required, provided }),
    };
    *tag = kind.tag();

    let written = match *packet {
        Packet::Seed { seed } | Packet::SeedAck { seed } => {
            bincode::serde::encode_into_slice(SeedBody { seed }, body, config())
        },
        Packet::Input {
            frame,
            last_ack,
            pressed,
        } => bincode::serde::encode_into_slice(
            InputBody {
                frame,
                last_ack,
                pressed: u8::from(pressed),
            },
            body,
            config(),
        ),
        Packet::Ready { round } => {
            bincode::serde::encode_into_slice(ReadyBody { round }, body, config())
        },
    }
    .map_err(|e| CodecError::EncodeError {
        message: e.to_string(),
    })?;

    Ok(1 + written)
}

/// Encodes `packet` into a freshly allocated vector.
pub fn encode(packet: &Packet) -> CodecResult<Vec<u8>> {
    let mut buffer = vec![0u8; packet.kind().wire_len()];
    let len = encode_into(packet, &mut buffer)?;
    buffer.truncate(len);
    Ok(buffer)
}

/// Decodes one packet. Trailing bytes past the kind's length are ignored.
pub fn decode(bytes: &[u8]) -> CodecResult<Packet> {
    let kind = peek_kind(bytes)?;
    let needed = kind.wire_len();
    if bytes.len() < needed {
        return Err(CodecError::Truncated {
            kind,
            needed,
            got: bytes.len(),
        });
    }
    let body = bytes.get(1..needed).ok_or(CodecError::Truncated {
        kind,
        needed,
        got: bytes.len(),
    })?;

    let decode_err = |e: bincode::error::DecodeError| CodecError::DecodeError {
        message: e.to_string(),
    };
    let packet = match kind {
        PacketKind::Seed | PacketKind::SeedAck => {
            let (SeedBody { seed }, _): (SeedBody, usize) =
                bincode::serde::decode_from_slice(body, config()).map_err(decode_err)?;
            if kind == PacketKind::Seed {
                Packet::Seed { seed }
            } else {
                Packet::SeedAck { seed }
            }
        },
        PacketKind::Input => {
            let (body, _): (InputBody, usize) =
                bincode::serde::decode_from_slice(body, config()).map_err(decode_err)?;
            Packet::Input {
                frame: body.frame,
                last_ack: body.last_ack,
                pressed: body.pressed != 0,
            }
        },
        PacketKind::Ready => {
            let (ReadyBody { round }, _): (ReadyBody, usize) =
                bincode::serde::decode_from_slice(body, config()).map_err(decode_err)?;
            Packet::Ready { round }
        },
    };
    Ok(packet)
}
