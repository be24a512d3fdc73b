use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::network::codec::CodecError;

/// Every error this library can return.
///
/// Transport hiccups during the receive pump are never surfaced here; they are
/// logged through [`telemetry`](crate::telemetry) and counted in
/// [`LinkStats`](crate::LinkStats) instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum QuickdrawError {
    /// You made an invalid request, usually calling an operation in the wrong state.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
    /// No remote is bound, or the seed has not been shared yet.
    NotConnected,
    /// The seed exchange did not complete before the handshake deadline.
    HandshakeTimedOut {
        /// Milliseconds since `start_connect` when the deadline was observed.
        elapsed_ms: u128,
    },
    /// A configuration value is out of range.
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// A packet could not be encoded or decoded.
    Codec(CodecError),
    /// The datagram channel refused an operation.
    ChannelError {
        /// A description of the channel error.
        context: String,
    },
    /// The session directory refused an operation.
    DirectoryError {
        /// A description of the directory error.
        context: String,
    },
    /// The operation was cancelled through a [`CancelSignal`](crate::CancelSignal).
    Cancelled,
}

impl Display for QuickdrawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest { info } => write!(f, "Invalid Request: {}", info),
            Self::NotConnected => write!(
                f,
                "No peer is connected or the shared seed has not been exchanged yet."
            ),
            Self::HandshakeTimedOut { elapsed_ms } => {
                write!(f, "Handshake timed out after {} ms", elapsed_ms)
            },
            Self::InvalidConfig { field, reason } => {
                write!(f, "Invalid configuration for `{}`: {}", field, reason)
            },
            Self::Codec(err) => write!(f, "Codec error: {}", err),
            Self::ChannelError { context } => write!(f, "Channel error: {}", context),
            Self::DirectoryError { context } => write!(f, "Directory error: {}", context),
            Self::Cancelled => write!(f, "The operation was cancelled."),
        }
    }
}

impl Error for QuickdrawError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CodecError> for QuickdrawError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_details() {
        let err = QuickdrawError::HandshakeTimedOut { elapsed_ms: 6001 };
        assert!(err.to_string().contains("6001"));

        let err = QuickdrawError::InvalidConfig {
            field: "ring_capacity",
            reason: "must be a power of two".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ring_capacity"));
        assert!(msg.contains("power of two"));
    }

    #[test]
    fn codec_errors_convert_and_chain() {
        let err: QuickdrawError = CodecError::UnknownTag { tag: 9 }.into();
        assert!(matches!(err, QuickdrawError::Codec(_)));
        assert!(err.source().is_some());
        assert!(QuickdrawError::NotConnected.source().is_none());
    }
}
