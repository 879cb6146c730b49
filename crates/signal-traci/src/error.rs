//! Error types for the TraCI client.

use std::num::TryFromIntError;

use signal_core::engine::EngineError;

/// Errors raised while talking to a simulator over TraCI.
#[derive(Debug, thiserror::Error)]
pub enum TraciError {
    /// Socket read or write failed.
    #[error("TraCI I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The simulator answered a command with a failure status.
    #[error("command 0x{command:02x} failed: {description}")]
    Status {
        /// Command id the status refers to.
        command: u8,
        /// Simulator-supplied description.
        description: String,
    },

    /// A message ended before the expected value.
    #[error("truncated message: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the decoder tried to read.
        needed: usize,
        /// Bytes left in the message.
        available: usize,
    },

    /// A typed value carried an unexpected type tag.
    #[error("expected type 0x{expected:02x}, found 0x{actual:02x}")]
    UnexpectedType {
        /// Tag the caller asked for.
        expected: u8,
        /// Tag found on the wire.
        actual: u8,
    },

    /// The message structure does not match the protocol.
    #[error("malformed message: {reason}")]
    Malformed {
        /// What did not match.
        reason: String,
    },

    /// A string on the wire is not valid UTF-8.
    #[error("invalid UTF-8 in string: {source}")]
    Utf8 {
        /// The underlying decode error.
        #[from]
        source: std::string::FromUtf8Error,
    },

    /// A count or integer value is negative or out of range.
    #[error("invalid count {value}: {source}")]
    Count {
        /// Value as received.
        value: i64,
        /// The underlying conversion error.
        source: TryFromIntError,
    },

    /// A value is too large to encode.
    #[error("value of {len} does not fit the wire format: {source}")]
    TooLarge {
        /// Length or value that overflowed.
        len: usize,
        /// The underlying conversion error.
        source: TryFromIntError,
    },
}

impl TraciError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

impl From<TraciError> for EngineError {
    fn from(err: TraciError) -> Self {
        match err {
            TraciError::Io { source } => Self::Io { source },
            TraciError::Status { description, .. } => Self::Rejected {
                message: description,
            },
            other => Self::Protocol {
                message: other.to_string(),
            },
        }
    }
}
