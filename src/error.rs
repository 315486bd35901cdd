use std::io;

use thiserror::Error;

/// Result type used across this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, OS, etc.).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Operation timed out.
    #[error("timeout waiting for response")]
    Timeout,

    /// Peer responded with an unexpected or invalid packet.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Peer responded with an unexpected or invalid packet.
    #[error("protocol error: {0}")]
    ProtocolOwned(String),

    /// Authentication or integrity verification failed.
    ///
    /// RAKP auth-code or integrity-check-value mismatches are never retried:
    /// they indicate a configuration mismatch or tampering.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// Cryptographic failure (unknown algorithm code, missing keying
    /// material, invalid key sizes).
    #[error("crypto error: {0}")]
    Crypto(&'static str),

    /// Unsupported configuration or protocol feature.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Invalid caller-supplied argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An IPMI command completed with a non-zero completion code.
    #[error("ipmi completion code: {completion_code:#04x}")]
    CompletionCode {
        /// Raw completion code returned by the BMC.
        completion_code: u8,
    },

    /// A handshake transition request is not valid in the current state.
    ///
    /// The state machine does not change state when reporting this; the
    /// caller may retry with a correct event or reset the connection.
    #[error("illegal handshake transition in state {state}")]
    IllegalTransition {
        /// Name of the state that rejected the event.
        state: &'static str,
    },

    /// The outbound session sequence number range is exhausted.
    ///
    /// Sequence numbers never repeat within a session; the session must be
    /// re-established.
    #[error("outbound session sequence numbers exhausted")]
    SequenceExhausted,
}

impl Error {
    pub(crate) fn protocol_owned(msg: impl Into<String>) -> Self {
        Self::ProtocolOwned(msg.into())
    }

    /// True for errors that must never be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::Crypto(_) | Self::SequenceExhausted
        )
    }
}
