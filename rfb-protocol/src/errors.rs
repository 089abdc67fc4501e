//! Error types for message parsing.

use std::io;
use thiserror::Error;

/// Errors surfaced while reading server messages.
///
/// Both variants are fatal to the current session: the stream position is
/// unknown after either, so the only recovery is disconnect and reconnect.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Transport-level failure: short read, closed socket, I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Structurally invalid message content.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// True if reconnecting may succeed (transient network conditions).
    ///
    /// A malformed message means the peer is misbehaving; retrying against
    /// the same server is unlikely to help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorization() {
        let transport =
            ProtocolError::Transport(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(transport.is_retryable());
        assert!(!transport.is_fatal());

        let malformed = ProtocolError::Malformed("bad padding".to_string());
        assert!(malformed.is_fatal());
    }

    #[test]
    fn display() {
        let err = ProtocolError::Malformed("depth 33 exceeds 32 bpp".to_string());
        assert_eq!(err.to_string(), "malformed message: depth 33 exceeds 32 bpp");
    }
}
