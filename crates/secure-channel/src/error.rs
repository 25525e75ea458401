//! Channel error types

use std::time::Duration;

use crypto_session::CryptoError;
use shared_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying stream failed. When `partial_write` is set a frame
    /// may have been written in part and the connection must be dropped.
    #[error("Transport error: {source}")]
    Transport {
        #[source]
        source: std::io::Error,
        partial_write: bool,
    },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Secure random source failed: {0}")]
    Randomness(String),

    #[error("Authentication failed: frame rejected")]
    Authentication,

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Message too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Receive buffer too small: message is {needed} bytes, capacity {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener setup failed: {0}")]
    Listen(#[source] std::io::Error),

    #[error("Accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),
}

impl ChannelError {
    /// Failure while reading from the stream
    pub(crate) fn read(source: std::io::Error) -> Self {
        Self::Transport {
            source,
            partial_write: false,
        }
    }

    /// Failure while writing a frame to the stream
    pub(crate) fn write(source: std::io::Error) -> Self {
        Self::Transport {
            source,
            partial_write: true,
        }
    }

    /// Whether the peer closed the stream cleanly at a frame boundary
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl From<CryptoError> for ChannelError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Randomness(msg) => Self::Randomness(msg),
            CryptoError::Authentication => Self::Authentication,
            CryptoError::NonContributory => Self::Handshake(err.to_string()),
            other => Self::Crypto(other),
        }
    }
}

impl From<ProtocolError> for ChannelError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::FrameTooLarge { size, max } => Self::FrameTooLarge { size, max },
            ProtocolError::FrameTooShort { .. } => Self::MalformedFrame(err.to_string()),
            other => Self::Protocol(other),
        }
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;
