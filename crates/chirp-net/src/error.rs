use std::io;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors produced by the transport connector.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Socket-level failure (refused, reset, unreachable host, DNS).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection attempt timed out")]
    Timeout,

    /// The server closed an established connection.
    #[error("Connection closed by server")]
    Closed,

    /// The handshake was refused because the credentials were rejected.
    #[error("Authentication rejected (HTTP {0})")]
    Unauthorized(u16),

    /// The handshake was answered with a non-upgrade HTTP status.
    #[error("Handshake rejected (HTTP {0})")]
    Rejected(u16),

    #[error("Invalid URL or request: {0}")]
    InvalidRequest(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not connected")]
    NotConnected,
}

impl ConnectionError {
    /// Whether a fresh connection attempt may succeed without user action.
    ///
    /// Network-class failures are retriable; credential, request and protocol
    /// failures are terminal.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout | Self::Closed | Self::NotConnected => true,
            Self::Rejected(status) => *status >= 500 || *status == 408 || *status == 429,
            Self::Unauthorized(_) | Self::InvalidRequest(_) | Self::Protocol(_) => false,
        }
    }
}

impl From<tungstenite::Error> for ConnectionError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(e) => Self::Io(e),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            tungstenite::Error::Http(response) => {
                let status = response.status().as_u16();
                if status == 401 || status == 403 {
                    Self::Unauthorized(status)
                } else {
                    Self::Rejected(status)
                }
            }
            tungstenite::Error::Url(e) => Self::InvalidRequest(e.to_string()),
            tungstenite::Error::HttpFormat(e) => Self::InvalidRequest(e.to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}
