//! Error types for PerMail

use thiserror::Error;

/// Network-level failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The server name cannot be turned into an ASCII host name
    InvalidServerName,
    /// Name resolution or TCP connect failed
    Unreachable,
    /// A network step exceeded the configured timeout
    Timeout,
    /// The server closed the session in the middle of a step
    Disconnected,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportErrorKind::InvalidServerName => write!(f, "Invalid server name"),
            TransportErrorKind::Unreachable => write!(
                f,
                "No response received. Check server address and port number"
            ),
            TransportErrorKind::Timeout => write!(f, "Timed out waiting for the server"),
            TransportErrorKind::Disconnected => write!(
                f,
                "The server has closed the connection unexpectedly. Check configuration served on this port number"
            ),
        }
    }
}

/// Main error type for PerMail
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid setup; needs operator action
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    AddressFormat(String),

    #[error("{kind}: {detail}")]
    Transport {
        kind: TransportErrorKind,
        detail: String,
    },

    /// The server rejected a step; `reply` is the raw server text
    #[error("Server replied with following exception: {code} {reply}")]
    Protocol { code: u16, reply: String },

    #[error("An SSL exception occurred. Check connection security type: {0}")]
    Security(String),

    /// Catch-all for connection tests
    #[error("Connection Test Failed! Here is what we got instead: {0}")]
    Probe(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for PerMail
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a transport error
    pub fn transport(kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        Error::Transport {
            kind,
            detail: detail.into(),
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::AddressFormat(_) => "ADDRESS_FORMAT_ERROR",
            Error::Transport { kind, .. } => match kind {
                TransportErrorKind::InvalidServerName => "INVALID_SERVER_NAME",
                TransportErrorKind::Unreachable => "UNREACHABLE",
                TransportErrorKind::Timeout => "TIMEOUT",
                TransportErrorKind::Disconnected => "DISCONNECTED",
            },
            Error::Protocol { .. } => "PROTOCOL_ERROR",
            Error::Security(_) => "SECURITY_NEGOTIATION_ERROR",
            Error::Probe(_) => "PROBE_FAILED",
            Error::Database(_) => "DATABASE_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the calling layer may retry the operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport {
                kind: TransportErrorKind::Unreachable
                    | TransportErrorKind::Timeout
                    | TransportErrorKind::Disconnected,
                ..
            }
        )
    }

    /// SMTP reply code carried by a protocol rejection
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            Error::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}
