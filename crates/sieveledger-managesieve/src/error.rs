//! Error types for the ManageSieve library.

use std::time::Duration;

use thiserror::Error;

use crate::types::ResponseCode;

/// Errors that can occur during ManageSieve operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// TLS client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Malformed server response.
    #[error("Protocol error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Server returned NO.
    #[error("Server returned NO: {message}")]
    No {
        /// Machine readable response code, if any.
        code: Option<ResponseCode>,
        /// Human readable message.
        message: String,
    },

    /// Server sent BYE and is closing the connection.
    #[error("Server sent BYE: {message}")]
    Bye {
        /// Machine readable response code, if any.
        code: Option<ResponseCode>,
        /// Human readable message.
        message: String,
    },

    /// Server referred the client to another host.
    #[error("Referred to {host} (port {port:?})")]
    Referral {
        /// Referred host name.
        host: String,
        /// Referred port, if given.
        port: Option<u16>,
    },

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// SASL mechanism selection or framing failed.
    #[error("SASL error: {0}")]
    Sasl(#[from] sieveledger_sasl::Error),

    /// The watchdog fired before the server answered.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The session went away before the request was answered.
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// The host reports no network connectivity.
    #[error("Network is offline")]
    Offline,

    /// No connection to send on.
    #[error("Not connected")]
    NotConnected,

    /// Invalid state for the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Server lacks a required capability.
    #[error("Unsupported by server: {0}")]
    Unsupported(String),

    /// No session with this id in the registry.
    #[error("Unknown session: {0}")]
    UnknownSession(u64),

    /// No channel with this id in the session.
    #[error("Unknown channel: {0}")]
    UnknownChannel(u64),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Returns true for errors that end the whole session rather than a
    /// single request.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::Bye { .. } | Self::Referral { .. } | Self::Disconnected(_)
        )
    }

    /// Returns the server response code carried by a NO or BYE.
    #[must_use]
    pub const fn response_code(&self) -> Option<&ResponseCode> {
        match self {
            Self::No { code, .. } | Self::Bye { code, .. } => code.as_ref(),
            _ => None,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
