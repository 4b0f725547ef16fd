//! Error types for SASL framing.

/// Result type alias for SASL operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SASL error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server advertised no mechanism this crate can frame.
    #[error("No supported SASL mechanism in server list: {0:?}")]
    NoCommonMechanism(Vec<String>),

    /// A forced mechanism is not in the server's list.
    #[error("SASL mechanism {0} not advertised by server")]
    NotAdvertised(String),

    /// Unknown mechanism name.
    #[error("Unknown SASL mechanism: {0}")]
    UnknownMechanism(String),

    /// Server challenge was not valid base64.
    #[error("Invalid base64 in server challenge: {0}")]
    Base64(#[from] base64::DecodeError),

    /// JSON parsing error in an OAuth failure challenge.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
