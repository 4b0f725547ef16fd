//! Response object model.

use crate::types::{Capabilities, ResponseCode, ScriptEntry, Status};
use crate::{Error, Result};

/// Which response grammar answers a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Status line only.
    Simple,
    /// Capability lines followed by a status line.
    Capabilities,
    /// Script listing followed by a status line.
    ListScripts,
    /// Optional script body followed by a status line.
    GetScript,
}

/// Typed data that precedes the status line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Payload {
    /// No data.
    #[default]
    None,
    /// Server capabilities.
    Capabilities(Capabilities),
    /// Script listing.
    Scripts(Vec<ScriptEntry>),
    /// Script body.
    Script(String),
}

/// A complete ManageSieve response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status word.
    pub status: Status,
    /// Response code in parentheses, if any.
    pub code: Option<ResponseCode>,
    /// Human readable message, if any.
    pub message: Option<String>,
    /// Data preceding the status line.
    pub payload: Payload,
}

impl Response {
    /// Creates a bare response with the given status.
    #[must_use]
    pub const fn new(status: Status) -> Self {
        Self {
            status,
            code: None,
            message: None,
            payload: Payload::None,
        }
    }

    /// Returns true if the status is OK.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Returns the message or an empty string.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    /// Returns the capabilities payload, if present.
    #[must_use]
    pub const fn capabilities(&self) -> Option<&Capabilities> {
        match &self.payload {
            Payload::Capabilities(caps) => Some(caps),
            _ => None,
        }
    }

    /// Converts a NO or BYE into the matching error.
    ///
    /// A BYE carrying a `REFERRAL` code becomes [`Error::Referral`].
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            Status::Ok => Ok(self),
            Status::No => Err(Error::No {
                message: self.message.unwrap_or_default(),
                code: self.code,
            }),
            Status::Bye => {
                if let Some(referral) = self.code.as_ref().and_then(ResponseCode::referral) {
                    return Err(Error::Referral {
                        host: referral.host.clone(),
                        port: referral.port,
                    });
                }
                Err(Error::Bye {
                    message: self.message.unwrap_or_default(),
                    code: self.code,
                })
            }
        }
    }
}

/// Answer to one step of an `AUTHENTICATE` exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The exchange is over.
    Complete(Response),
    /// The server sent a challenge and waits for the next client step.
    Challenge(String),
}
