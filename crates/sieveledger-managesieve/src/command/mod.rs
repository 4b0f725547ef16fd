//! ManageSieve command types and serialization.
//!
//! Every command knows its exact wire form and which response grammar
//! answers it. New verbs are added as new variants.

mod serialize;

pub use serialize::{MAX_QUOTED_LEN, write_literal, write_quoted, write_string};

use sieveledger_sasl::{Credentials, Mechanism};

use crate::parser::{ParseOutcome, Reply, ResponseKind, ResponseParser};
use crate::types::normalize_line_breaks;

/// Name used for the temporary upload when a server lacks CHECKSCRIPT.
pub const CHECK_SCRIPT_TEMP_NAME: &str = "TMP_FILE_DELETE_ME";

/// A ManageSieve command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Wait for the unsolicited capability listing a server sends on
    /// connect and after STARTTLS. Sends nothing.
    Greeting,
    /// CAPABILITY command.
    Capability,
    /// STARTTLS command.
    StartTls,
    /// AUTHENTICATE command.
    Authenticate {
        /// SASL mechanism.
        mechanism: Mechanism,
        /// Credentials the payloads are built from.
        credentials: Credentials,
    },
    /// LOGOUT command.
    Logout,
    /// NOOP command.
    Noop,
    /// LISTSCRIPTS command.
    ListScripts,
    /// GETSCRIPT command.
    GetScript {
        /// Script name.
        name: String,
    },
    /// PUTSCRIPT command.
    PutScript {
        /// Script name.
        name: String,
        /// Script body; line breaks are sent as CRLF.
        body: String,
    },
    /// CHECKSCRIPT command.
    CheckScript {
        /// Script body; line breaks are sent as CRLF.
        body: String,
    },
    /// DELETESCRIPT command.
    DeleteScript {
        /// Script name.
        name: String,
    },
    /// SETACTIVE command. An empty name deactivates all scripts.
    SetActive {
        /// Script name.
        name: String,
    },
    /// RENAMESCRIPT command.
    RenameScript {
        /// Current name.
        old: String,
        /// New name.
        new: String,
    },
}

impl Command {
    /// Returns the command verb.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Greeting => "GREETING",
            Self::Capability => "CAPABILITY",
            Self::StartTls => "STARTTLS",
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::Logout => "LOGOUT",
            Self::Noop => "NOOP",
            Self::ListScripts => "LISTSCRIPTS",
            Self::GetScript { .. } => "GETSCRIPT",
            Self::PutScript { .. } => "PUTSCRIPT",
            Self::CheckScript { .. } => "CHECKSCRIPT",
            Self::DeleteScript { .. } => "DELETESCRIPT",
            Self::SetActive { .. } => "SETACTIVE",
            Self::RenameScript { .. } => "RENAMESCRIPT",
        }
    }

    /// Serializes the command to its CRLF terminated wire form.
    ///
    /// Returns `None` for [`Command::Greeting`], which sends nothing.
    #[must_use]
    pub fn serialize(&self) -> Option<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Greeting => return None,
            Self::Capability
            | Self::StartTls
            | Self::Logout
            | Self::Noop
            | Self::ListScripts => buf.extend_from_slice(self.verb().as_bytes()),
            Self::Authenticate {
                mechanism,
                credentials,
            } => {
                buf.extend_from_slice(b"AUTHENTICATE ");
                write_quoted(&mut buf, mechanism.name());
                if let Some(initial) = sieveledger_sasl::initial_response(*mechanism, credentials) {
                    buf.push(b' ');
                    write_quoted(&mut buf, &initial);
                }
            }
            Self::GetScript { name } | Self::DeleteScript { name } | Self::SetActive { name } => {
                buf.extend_from_slice(self.verb().as_bytes());
                buf.push(b' ');
                write_string(&mut buf, name);
            }
            Self::PutScript { name, body } => {
                buf.extend_from_slice(b"PUTSCRIPT ");
                write_string(&mut buf, name);
                buf.push(b' ');
                write_literal(&mut buf, normalize_line_breaks(body).as_bytes());
            }
            Self::CheckScript { body } => {
                buf.extend_from_slice(b"CHECKSCRIPT ");
                write_literal(&mut buf, normalize_line_breaks(body).as_bytes());
            }
            Self::RenameScript { old, new } => {
                buf.extend_from_slice(b"RENAMESCRIPT ");
                write_string(&mut buf, old);
                buf.push(b' ');
                write_string(&mut buf, new);
            }
        }

        buf.extend_from_slice(b"\r\n");
        Some(buf)
    }

    /// Serializes the client's answer to the `step`-th server challenge of
    /// an `AUTHENTICATE` exchange. Answers `"*"` (cancel) when the mechanism
    /// has nothing more to send.
    #[must_use]
    pub fn continuation(&self, step: usize) -> Vec<u8> {
        let answer = match self {
            Self::Authenticate {
                mechanism,
                credentials,
            } => sieveledger_sasl::step_response(*mechanism, step, credentials),
            _ => None,
        };

        let mut buf = Vec::new();
        write_quoted(&mut buf, answer.as_deref().unwrap_or("*"));
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns the response grammar for this command.
    #[must_use]
    pub const fn response_kind(&self) -> ResponseKind {
        match self {
            Self::Greeting | Self::Capability => ResponseKind::Capabilities,
            Self::ListScripts => ResponseKind::ListScripts,
            Self::GetScript { .. } => ResponseKind::GetScript,
            _ => ResponseKind::Simple,
        }
    }

    /// Parses this command's answer from the start of `input`.
    #[must_use]
    pub fn parse_response(&self, input: &[u8]) -> ParseOutcome<Reply> {
        if matches!(self, Self::Authenticate { .. }) {
            ResponseParser::parse_sasl_step(input)
        } else {
            ResponseParser::parse(self.response_kind(), input).map(Reply::Complete)
        }
    }

    /// Returns true if a BYE answer counts as success.
    #[must_use]
    pub const fn accepts_bye(&self) -> bool {
        matches!(self, Self::Logout)
    }

    /// Returns true if the wire form carries secrets and must not be logged.
    #[must_use]
    pub const fn is_sensitive(&self) -> bool {
        matches!(self, Self::Authenticate { .. })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn wire(command: &Command) -> String {
        String::from_utf8(command.serialize().unwrap()).unwrap()
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(wire(&Command::Capability), "CAPABILITY\r\n");
        assert_eq!(wire(&Command::Logout), "LOGOUT\r\n");
        assert_eq!(wire(&Command::StartTls), "STARTTLS\r\n");
        assert_eq!(wire(&Command::ListScripts), "LISTSCRIPTS\r\n");
        assert_eq!(wire(&Command::Noop), "NOOP\r\n");
        assert!(Command::Greeting.serialize().is_none());
    }

    #[test]
    fn test_script_commands() {
        let name = "vacation".to_string();
        assert_eq!(
            wire(&Command::GetScript { name: name.clone() }),
            "GETSCRIPT \"vacation\"\r\n"
        );
        assert_eq!(
            wire(&Command::DeleteScript { name: name.clone() }),
            "DELETESCRIPT \"vacation\"\r\n"
        );
        assert_eq!(
            wire(&Command::SetActive { name }),
            "SETACTIVE \"vacation\"\r\n"
        );
        assert_eq!(
            wire(&Command::SetActive { name: String::new() }),
            "SETACTIVE \"\"\r\n"
        );
        assert_eq!(
            wire(&Command::RenameScript {
                old: "a".to_string(),
                new: "b \"2\"".to_string(),
            }),
            "RENAMESCRIPT \"a\" \"b \\\"2\\\"\"\r\n"
        );
    }

    #[test]
    fn test_putscript() {
        let command = Command::PutScript {
            name: "a".to_string(),
            body: "hello".to_string(),
        };
        assert_eq!(wire(&command), "PUTSCRIPT \"a\" {5+}\r\nhello\r\n");
    }

    #[test]
    fn test_putscript_normalizes_line_breaks() {
        let command = Command::PutScript {
            name: "a".to_string(),
            body: "keep;\nstop;".to_string(),
        };
        assert_eq!(wire(&command), "PUTSCRIPT \"a\" {12+}\r\nkeep;\r\nstop;\r\n");
    }

    #[test]
    fn test_checkscript() {
        let command = Command::CheckScript {
            body: "keep;".to_string(),
        };
        assert_eq!(wire(&command), "CHECKSCRIPT {5+}\r\nkeep;\r\n");
    }

    #[test]
    fn test_authenticate_plain() {
        let command = Command::Authenticate {
            mechanism: Mechanism::Plain,
            credentials: Credentials::new("user").with_secret("pass"),
        };
        assert_eq!(
            wire(&command),
            "AUTHENTICATE \"PLAIN\" \"AHVzZXIAcGFzcw==\"\r\n"
        );
        assert!(command.is_sensitive());
    }

    #[test]
    fn test_authenticate_login_steps() {
        let command = Command::Authenticate {
            mechanism: Mechanism::Login,
            credentials: Credentials::new("geek").with_secret("th3g33k1"),
        };
        assert_eq!(wire(&command), "AUTHENTICATE \"LOGIN\"\r\n");
        assert_eq!(command.continuation(0), b"\"Z2Vlaw==\"\r\n");
        assert_eq!(command.continuation(1), b"\"dGgzZzMzazE=\"\r\n");
        assert_eq!(command.continuation(2), b"\"*\"\r\n");
    }

    #[test]
    fn test_response_kinds() {
        assert_eq!(Command::Greeting.response_kind(), ResponseKind::Capabilities);
        assert_eq!(Command::ListScripts.response_kind(), ResponseKind::ListScripts);
        assert_eq!(
            Command::GetScript { name: "x".to_string() }.response_kind(),
            ResponseKind::GetScript
        );
        assert_eq!(Command::Noop.response_kind(), ResponseKind::Simple);
        assert!(Command::Logout.accepts_bye());
        assert!(!Command::Noop.accepts_bye());
    }
}
