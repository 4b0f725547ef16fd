//! Transmit types for outgoing protocol data.
//!
// Allow missing_const_for_fn since Vec methods aren't const in stable Rust.
#![allow(clippy::missing_const_for_fn)]
//!
//! The engine produces these; the I/O layer writes them to the socket.

/// Data to transmit to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Raw bytes to send to the server.
    pub data: Vec<u8>,
    /// The bytes carry credentials and must not be logged.
    pub sensitive: bool,
}

impl Transmit {
    /// Creates a new transmit from bytes.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            sensitive: false,
        }
    }

    /// Creates a transmit whose content must stay out of logs.
    #[must_use]
    pub fn sensitive(data: Vec<u8>) -> Self {
        Self {
            data,
            sensitive: true,
        }
    }

    /// Returns a loggable rendering of the data.
    #[must_use]
    pub fn redacted(&self) -> String {
        if self.sensitive {
            format!("<{} bytes redacted>", self.data.len())
        } else {
            String::from_utf8_lossy(&self.data).into_owned()
        }
    }
}

impl AsRef<[u8]> for Transmit {
    fn as_ref(&self) -> &[u8] {
        &self.data
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

    #[test]
    fn test_transmit_new() {
        let t = Transmit::new(b"NOOP\r\n".to_vec());
        assert_eq!(t.data, b"NOOP\r\n");
        assert!(!t.sensitive);
    }

    #[test]
    fn test_redacted() {
        let t = Transmit::new(b"LISTSCRIPTS\r\n".to_vec());
        assert_eq!(t.redacted(), "LISTSCRIPTS\r\n");

        let t = Transmit::sensitive(b"AUTHENTICATE \"PLAIN\" \"secret\"\r\n".to_vec());
        assert_eq!(t.redacted(), "<31 bytes redacted>");
        assert!(!t.redacted().contains("secret"));
    }

    #[test]
    fn test_transmit_as_ref() {
        let t = Transmit::new(vec![1, 2, 3]);
        let slice: &[u8] = t.as_ref();
        assert_eq!(slice, &[1, 2, 3]);
    }
}
