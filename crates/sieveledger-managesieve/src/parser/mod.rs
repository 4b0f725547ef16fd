//! ManageSieve protocol parser.
//!
//! This module provides a sans-I/O parser for ManageSieve server responses
//! (RFC 5804).
//!
//! # Architecture
//!
//! - **Tokenizer**: cursor over raw bytes yielding line breaks, spaces,
//!   quoted strings, literals and bare tokens
//! - **Response Parser**: builds typed responses from tokens
//!
//! Every parse returns a [`ParseOutcome`]: the caller can always tell
//! "wait for more bytes" apart from "this response is broken".
//!
//! # Example
//!
//! ```
//! use sieveledger_managesieve::parser::{ParseOutcome, ResponseKind, ResponseParser};
//!
//! let mut buffer = b"NO \"Not yet".to_vec();
//! assert!(ResponseParser::parse(ResponseKind::Simple, &buffer).is_incomplete());
//!
//! buffer.extend_from_slice(b"\"\r\n");
//! let outcome = ResponseParser::parse(ResponseKind::Simple, &buffer);
//! assert!(matches!(outcome, ParseOutcome::Parsed { consumed: 14, .. }));
//! ```

pub mod response;
pub mod tokenizer;

pub use response::{Payload, Reply, Response, ResponseKind, ResponseParser};
pub use tokenizer::{Token, TokenError, TokenResult, Tokenizer};

use crate::Error;

/// Result of attempting to parse one response from a buffer.
#[derive(Debug)]
pub enum ParseOutcome<T> {
    /// The buffer holds only part of the response.
    Incomplete,
    /// A complete value was parsed from the first `consumed` bytes.
    Parsed {
        /// The parsed value.
        value: T,
        /// Number of bytes the value occupied.
        consumed: usize,
    },
    /// The buffer does not hold a valid response.
    Fatal(Error),
}

impl<T> ParseOutcome<T> {
    /// Runs a tokenizer-level parse function over `input`.
    pub fn run<F>(input: &[u8], parse: F) -> Self
    where
        F: FnOnce(&mut Tokenizer<'_>) -> TokenResult<T>,
    {
        let mut tokenizer = Tokenizer::new(input);
        match parse(&mut tokenizer) {
            Ok(value) => Self::Parsed {
                value,
                consumed: tokenizer.position(),
            },
            Err(TokenError::Incomplete) => Self::Incomplete,
            Err(TokenError::Syntax { position, message }) => {
                Self::Fatal(Error::Parse { position, message })
            }
        }
    }

    /// Returns true if more bytes are needed.
    #[must_use]
    pub const fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete)
    }

    /// Maps the parsed value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ParseOutcome<U> {
        match self {
            Self::Incomplete => ParseOutcome::Incomplete,
            Self::Parsed { value, consumed } => ParseOutcome::Parsed {
                value: f(value),
                consumed,
            },
            Self::Fatal(e) => ParseOutcome::Fatal(e),
        }
    }
}
