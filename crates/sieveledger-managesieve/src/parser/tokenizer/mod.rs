//! ManageSieve tokenizer for server responses.
//!
//! A cursor over a caller-owned byte buffer. The `is_*` predicates inspect
//! the next token without consuming it; the `extract_*` methods consume it
//! and return the decoded value.
//!
//! Running out of bytes is reported as [`TokenError::Incomplete`], which the
//! caller retries once more data has arrived. Malformed input is reported as
//! [`TokenError::Syntax`]. The two are never conflated.

#![allow(clippy::missing_errors_doc)]

mod token;

pub use token::Token;

use thiserror::Error;

/// Largest literal the tokenizer accepts (64 MiB).
pub const MAX_LITERAL_SIZE: usize = 64 * 1024 * 1024;

/// Bytes that end a bare token.
const ATOM_DELIMITERS: &[u8] = b" \r\n()";

/// Failure while tokenizing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The buffer ends before the token does; wait for more bytes.
    #[error("Incomplete data")]
    Incomplete,

    /// The buffer holds something that can never become a valid token.
    #[error("Syntax error at position {position}: {message}")]
    Syntax {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },
}

/// Result type for tokenizer operations.
pub type TokenResult<T> = std::result::Result<T, TokenError>;

/// ManageSieve tokenizer state.
pub struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    /// Creates a new tokenizer for the given input.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Returns the current position in the input.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns the remaining input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    /// Returns true if at end of input.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Peeks at the current byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Peeks at the byte at offset from current position.
    #[must_use]
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Skips n bytes.
    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Returns true if the next bytes are CRLF.
    #[must_use]
    pub fn is_line_break(&self) -> bool {
        self.remaining().starts_with(b"\r\n")
    }

    /// Consumes a CRLF.
    pub fn extract_line_break(&mut self) -> TokenResult<()> {
        match (self.peek(), self.peek_at(1)) {
            (Some(b'\r'), Some(b'\n')) => {
                self.skip(2);
                Ok(())
            }
            (None, _) | (Some(b'\r'), None) => Err(TokenError::Incomplete),
            _ => Err(self.error("Expected CRLF")),
        }
    }

    /// Returns true if the next byte is a space.
    #[must_use]
    pub fn is_space(&self) -> bool {
        self.peek() == Some(b' ')
    }

    /// Consumes a single space.
    pub fn extract_space(&mut self) -> TokenResult<()> {
        match self.peek() {
            Some(b' ') => {
                self.skip(1);
                Ok(())
            }
            None => Err(TokenError::Incomplete),
            Some(_) => Err(self.error("Expected space")),
        }
    }

    /// Returns true if a quoted string starts here.
    #[must_use]
    pub fn is_quoted(&self) -> bool {
        self.peek() == Some(b'"')
    }

    /// Consumes a quoted string and returns its unescaped content.
    ///
    /// Only `\"` and `\\` are legal escapes. A raw CR or LF inside the
    /// quotes is a syntax error.
    pub fn extract_quoted(&mut self) -> TokenResult<String> {
        match self.peek() {
            None => return Err(TokenError::Incomplete),
            Some(b'"') => {}
            Some(_) => return Err(self.error("Expected quoted string")),
        }

        let mut result = Vec::new();
        let mut cursor = self.pos + 1;

        loop {
            match self.input.get(cursor).copied() {
                None => return Err(TokenError::Incomplete),
                Some(b'"') => break,
                Some(b'\\') => match self.input.get(cursor + 1).copied() {
                    Some(c @ (b'"' | b'\\')) => {
                        result.push(c);
                        cursor += 2;
                    }
                    None => return Err(TokenError::Incomplete),
                    Some(c) => {
                        let message = format!("Invalid escape: \\{}", char::from(c));
                        return Err(self.error_at(cursor, &message));
                    }
                },
                Some(b'\r' | b'\n') => {
                    return Err(self.error_at(cursor, "Line break in quoted string"));
                }
                Some(c) => {
                    result.push(c);
                    cursor += 1;
                }
            }
        }

        let s = String::from_utf8(result)
            .map_err(|_| self.error("Invalid UTF-8 in quoted string"))?;
        self.pos = cursor + 1;
        Ok(s)
    }

    /// Returns true if a literal starts here.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.peek() == Some(b'{')
    }

    /// Consumes a literal `{size[+]}CRLF<size bytes>` and returns its payload.
    ///
    /// Fails with [`TokenError::Incomplete`] unless the whole payload is
    /// already in the buffer.
    pub fn extract_literal(&mut self) -> TokenResult<&'a [u8]> {
        match self.peek() {
            None => return Err(TokenError::Incomplete),
            Some(b'{') => {}
            Some(_) => return Err(self.error("Expected literal")),
        }

        let start = self.pos + 1;
        let mut cursor = start;
        while let Some(b) = self.input.get(cursor).copied() {
            if b.is_ascii_digit() {
                cursor += 1;
            } else {
                break;
            }
        }

        if cursor == start {
            return match self.input.get(cursor) {
                None => Err(TokenError::Incomplete),
                Some(_) => Err(self.error_at(cursor, "Missing literal size")),
            };
        }

        // Only digits, parse cannot fail on anything but overflow
        let size: usize = std::str::from_utf8(&self.input[start..cursor])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error_at(start, "Literal size too large"))?;

        if size > MAX_LITERAL_SIZE {
            return Err(self.error_at(start, &format!("Literal size {size} exceeds maximum")));
        }

        if self.input.get(cursor) == Some(&b'+') {
            cursor += 1;
        }

        match self.input.get(cursor) {
            None => return Err(TokenError::Incomplete),
            Some(b'}') => cursor += 1,
            Some(_) => return Err(self.error_at(cursor, "Expected } after literal size")),
        }

        let saved = self.pos;
        self.pos = cursor;
        if let Err(e) = self.extract_line_break() {
            self.pos = saved;
            return Err(e);
        }

        if self.remaining().len() < size {
            self.pos = saved;
            return Err(TokenError::Incomplete);
        }

        let data = &self.input[self.pos..self.pos + size];
        self.skip(size);
        Ok(data)
    }

    /// Returns true if a quoted or literal string starts here.
    #[must_use]
    pub fn is_string(&self) -> bool {
        self.is_quoted() || self.is_literal()
    }

    /// Consumes a quoted or literal string.
    pub fn extract_string(&mut self) -> TokenResult<String> {
        if self.is_quoted() {
            return self.extract_quoted();
        }

        if self.is_literal() {
            let start = self.pos;
            let data = self.extract_literal()?;
            return String::from_utf8(data.to_vec())
                .map_err(|_| self.error_at(start, "Invalid UTF-8 in literal"));
        }

        if self.is_eof() {
            Err(TokenError::Incomplete)
        } else {
            Err(self.error("Expected string"))
        }
    }

    /// Consumes bytes up to (not including) the first of `delimiters`.
    ///
    /// Fails with [`TokenError::Incomplete`] if no delimiter is in the buffer.
    pub fn extract_token(&mut self, delimiters: &[u8]) -> TokenResult<&'a str> {
        let rest = self.remaining();
        let Some(end) = rest.iter().position(|b| delimiters.contains(b)) else {
            return Err(TokenError::Incomplete);
        };

        let token = std::str::from_utf8(&rest[..end])
            .map_err(|_| self.error("Invalid UTF-8 in token"))?;
        self.skip(end);
        Ok(token)
    }

    /// Checks case-insensitively whether the input continues with `keyword`.
    ///
    /// Fails with [`TokenError::Incomplete`] if the buffer is a strict prefix
    /// of the keyword.
    pub fn starts_with(&self, keyword: &str) -> TokenResult<bool> {
        let rest = self.remaining();
        let keyword = keyword.as_bytes();
        let n = rest.len().min(keyword.len());

        if !rest[..n].eq_ignore_ascii_case(&keyword[..n]) {
            return Ok(false);
        }

        if n < keyword.len() {
            Err(TokenError::Incomplete)
        } else {
            Ok(true)
        }
    }

    /// Reads the next token of any kind.
    pub fn next_token(&mut self) -> TokenResult<Token<'a>> {
        let Some(byte) = self.peek() else {
            return Err(TokenError::Incomplete);
        };

        match byte {
            b'\r' => {
                self.extract_line_break()?;
                Ok(Token::LineBreak)
            }
            b' ' => {
                self.skip(1);
                Ok(Token::Space)
            }
            b'"' => self.extract_quoted().map(Token::Quoted),
            b'{' => self.extract_literal().map(Token::Literal),
            b'(' | b')' => {
                let atom = std::str::from_utf8(&self.input[self.pos..=self.pos])
                    .map_err(|_| self.error("Invalid UTF-8 in token"))?;
                self.skip(1);
                Ok(Token::Atom(atom))
            }
            b'\n' => Err(self.error("Bare LF")),
            _ => {
                let atom = self.extract_token(ATOM_DELIMITERS)?;
                if atom.is_empty() {
                    Err(self.error("Empty token"))
                } else {
                    Ok(Token::Atom(atom))
                }
            }
        }
    }

    /// Creates a syntax error at the current position.
    fn error(&self, message: &str) -> TokenError {
        self.error_at(self.pos, message)
    }

    #[allow(clippy::unused_self)]
    fn error_at(&self, position: usize, message: &str) -> TokenError {
        TokenError::Syntax {
            position,
            message: message.to_string(),
        }
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
    use proptest::prelude::*;

    fn is_syntax<T: std::fmt::Debug>(result: &TokenResult<T>) -> bool {
        matches!(result, Err(TokenError::Syntax { .. }))
    }

    #[test]
    fn test_line_break() {
        let mut t = Tokenizer::new(b"\r\nX");
        assert!(t.is_line_break());
        t.extract_line_break().unwrap();
        assert_eq!(t.position(), 2);
        assert!(!t.is_line_break());
        assert!(is_syntax(&t.extract_line_break()));
    }

    #[test]
    fn test_line_break_incomplete() {
        assert_eq!(
            Tokenizer::new(b"").extract_line_break(),
            Err(TokenError::Incomplete)
        );
        assert_eq!(
            Tokenizer::new(b"\r").extract_line_break(),
            Err(TokenError::Incomplete)
        );
        assert!(is_syntax(&Tokenizer::new(b"\rX").extract_line_break()));
    }

    #[test]
    fn test_space() {
        let mut t = Tokenizer::new(b" a");
        assert!(t.is_space());
        t.extract_space().unwrap();
        assert!(!t.is_space());
        assert!(is_syntax(&t.extract_space()));
        assert_eq!(Tokenizer::new(b"").extract_space(), Err(TokenError::Incomplete));
    }

    #[test]
    fn test_quoted_simple() {
        let mut t = Tokenizer::new(b"\"IMPLEMENTATION\" \"Example\"");
        assert!(t.is_quoted());
        assert_eq!(t.extract_quoted().unwrap(), "IMPLEMENTATION");
        t.extract_space().unwrap();
        assert_eq!(t.extract_quoted().unwrap(), "Example");
        assert!(t.is_eof());
    }

    #[test]
    fn test_quoted_escapes() {
        let mut t = Tokenizer::new(br#""say \"hi\" \\o/""#);
        assert_eq!(t.extract_quoted().unwrap(), r#"say "hi" \o/"#);
    }

    #[test]
    fn test_quoted_invalid_escape() {
        assert!(is_syntax(&Tokenizer::new(br#""a\nb""#).extract_quoted()));
    }

    #[test]
    fn test_quoted_raw_line_break_is_fatal() {
        assert!(is_syntax(&Tokenizer::new(b"\"ab\r\ncd\"").extract_quoted()));
        assert!(is_syntax(&Tokenizer::new(b"\"ab\ncd\"").extract_quoted()));
    }

    #[test]
    fn test_quoted_incomplete() {
        let mut t = Tokenizer::new(b"\"IMPL");
        assert_eq!(t.extract_quoted(), Err(TokenError::Incomplete));
        // Cursor untouched so the caller can retry
        assert_eq!(t.position(), 0);
        assert_eq!(
            Tokenizer::new(b"\"a\\").extract_quoted(),
            Err(TokenError::Incomplete)
        );
    }

    #[test]
    fn test_literal() {
        let mut t = Tokenizer::new(b"{5}\r\nhello\r\n");
        assert!(t.is_literal());
        assert_eq!(t.extract_literal().unwrap(), b"hello");
        assert!(t.is_line_break());
    }

    #[test]
    fn test_literal_plus() {
        let mut t = Tokenizer::new(b"{5+}\r\nhello");
        assert_eq!(t.extract_literal().unwrap(), b"hello");
        assert!(t.is_eof());
    }

    #[test]
    fn test_literal_empty() {
        let mut t = Tokenizer::new(b"{0}\r\n");
        assert_eq!(t.extract_literal().unwrap(), b"");
    }

    #[test]
    fn test_literal_incomplete_is_not_syntax_error() {
        let cases: [&[u8]; 7] = [
            b"{",
            b"{1",
            b"{12",
            b"{12}",
            b"{12}\r",
            b"{12}\r\n",
            b"{12}\r\nVXNlcm5h",
        ];
        for partial in cases {
            let mut t = Tokenizer::new(partial);
            assert_eq!(t.extract_literal(), Err(TokenError::Incomplete), "{partial:?}");
            assert_eq!(t.position(), 0);
        }
    }

    #[test]
    fn test_literal_malformed() {
        assert!(is_syntax(&Tokenizer::new(b"{x}\r\n").extract_literal()));
        assert!(is_syntax(&Tokenizer::new(b"{5x\r\n").extract_literal()));
        assert!(is_syntax(&Tokenizer::new(b"{5}xxhello").extract_literal()));
        assert!(is_syntax(&Tokenizer::new(b"{99999999999}\r\n").extract_literal()));
    }

    #[test]
    fn test_literal_embedded_line_breaks() {
        let mut t = Tokenizer::new(b"{8}\r\na\r\nb\r\nc\r\n");
        assert_eq!(t.extract_literal().unwrap(), b"a\r\nb\r\nc");
        assert!(t.is_line_break());
    }

    #[test]
    fn test_extract_string() {
        let mut t = Tokenizer::new(b"\"one\" {3}\r\ntwo");
        assert!(t.is_string());
        assert_eq!(t.extract_string().unwrap(), "one");
        t.extract_space().unwrap();
        assert!(t.is_string());
        assert_eq!(t.extract_string().unwrap(), "two");
        assert_eq!(t.extract_string(), Err(TokenError::Incomplete));
        assert!(is_syntax(&Tokenizer::new(b"OK").extract_string()));
    }

    #[test]
    fn test_extract_token() {
        let mut t = Tokenizer::new(b"ACTIVE\r\n");
        assert_eq!(t.extract_token(b"\r").unwrap(), "ACTIVE");
        assert!(t.is_line_break());

        let mut t = Tokenizer::new(b"ACTIV");
        assert_eq!(t.extract_token(b"\r"), Err(TokenError::Incomplete));
    }

    #[test]
    fn test_starts_with() {
        let t = Tokenizer::new(b"ok (SASL)");
        assert_eq!(t.starts_with("OK"), Ok(true));
        assert_eq!(t.starts_with("NO"), Ok(false));
        assert_eq!(Tokenizer::new(b"B").starts_with("BYE"), Err(TokenError::Incomplete));
        assert_eq!(Tokenizer::new(b"BX").starts_with("BYE"), Ok(false));
    }

    #[test]
    fn test_next_token() {
        let mut t = Tokenizer::new(b"(REFERRAL \"sieve://a\") {2}\r\nhi\r\n");
        assert_eq!(t.next_token().unwrap(), Token::Atom("("));
        assert_eq!(t.next_token().unwrap(), Token::Atom("REFERRAL"));
        assert_eq!(t.next_token().unwrap(), Token::Space);
        assert_eq!(t.next_token().unwrap(), Token::Quoted("sieve://a".to_string()));
        assert_eq!(t.next_token().unwrap(), Token::Atom(")"));
        assert_eq!(t.next_token().unwrap(), Token::Space);
        assert_eq!(t.next_token().unwrap(), Token::Literal(b"hi"));
        assert_eq!(t.next_token().unwrap(), Token::LineBreak);
        assert_eq!(t.next_token(), Err(TokenError::Incomplete));
    }

    proptest! {
        #[test]
        fn prop_literal_round_trip(body in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut wire = format!("{{{}+}}\r\n", body.len()).into_bytes();
            wire.extend_from_slice(&body);
            let mut t = Tokenizer::new(&wire);
            prop_assert_eq!(t.extract_literal().unwrap(), &body[..]);
            prop_assert!(t.is_eof());
        }

        #[test]
        fn prop_literal_prefix_is_incomplete(body in proptest::collection::vec(any::<u8>(), 1..128), cut in 0usize..128) {
            let mut wire = format!("{{{}}}\r\n", body.len()).into_bytes();
            wire.extend_from_slice(&body);
            let cut = cut % wire.len();
            let mut t = Tokenizer::new(&wire[..cut]);
            prop_assert_eq!(t.extract_literal(), Err(TokenError::Incomplete));
        }
    }
}
