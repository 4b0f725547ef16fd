//! ManageSieve token types.

/// Token types produced by the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// CRLF line ending.
    LineBreak,
    /// Single space.
    Space,
    /// Quoted string with escapes resolved.
    Quoted(String),
    /// Literal string payload, borrowed from the input buffer.
    Literal(&'a [u8]),
    /// Bare token (atom), including single `(` and `)`.
    Atom(&'a str),
}
