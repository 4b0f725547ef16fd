//! Command serialization helpers.

/// Longest string sent as a quoted string; longer ones become literals.
pub const MAX_QUOTED_LEN: usize = 1024;

/// Writes a string argument, quoted when possible and as a literal otherwise.
pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    if s.len() > MAX_QUOTED_LEN || s.bytes().any(needs_literal) {
        write_literal(buf, s.as_bytes());
    } else {
        write_quoted(buf, s);
    }
}

/// Writes a quoted string, escaping `"` and `\`.
pub fn write_quoted(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for b in s.bytes() {
        if b == b'"' || b == b'\\' {
            buf.push(b'\\');
        }
        buf.push(b);
    }
    buf.push(b'"');
}

/// Writes a non-synchronizing literal: `{n+}CRLF` followed by the bytes.
pub fn write_literal(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(format!("{{{}+}}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
}

/// Returns true if the byte cannot appear inside a quoted string.
const fn needs_literal(b: u8) -> bool {
    matches!(b, b'\r' | b'\n' | 0)
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
    use crate::parser::Tokenizer;
    use proptest::prelude::*;

    #[test]
    fn test_write_quoted_escapes() {
        let mut buf = Vec::new();
        write_quoted(&mut buf, r#"a"b\c"#);
        assert_eq!(buf, br#""a\"b\\c""#);
    }

    #[test]
    fn test_write_literal() {
        let mut buf = Vec::new();
        write_literal(&mut buf, b"hello");
        assert_eq!(buf, b"{5+}\r\nhello");

        let mut buf = Vec::new();
        write_literal(&mut buf, b"");
        assert_eq!(buf, b"{0+}\r\n");
    }

    #[test]
    fn test_write_string_picks_literal_for_line_breaks() {
        let mut buf = Vec::new();
        write_string(&mut buf, "two\r\nlines");
        assert_eq!(buf, b"{10+}\r\ntwo\r\nlines");

        let mut buf = Vec::new();
        write_string(&mut buf, "plain");
        assert_eq!(buf, b"\"plain\"");

        let long = "x".repeat(MAX_QUOTED_LEN + 1);
        let mut buf = Vec::new();
        write_string(&mut buf, &long);
        assert!(buf.starts_with(b"{1025+}\r\n"));
    }

    #[test]
    fn test_literal_round_trip_edge_bodies() {
        let bodies: [&[u8]; 5] = [b"", b"a", b"line one\r\nline two\r\n", b"\r", b"\n\n"];
        for body in bodies {
            let mut buf = Vec::new();
            write_literal(&mut buf, body);
            let mut t = Tokenizer::new(&buf);
            assert_eq!(t.extract_literal().unwrap(), body);
            assert!(t.is_eof());
        }
    }

    proptest! {
        #[test]
        fn prop_quoted_round_trip(s in "[^\r\n]{0,64}") {
            let mut buf = Vec::new();
            write_quoted(&mut buf, &s);
            let mut t = Tokenizer::new(&buf);
            prop_assert_eq!(t.extract_quoted().unwrap(), s);
            prop_assert!(t.is_eof());
        }

        #[test]
        fn prop_quoted_round_trip_specials(parts in proptest::collection::vec(prop_oneof![Just("\""), Just("\\"), Just("a"), Just("é")], 0..32)) {
            let s: String = parts.concat();
            let mut buf = Vec::new();
            write_quoted(&mut buf, &s);
            let mut t = Tokenizer::new(&buf);
            prop_assert_eq!(t.extract_quoted().unwrap(), s);
        }

        #[test]
        fn prop_string_round_trip(s in "\\PC{0,64}(\r\n\\PC{0,16})?") {
            let mut buf = Vec::new();
            write_string(&mut buf, &s);
            let mut t = Tokenizer::new(&buf);
            prop_assert_eq!(t.extract_string().unwrap(), s);
        }
    }
}
