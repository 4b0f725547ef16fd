//! Script listing entries and body helpers.

/// One line of a `LISTSCRIPTS` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    /// Script name.
    pub name: String,
    /// True if this is the active script.
    pub active: bool,
}

impl ScriptEntry {
    /// Creates a new entry.
    #[must_use]
    pub fn new(name: impl Into<String>, active: bool) -> Self {
        Self {
            name: name.into(),
            active,
        }
    }
}

/// Returns the active script in a listing, if any.
#[must_use]
pub fn active_script(scripts: &[ScriptEntry]) -> Option<&ScriptEntry> {
    scripts.iter().find(|s| s.active)
}

/// Normalises every line break in a script body to CRLF.
///
/// Recognised breaks: CRLF, CR, LF, NEL (U+0085), FF (U+000C),
/// LS (U+2028) and PS (U+2029).
#[must_use]
pub fn normalize_line_breaks(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + body.len() / 16);
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' | '\u{0085}' | '\u{000C}' | '\u{2028}' | '\u{2029}' => out.push_str("\r\n"),
            c => out.push(c),
        }
    }

    out
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
    fn test_normalize_line_breaks() {
        assert_eq!(normalize_line_breaks("a\nb\r\nc\rd"), "a\r\nb\r\nc\r\nd");
        assert_eq!(normalize_line_breaks("x\u{2028}y\u{0085}"), "x\r\ny\r\n");
        assert_eq!(normalize_line_breaks("\r\r\n"), "\r\n\r\n");
        assert_eq!(normalize_line_breaks("hello"), "hello");
        assert_eq!(normalize_line_breaks(""), "");
    }

    #[test]
    fn test_active_script() {
        let scripts = vec![ScriptEntry::new("a", false), ScriptEntry::new("b", true)];
        assert_eq!(active_script(&scripts).unwrap().name, "b");
        assert!(active_script(&scripts[..1]).is_none());
    }
}
