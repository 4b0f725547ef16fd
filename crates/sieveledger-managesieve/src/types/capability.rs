//! Server capabilities.

/// Language tag used when the server does not announce one.
pub const DEFAULT_LANGUAGE: &str = "i-default";

/// Capability listing announced by a ManageSieve server.
///
/// Built from the `"KEY" ["VALUE"]` lines of a greeting or `CAPABILITY`
/// response. The raw entries are kept in server order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: Vec<(String, Option<String>)>,
    implementation: Option<String>,
    version: Option<String>,
    sasl: Vec<String>,
    sieve: Vec<String>,
    notify: Vec<String>,
    language: Option<String>,
    owner: Option<String>,
    max_redirects: Option<u32>,
    starttls: bool,
    rename: bool,
    noop: bool,
    unauthenticate: bool,
}

impl Capabilities {
    /// Builds capabilities from raw key/value entries.
    #[must_use]
    pub fn from_entries(entries: Vec<(String, Option<String>)>) -> Self {
        let mut caps = Self::default();

        for (key, value) in &entries {
            let value_str = value.as_deref().unwrap_or_default();
            match key.to_ascii_uppercase().as_str() {
                "IMPLEMENTATION" => caps.implementation = Some(value_str.to_string()),
                "VERSION" => caps.version = Some(value_str.to_string()),
                "SASL" => caps.sasl = split_list(value_str),
                "SIEVE" => caps.sieve = split_list(value_str),
                "NOTIFY" => caps.notify = split_list(value_str),
                "LANGUAGE" => caps.language = Some(value_str.to_string()),
                "OWNER" => caps.owner = Some(value_str.to_string()),
                "MAXREDIRECTS" => caps.max_redirects = value_str.trim().parse().ok(),
                "STARTTLS" => caps.starttls = true,
                "RENAME" => caps.rename = true,
                "NOOP" => caps.noop = true,
                "UNAUTHENTICATE" => caps.unauthenticate = true,
                _ => {}
            }
        }

        caps.entries = entries;
        caps
    }

    /// Returns the raw entries in server order.
    #[must_use]
    pub fn entries(&self) -> &[(String, Option<String>)] {
        &self.entries
    }

    /// Looks up a raw entry by key (case-insensitive).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_deref())
    }

    /// Returns the server implementation string.
    #[must_use]
    pub fn implementation(&self) -> Option<&str> {
        self.implementation.as_deref()
    }

    /// Returns the protocol version, if announced.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Returns the SASL mechanisms in server order.
    #[must_use]
    pub fn sasl(&self) -> &[String] {
        &self.sasl
    }

    /// Returns the Sieve language extensions.
    #[must_use]
    pub fn sieve_extensions(&self) -> &[String] {
        &self.sieve
    }

    /// Returns the notification methods.
    #[must_use]
    pub fn notify(&self) -> &[String] {
        &self.notify
    }

    /// Returns the language tag for human readable messages.
    #[must_use]
    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
    }

    /// Returns the authenticated user, announced after login.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Returns the redirect limit per script execution.
    #[must_use]
    pub const fn max_redirects(&self) -> Option<u32> {
        self.max_redirects
    }

    /// Returns true if STARTTLS is offered.
    #[must_use]
    pub const fn has_starttls(&self) -> bool {
        self.starttls
    }

    /// Returns true if UNAUTHENTICATE is offered.
    #[must_use]
    pub const fn has_unauthenticate(&self) -> bool {
        self.unauthenticate
    }

    /// Returns true if the server speaks RFC 5804 (VERSION 1.0 or later).
    #[must_use]
    pub fn is_rfc5804(&self) -> bool {
        self.version
            .as_deref()
            .and_then(|v| v.trim().split('.').next())
            .and_then(|major| major.parse::<u32>().ok())
            .is_some_and(|major| major >= 1)
    }

    /// Returns true if RENAMESCRIPT is available.
    #[must_use]
    pub fn can_rename(&self) -> bool {
        self.rename || self.is_rfc5804()
    }

    /// Returns true if NOOP is available.
    #[must_use]
    pub fn can_noop(&self) -> bool {
        self.noop || self.is_rfc5804()
    }

    /// Returns true if CHECKSCRIPT is available.
    #[must_use]
    pub fn can_check_script(&self) -> bool {
        self.is_rfc5804()
    }

    /// Returns true if the Sieve extension is supported.
    #[must_use]
    pub fn supports_extension(&self, extension: &str) -> bool {
        self.sieve.iter().any(|e| e.eq_ignore_ascii_case(extension))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(ToString::to_string).collect()
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

    fn entry(key: &str, value: Option<&str>) -> (String, Option<String>) {
        (key.to_string(), value.map(ToString::to_string))
    }

    #[test]
    fn test_dovecot_listing() {
        let caps = Capabilities::from_entries(vec![
            entry("IMPLEMENTATION", Some("Dovecot Pigeonhole")),
            entry("SIEVE", Some("fileinto reject envelope vacation")),
            entry("NOTIFY", Some("mailto")),
            entry("SASL", Some("PLAIN LOGIN")),
            entry("STARTTLS", None),
            entry("VERSION", Some("1.0")),
        ]);

        assert_eq!(caps.implementation(), Some("Dovecot Pigeonhole"));
        assert_eq!(caps.sasl(), ["PLAIN", "LOGIN"]);
        assert!(caps.supports_extension("VACATION"));
        assert!(caps.has_starttls());
        assert_eq!(caps.language(), DEFAULT_LANGUAGE);
        assert!(caps.can_rename());
        assert!(caps.can_noop());
        assert!(caps.can_check_script());
        assert_eq!(caps.entries().len(), 6);
    }

    #[test]
    fn test_legacy_server_flags() {
        let caps = Capabilities::from_entries(vec![
            entry("IMPLEMENTATION", Some("Cyrus timsieved v2.2")),
            entry("RENAME", None),
        ]);

        assert!(!caps.is_rfc5804());
        assert!(caps.can_rename());
        assert!(!caps.can_noop());
        assert!(!caps.can_check_script());
        assert!(!caps.has_starttls());
    }

    #[test]
    fn test_version_parsing() {
        let caps = Capabilities::from_entries(vec![entry("VERSION", Some("0.9"))]);
        assert!(!caps.is_rfc5804());
        let caps = Capabilities::from_entries(vec![entry("VERSION", Some("2.1"))]);
        assert!(caps.is_rfc5804());
        let caps = Capabilities::from_entries(vec![entry("VERSION", Some("garbage"))]);
        assert!(!caps.is_rfc5804());
    }

    #[test]
    fn test_get_and_extra_fields() {
        let caps = Capabilities::from_entries(vec![
            entry("MAXREDIRECTS", Some("5")),
            entry("OWNER", Some("alice")),
            entry("LANGUAGE", Some("de")),
            entry("X-CUSTOM", Some("yes")),
        ]);
        assert_eq!(caps.max_redirects(), Some(5));
        assert_eq!(caps.owner(), Some("alice"));
        assert_eq!(caps.language(), "de");
        assert_eq!(caps.get("x-custom"), Some(Some("yes")));
        assert_eq!(caps.get("missing"), None);
    }
}
