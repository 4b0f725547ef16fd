//! SASL payload builders.
//!
//! Every function returns the payload already base64 encoded, ready to be
//! placed in a quoted string on the wire.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::{Mechanism, Result};

/// Credentials handed over by the host application.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Authentication identity.
    pub username: String,
    /// Password, or access token for the OAuth mechanisms.
    pub secret: Option<String>,
    /// Identity to act as (proxy authentication), if any.
    pub authorization: Option<String>,
}

impl Credentials {
    /// Creates credentials for a username without a secret.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: None,
            authorization: None,
        }
    }

    /// Sets the password or token.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Sets the authorization identity.
    #[must_use]
    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    fn secret(&self) -> &str {
        self.secret.as_deref().unwrap_or_default()
    }

    fn authorization(&self) -> &str {
        self.authorization.as_deref().unwrap_or_default()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("authorization", &self.authorization)
            .finish()
    }
}

/// Returns the initial response sent together with `AUTHENTICATE`, if the
/// mechanism has one.
///
/// # Example
///
/// ```
/// use sieveledger_sasl::{Credentials, Mechanism, initial_response};
///
/// let credentials = Credentials::new("user").with_secret("pass");
/// assert_eq!(
///     initial_response(Mechanism::Plain, &credentials).as_deref(),
///     Some("AHVzZXIAcGFzcw==")
/// );
/// assert_eq!(initial_response(Mechanism::Login, &credentials), None);
/// ```
#[must_use]
pub fn initial_response(mechanism: Mechanism, credentials: &Credentials) -> Option<String> {
    match mechanism {
        Mechanism::Plain => Some(plain_response(
            credentials.authorization(),
            &credentials.username,
            credentials.secret(),
        )),
        Mechanism::External => Some(STANDARD.encode(credentials.authorization())),
        Mechanism::OAuthBearer => Some(oauthbearer_response(
            &credentials.username,
            credentials.secret(),
        )),
        Mechanism::XOAuth2 => Some(xoauth2_response(
            &credentials.username,
            credentials.secret(),
        )),
        Mechanism::Login => None,
    }
}

/// Returns the answer to the `step`-th server challenge (zero based).
///
/// `None` means the mechanism has nothing more to say; the caller should
/// cancel the exchange.
#[must_use]
pub fn step_response(mechanism: Mechanism, step: usize, credentials: &Credentials) -> Option<String> {
    match (mechanism, step) {
        (Mechanism::Login, 0) => Some(STANDARD.encode(&credentials.username)),
        (Mechanism::Login, 1) => Some(STANDARD.encode(credentials.secret())),
        // RFC 7628: a failed OAUTHBEARER exchange wants a dummy ^A to finish
        (Mechanism::OAuthBearer, 0) => Some(STANDARD.encode("\x01")),
        _ => None,
    }
}

/// Decodes a base64 server challenge into text.
///
/// # Errors
///
/// Returns an error if the challenge is not valid base64.
pub fn decode_challenge(challenge: &str) -> Result<String> {
    let bytes = STANDARD.decode(challenge.trim())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Generates a PLAIN initial response: `authz\0user\0pass`, base64 encoded.
#[must_use]
pub fn plain_response(authorization: &str, username: &str, password: &str) -> String {
    STANDARD.encode(format!("{authorization}\0{username}\0{password}"))
}

/// Generates an OAUTHBEARER initial response (RFC 7628).
#[must_use]
pub fn oauthbearer_response(user: &str, token: &str) -> String {
    STANDARD.encode(format!("n,a={user},\x01auth=Bearer {token}\x01\x01"))
}

/// Generates an XOAUTH2 initial response.
#[must_use]
pub fn xoauth2_response(user: &str, token: &str) -> String {
    STANDARD.encode(format!("user={user}\x01auth=Bearer {token}\x01\x01"))
}

/// Parses the JSON error a server sends in an OAUTHBEARER failure challenge.
///
/// # Errors
///
/// Returns an error if the challenge is not valid base64 or JSON.
pub fn parse_oauth_error(challenge: &str) -> Result<OAuthError> {
    let json = decode_challenge(challenge)?;
    Ok(serde_json::from_str(&json)?)
}

/// `OAuth2` error reported by the server inside a SASL challenge.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuthError {
    /// HTTP style status code.
    pub status: String,
    /// Authentication schemes supported.
    #[serde(default)]
    pub schemes: Option<String>,
    /// `OAuth2` scope required.
    #[serde(default)]
    pub scope: Option<String>,
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

    fn decode(s: &str) -> String {
        String::from_utf8(STANDARD.decode(s).unwrap()).unwrap()
    }

    #[test]
    fn test_plain_response_format() {
        assert_eq!(decode(&plain_response("", "test", "pass")), "\0test\0pass");
        assert_eq!(
            decode(&plain_response("admin", "test", "pass")),
            "admin\0test\0pass"
        );
    }

    #[test]
    fn test_plain_initial_response_with_authorization() {
        let credentials = Credentials::new("user")
            .with_secret("pass@word!")
            .with_authorization("boss");
        let payload = initial_response(Mechanism::Plain, &credentials).unwrap();
        assert_eq!(decode(&payload), "boss\0user\0pass@word!");
    }

    #[test]
    fn test_external_initial_response() {
        let credentials = Credentials::new("ignored");
        assert_eq!(
            initial_response(Mechanism::External, &credentials).as_deref(),
            Some("")
        );

        let credentials = credentials.with_authorization("other");
        assert_eq!(
            decode(&initial_response(Mechanism::External, &credentials).unwrap()),
            "other"
        );
    }

    #[test]
    fn test_login_steps() {
        let credentials = Credentials::new("geek").with_secret("th3g33k1");
        assert_eq!(initial_response(Mechanism::Login, &credentials), None);
        assert_eq!(
            step_response(Mechanism::Login, 0, &credentials).as_deref(),
            Some("Z2Vlaw==")
        );
        assert_eq!(
            step_response(Mechanism::Login, 1, &credentials).as_deref(),
            Some("dGgzZzMzazE=")
        );
        assert_eq!(step_response(Mechanism::Login, 2, &credentials), None);
        assert_eq!(step_response(Mechanism::Plain, 0, &credentials), None);
    }

    #[test]
    fn test_oauthbearer_format() {
        assert_eq!(
            decode(&oauthbearer_response("test@test.com", "abc")),
            "n,a=test@test.com,\x01auth=Bearer abc\x01\x01"
        );
    }

    #[test]
    fn test_xoauth2_format() {
        assert_eq!(
            decode(&xoauth2_response("test@test.com", "abc")),
            "user=test@test.com\x01auth=Bearer abc\x01\x01"
        );
    }

    #[test]
    fn test_decode_challenge() {
        assert_eq!(decode_challenge("VXNlcm5hbWU6").unwrap(), "Username:");
        assert!(decode_challenge("not base64!").is_err());
    }

    #[test]
    fn test_parse_oauth_error() {
        let json = r#"{"status":"401","schemes":"bearer","scope":"https://mail.google.com/"}"#;
        let error = parse_oauth_error(&STANDARD.encode(json)).unwrap();

        assert_eq!(error.status, "401");
        assert_eq!(error.schemes.as_deref(), Some("bearer"));
        assert_eq!(error.scope.as_deref(), Some("https://mail.google.com/"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credentials = Credentials::new("user").with_secret("hunter2");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
