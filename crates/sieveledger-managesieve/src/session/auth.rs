//! Authentication hook.

use std::fmt;

use sieveledger_sasl::{Credentials, Mechanism};

use crate::Result;
use crate::connection::Account;

/// Supplies credentials for an account.
///
/// Called once per connection attempt, after the mechanism was chosen from
/// the server's SASL list. Secret storage and prompting stay with the host.
pub trait Authenticator: Send + Sync {
    /// Returns the credentials for `account` under `mechanism`.
    ///
    /// # Errors
    ///
    /// Returns an error to abort the connection, e.g. when the user
    /// cancelled a password prompt.
    fn credentials(&self, account: &Account, mechanism: Mechanism) -> Result<Credentials>;
}

/// An authenticator holding a fixed password or token.
#[derive(Clone)]
pub struct StaticAuthenticator {
    secret: String,
    authorization: Option<String>,
}

impl StaticAuthenticator {
    /// Creates an authenticator answering with `secret`.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            authorization: None,
        }
    }

    /// Acts on behalf of another user (PLAIN and EXTERNAL only).
    #[must_use]
    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }
}

impl fmt::Debug for StaticAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticAuthenticator")
            .field("secret", &"<redacted>")
            .field("authorization", &self.authorization)
            .finish()
    }
}

impl Authenticator for StaticAuthenticator {
    fn credentials(&self, account: &Account, mechanism: Mechanism) -> Result<Credentials> {
        let mut credentials = Credentials::new(account.username.clone());
        if mechanism.needs_secret() {
            credentials = credentials.with_secret(self.secret.clone());
        }
        if mechanism.is_authorizable()
            && let Some(authorization) = &self.authorization
        {
            credentials = credentials.with_authorization(authorization.clone());
        }
        Ok(credentials)
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
    use crate::connection::Config;

    #[test]
    fn test_static_authenticator() {
        let account = Account::new("k", "alice", Config::new("localhost"));
        let auth = StaticAuthenticator::new("pw").with_authorization("bob");

        let plain = auth.credentials(&account, Mechanism::Plain).unwrap();
        assert_eq!(
            sieveledger_sasl::initial_response(Mechanism::Plain, &plain).unwrap(),
            sieveledger_sasl::payload::plain_response("bob", "alice", "pw")
        );

        let login = auth.credentials(&account, Mechanism::Login).unwrap();
        assert_eq!(login.authorization, None);
        assert!(!format!("{auth:?}").contains("pw"));
    }
}
