//! SASL mechanism names and selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A SASL mechanism whose payloads this crate can frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mechanism {
    /// PLAIN (RFC 4616).
    Plain,
    /// LOGIN, a legacy two-step dialog.
    Login,
    /// EXTERNAL (RFC 4422 appendix A).
    External,
    /// OAUTHBEARER (RFC 7628).
    #[serde(rename = "OAUTHBEARER")]
    OAuthBearer,
    /// XOAUTH2.
    #[serde(rename = "XOAUTH2")]
    XOAuth2,
}

impl Mechanism {
    /// Returns the mechanism name as sent on the wire.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::External => "EXTERNAL",
            Self::OAuthBearer => "OAUTHBEARER",
            Self::XOAuth2 => "XOAUTH2",
        }
    }

    /// Returns true if the mechanism needs a password or token.
    #[must_use]
    pub const fn needs_secret(self) -> bool {
        !matches!(self, Self::External)
    }

    /// Returns true if the mechanism can carry an authorization identity
    /// (proxy authentication).
    #[must_use]
    pub const fn is_authorizable(self) -> bool {
        matches!(self, Self::Plain | Self::External)
    }

    /// Returns true if the mechanism sends its credentials in answer to
    /// server challenges instead of an initial response.
    #[must_use]
    pub const fn is_multi_step(self) -> bool {
        matches!(self, Self::Login)
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mechanism {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            "LOGIN" => Ok(Self::Login),
            "EXTERNAL" => Ok(Self::External),
            "OAUTHBEARER" => Ok(Self::OAuthBearer),
            "XOAUTH2" => Ok(Self::XOAuth2),
            _ => Err(Error::UnknownMechanism(s.to_string())),
        }
    }
}

/// How a client picks its SASL mechanism.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    /// Pick the first supported mechanism in server order, LOGIN last.
    #[default]
    Automatic,
    /// Skip authentication entirely.
    None,
    /// Always use this mechanism.
    Forced(Mechanism),
}

/// Selects a mechanism from the server's advertised list.
///
/// Returns `Ok(None)` when the preference disables authentication.
///
/// # Errors
///
/// Returns [`Error::NoCommonMechanism`] if nothing in the list is supported
/// and [`Error::NotAdvertised`] if a forced mechanism is missing from it.
pub fn select(advertised: &[String], preference: &Preference) -> Result<Option<Mechanism>> {
    match preference {
        Preference::None => Ok(None),
        Preference::Forced(mechanism) => {
            if advertised
                .iter()
                .any(|name| name.eq_ignore_ascii_case(mechanism.name()))
            {
                Ok(Some(*mechanism))
            } else {
                Err(Error::NotAdvertised(mechanism.name().to_string()))
            }
        }
        Preference::Automatic => {
            let mut login = false;
            for name in advertised {
                match name.parse::<Mechanism>() {
                    // LOGIN is deprecated, only used when nothing else fits
                    Ok(Mechanism::Login) => login = true,
                    Ok(mechanism) => return Ok(Some(mechanism)),
                    Err(_) => {}
                }
            }

            if login {
                Ok(Some(Mechanism::Login))
            } else {
                Err(Error::NoCommonMechanism(advertised.to_vec()))
            }
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

    fn list(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("plain".parse::<Mechanism>().unwrap(), Mechanism::Plain);
        assert_eq!("XOAuth2".parse::<Mechanism>().unwrap(), Mechanism::XOAuth2);
        assert!("SCRAM-SHA-1".parse::<Mechanism>().is_err());
    }

    #[test]
    fn test_select_server_order() {
        let advertised = list(&["EXTERNAL", "PLAIN"]);
        assert_eq!(
            select(&advertised, &Preference::Automatic).unwrap(),
            Some(Mechanism::External)
        );
    }

    #[test]
    fn test_select_login_last() {
        let advertised = list(&["LOGIN", "SCRAM-SHA-1", "PLAIN"]);
        assert_eq!(
            select(&advertised, &Preference::Automatic).unwrap(),
            Some(Mechanism::Plain)
        );

        let advertised = list(&["SCRAM-SHA-1", "LOGIN"]);
        assert_eq!(
            select(&advertised, &Preference::Automatic).unwrap(),
            Some(Mechanism::Login)
        );
    }

    #[test]
    fn test_select_nothing_supported() {
        let advertised = list(&["SCRAM-SHA-256", "GSSAPI"]);
        let err = select(&advertised, &Preference::Automatic).unwrap_err();
        assert!(matches!(err, Error::NoCommonMechanism(names) if names.len() == 2));
    }

    #[test]
    fn test_select_forced() {
        let advertised = list(&["plain", "login"]);
        assert_eq!(
            select(&advertised, &Preference::Forced(Mechanism::Login)).unwrap(),
            Some(Mechanism::Login)
        );
        assert!(matches!(
            select(&advertised, &Preference::Forced(Mechanism::External)),
            Err(Error::NotAdvertised(_))
        ));
    }

    #[test]
    fn test_select_none() {
        assert_eq!(select(&[], &Preference::None).unwrap(), None);
    }

    #[test]
    fn test_preference_serde() {
        let json = serde_json::to_string(&Preference::Forced(Mechanism::OAuthBearer)).unwrap();
        assert_eq!(json, r#"{"forced":"OAUTHBEARER"}"#);
        let back: Preference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Preference::Forced(Mechanism::OAuthBearer));
    }
}
