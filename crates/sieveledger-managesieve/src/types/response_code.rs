//! Response status and response codes.

use std::fmt;

/// Status word of a ManageSieve response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed.
    No,
    /// Server is closing the connection.
    Bye,
}

impl Status {
    /// Returns the status word as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bye => "BYE",
        }
    }

    /// Returns true for OK.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of a `REFERRAL` response code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referral {
    /// The raw `sieve://` URL.
    pub url: String,
    /// Host to reconnect to.
    pub host: String,
    /// Port, if the URL names one.
    pub port: Option<u16>,
}

impl Referral {
    /// Parses a `sieve://host[:port][/path]` URL.
    #[must_use]
    pub fn parse(url: &str) -> Option<Self> {
        let scheme = "sieve://";
        if !url.get(..scheme.len())?.eq_ignore_ascii_case(scheme) {
            return None;
        }

        let authority = url[scheme.len()..].split('/').next().unwrap_or_default();
        // Strip userinfo, the referral names a host
        let authority = authority.rsplit('@').next().unwrap_or_default();

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (host, tail) = rest.split_once(']')?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(port.parse().ok()?),
                None => None,
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port.parse().ok()?)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return None;
        }

        Some(Self {
            url: url.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

/// Machine readable code in parentheses after the status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// `SASL "<base64>"`: final server data of an authentication exchange.
    Sasl(String),
    /// `REFERRAL "sieve://..."`: retry against another server.
    Referral(Referral),
    /// `ACTIVE`: the script is active and cannot be deleted.
    Active,
    /// `NONEXISTENT`: the named script does not exist.
    NonExistent,
    /// `ALREADYEXISTS`: the target name is taken.
    AlreadyExists,
    /// `WARNINGS`: the script was accepted with warnings.
    Warnings,
    /// `TRYLATER`: temporary failure.
    TryLater,
    /// `QUOTA` with an optional sub-code such as `MAXSCRIPTS`.
    Quota(Option<String>),
    /// `AUTH-TOO-WEAK`.
    AuthTooWeak,
    /// `ENCRYPT-NEEDED`.
    EncryptNeeded,
    /// `TRANSITION-NEEDED`.
    TransitionNeeded,
    /// `TAG "<string>"`: echo of a client tag.
    Tag(String),
    /// Any code this library does not interpret.
    Other {
        /// Code name as received.
        name: String,
        /// String arguments.
        args: Vec<String>,
    },
}

impl ResponseCode {
    /// Builds a response code from its name and string arguments.
    #[must_use]
    pub fn from_parts(name: &str, mut args: Vec<String>) -> Self {
        let upper = name.to_ascii_uppercase();
        let (base, sub) = match upper.split_once('/') {
            Some((base, sub)) => (base, Some(sub)),
            None => (upper.as_str(), None),
        };

        match (base, args.len()) {
            ("SASL", 1) => Self::Sasl(args.remove(0)),
            ("TAG", 1) => Self::Tag(args.remove(0)),
            ("REFERRAL", 1) => match Referral::parse(&args[0]) {
                Some(referral) => Self::Referral(referral),
                None => Self::Other {
                    name: name.to_string(),
                    args,
                },
            },
            ("ACTIVE", 0) => Self::Active,
            ("NONEXISTENT", 0) => Self::NonExistent,
            ("ALREADYEXISTS", 0) => Self::AlreadyExists,
            ("WARNINGS", 0) => Self::Warnings,
            ("TRYLATER", 0) => Self::TryLater,
            ("QUOTA", 0) => Self::Quota(sub.map(ToString::to_string)),
            ("AUTH-TOO-WEAK", 0) => Self::AuthTooWeak,
            ("ENCRYPT-NEEDED", 0) => Self::EncryptNeeded,
            ("TRANSITION-NEEDED", 0) => Self::TransitionNeeded,
            _ => Self::Other {
                name: name.to_string(),
                args,
            },
        }
    }

    /// Returns the referral target, if this is a `REFERRAL` code.
    #[must_use]
    pub const fn referral(&self) -> Option<&Referral> {
        match self {
            Self::Referral(referral) => Some(referral),
            _ => None,
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

    #[test]
    fn test_referral_parse() {
        let r = Referral::parse("sieve://sieve.example.com:2000").unwrap();
        assert_eq!(r.host, "sieve.example.com");
        assert_eq!(r.port, Some(2000));

        let r = Referral::parse("SIEVE://backend/").unwrap();
        assert_eq!(r.host, "backend");
        assert_eq!(r.port, None);

        let r = Referral::parse("sieve://user@[::1]:4190").unwrap();
        assert_eq!(r.host, "::1");
        assert_eq!(r.port, Some(4190));

        assert!(Referral::parse("imap://host").is_none());
        assert!(Referral::parse("sieve://host:port").is_none());
        assert!(Referral::parse("sieve://").is_none());
    }

    #[test]
    fn test_from_parts_known() {
        assert_eq!(ResponseCode::from_parts("active", vec![]), ResponseCode::Active);
        assert_eq!(
            ResponseCode::from_parts("QUOTA/MAXSCRIPTS", vec![]),
            ResponseCode::Quota(Some("MAXSCRIPTS".to_string()))
        );
        assert_eq!(
            ResponseCode::from_parts("SASL", vec!["dj1=".to_string()]),
            ResponseCode::Sasl("dj1=".to_string())
        );
        let code = ResponseCode::from_parts("REFERRAL", vec!["sieve://b:1".to_string()]);
        assert_eq!(code.referral().unwrap().host, "b");
    }

    #[test]
    fn test_from_parts_unknown() {
        assert_eq!(
            ResponseCode::from_parts("X-VENDOR", vec!["a".to_string()]),
            ResponseCode::Other {
                name: "X-VENDOR".to_string(),
                args: vec!["a".to_string()],
            }
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Bye.to_string(), "BYE");
        assert!(Status::Ok.is_ok());
        assert!(!Status::No.is_ok());
    }
}
