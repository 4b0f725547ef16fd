//! Session state types.
//!
//! A session moves through
//! `Disconnected → Connecting → Authenticating → Ready ⇄ Busy → Disconnecting → Disconnected`.
//! Offline is an overlay reported on top of whichever state is current.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of a ManageSieve session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection.
    #[default]
    Disconnected,

    /// TCP/TLS connect, greeting and STARTTLS are in progress.
    Connecting,

    /// The SASL exchange is in progress.
    Authenticating,

    /// Authenticated and idle.
    Ready,

    /// Authenticated with a request in flight.
    Busy,

    /// LOGOUT sent or BYE received; the connection is going away.
    Disconnecting,

    /// The host reports no network. Overrides every other state while set.
    Offline,
}

impl SessionState {
    /// Returns true if the state may move to `next`.
    ///
    /// `Offline` is never entered through a transition; it is reported while
    /// the offline flag is set.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{Authenticating, Busy, Connecting, Disconnected, Disconnecting, Ready};

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Authenticating | Ready | Disconnecting | Disconnected)
                | (Authenticating, Ready | Disconnecting | Disconnected)
                | (Ready, Busy | Disconnecting | Disconnected)
                | (Busy, Ready | Disconnecting | Disconnected)
                | (Disconnecting, Disconnected)
        )
    }

    /// Returns true once the session is authenticated.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready | Self::Busy)
    }

    /// Returns true while a connection is being set up.
    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting | Self::Authenticating)
    }

    /// Returns true if a connection exists or is being established.
    #[must_use]
    pub const fn is_alive(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Offline)
    }

    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Disconnecting => "disconnecting",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
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
    fn test_default_is_disconnected() {
        assert_eq!(SessionState::default(), SessionState::Disconnected);
    }

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::Authenticating,
            SessionState::Ready,
            SessionState::Busy,
            SessionState::Ready,
            SessionState::Disconnecting,
            SessionState::Disconnected,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!SessionState::Disconnected.can_transition_to(SessionState::Ready));
        assert!(!SessionState::Disconnected.can_transition_to(SessionState::Disconnected));
        assert!(!SessionState::Connecting.can_transition_to(SessionState::Busy));
        assert!(!SessionState::Disconnecting.can_transition_to(SessionState::Ready));
        assert!(!SessionState::Ready.can_transition_to(SessionState::Offline));
        assert!(!SessionState::Offline.can_transition_to(SessionState::Connecting));
    }

    #[test]
    fn test_predicates() {
        assert!(SessionState::Busy.is_ready());
        assert!(!SessionState::Authenticating.is_ready());
        assert!(SessionState::Authenticating.is_connecting());
        assert!(SessionState::Disconnecting.is_alive());
        assert!(!SessionState::Offline.is_alive());
        assert_eq!(SessionState::Busy.to_string(), "busy");
    }
}
