//! Connection configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sieveledger_sasl::Preference as SaslPreference;

use crate::protocol::{DEFAULT_WATCHDOG, EngineConfig};

/// IANA registered ManageSieve port.
pub const DEFAULT_PORT: u16 = 4190;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Security {
    /// No encryption. **Not recommended for production.**
    None,
    /// Start with plaintext, upgrade with STARTTLS. **Recommended.**
    #[default]
    StartTls,
    /// TLS from the start.
    Implicit,
}

/// ManageSieve connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// How long a sent command may wait for its answer.
    pub watchdog: Duration,
    /// Idle interval for keep-alives; `None` disables them.
    pub keep_alive: Option<Duration>,
    /// SASL mechanism selection.
    pub sasl: SaslPreference,
    /// Log every byte sent and received at trace level.
    pub wire_logging: bool,
}

impl Config {
    /// Creates a new configuration with STARTTLS on port 4190.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        ConfigBuilder::new(host).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }

    /// Returns the engine timing parameters.
    #[must_use]
    pub const fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            watchdog: self.watchdog,
            keep_alive: self.keep_alive,
        }
    }

    /// Returns a copy pointing at another server, as used when following a
    /// referral.
    #[must_use]
    pub fn redirected(&self, host: &str, port: Option<u16>) -> Self {
        Self {
            host: host.to_string(),
            port: port.unwrap_or(self.port),
            ..self.clone()
        }
    }
}

/// Builder for connection configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: u16,
    security: Security,
    connect_timeout: Duration,
    watchdog: Duration,
    keep_alive: Option<Duration>,
    sasl: SaslPreference,
    wire_logging: bool,
}

impl ConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            security: Security::StartTls,
            connect_timeout: Duration::from_secs(30),
            watchdog: DEFAULT_WATCHDOG,
            keep_alive: None,
            sasl: SaslPreference::Automatic,
            wire_logging: false,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the watchdog interval.
    #[must_use]
    pub const fn watchdog(mut self, interval: Duration) -> Self {
        self.watchdog = interval;
        self
    }

    /// Enables keep-alives after the given idle interval.
    #[must_use]
    pub const fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }

    /// Sets the SASL mechanism preference.
    #[must_use]
    pub fn sasl(mut self, preference: SaslPreference) -> Self {
        self.sasl = preference;
        self
    }

    /// Enables wire logging.
    #[must_use]
    pub const fn wire_logging(mut self, enabled: bool) -> Self {
        self.wire_logging = enabled;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            host: self.host,
            port: self.port,
            security: self.security,
            connect_timeout: self.connect_timeout,
            watchdog: self.watchdog,
            keep_alive: self.keep_alive,
            sasl: self.sasl,
            wire_logging: self.wire_logging,
        }
    }
}

/// An account: the key sessions are shared by, the login name and where to
/// connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Identity key; one session exists per key.
    pub key: String,
    /// Login name passed to the authenticator.
    pub username: String,
    /// Connection settings.
    pub config: Config,
}

impl Account {
    /// Creates an account.
    #[must_use]
    pub fn new(key: impl Into<String>, username: impl Into<String>, config: Config) -> Self {
        Self {
            key: key.into(),
            username: username.into(),
            config,
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
    use sieveledger_sasl::Mechanism;

    #[test]
    fn test_config_new() {
        let config = Config::new("sieve.example.com");
        assert_eq!(config.host, "sieve.example.com");
        assert_eq!(config.port, 4190);
        assert_eq!(config.security, Security::StartTls);
        assert_eq!(config.watchdog, Duration::from_secs(20));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.keep_alive, None);
        assert_eq!(config.sasl, SaslPreference::Automatic);
        assert!(!config.wire_logging);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder("sieve.example.com")
            .port(2000)
            .security(Security::Implicit)
            .watchdog(Duration::from_secs(5))
            .keep_alive(Duration::from_secs(300))
            .sasl(SaslPreference::Forced(Mechanism::Plain))
            .wire_logging(true)
            .build();

        assert_eq!(config.port, 2000);
        assert_eq!(config.security, Security::Implicit);
        assert_eq!(
            config.engine_config(),
            EngineConfig {
                watchdog: Duration::from_secs(5),
                keep_alive: Some(Duration::from_secs(300)),
            }
        );
        assert!(config.wire_logging);
    }

    #[test]
    fn test_redirected_keeps_settings() {
        let config = Config::builder("a.example.com").port(2000).build();
        let moved = config.redirected("b.example.com", None);
        assert_eq!(moved.host, "b.example.com");
        assert_eq!(moved.port, 2000);
        assert_eq!(config.redirected("c.example.com", Some(4191)).port, 4191);
    }

    #[test]
    fn test_account_serde() {
        let account = Account::new(
            "work",
            "alice",
            Config::builder("sieve.example.com")
                .sasl(SaslPreference::Forced(Mechanism::Login))
                .build(),
        );
        let json = serde_json::to_string(&account).unwrap();
        assert!(json.contains("\"start_tls\""));
        let back: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(back, account);
    }
}
