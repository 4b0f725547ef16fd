//! ManageSieve connection management.
//!
//! This module provides connection handling for ManageSieve servers:
//! - Configuration (host, port, security mode, timeouts)
//! - TLS/plaintext stream abstraction with STARTTLS upgrade
//! - Certificate override hook
//! - The socket owner used by the session driver

mod config;
mod stream;
mod tls;
mod transport;

pub use config::{Account, Config, ConfigBuilder, DEFAULT_PORT, Security};
pub use sieveledger_sasl::Preference as SaslPreference;
pub use stream::{SieveStream, connect_plain, connect_tls};
pub use tls::{CertificateHandler, create_tls_connector};
pub use transport::{Connection, ConnectionState};
