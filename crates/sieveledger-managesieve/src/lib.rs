//! # sieveledger-managesieve
//!
//! A ManageSieve (RFC 5804) client for managing Sieve mail filter scripts on
//! a remote server.
//!
//! ## Features
//!
//! - **Sans-I/O protocol engine**: Request queueing, response parsing and the
//!   watchdog run without touching a socket, driven by bytes and timestamps
//! - **Full command set**: CAPABILITY, STARTTLS, AUTHENTICATE, LISTSCRIPTS,
//!   GETSCRIPT, PUTSCRIPT, CHECKSCRIPT, SETACTIVE, DELETESCRIPT,
//!   RENAMESCRIPT, NOOP and LOGOUT
//! - **Fallbacks for older servers**: RENAMESCRIPT and CHECKSCRIPT are
//!   emulated when the server lacks them
//! - **TLS via rustls**: STARTTLS upgrade or implicit TLS, with a hook for
//!   accepting untrusted certificates
//! - **Shared sessions**: A registry hands out reference-counted channels so
//!   several consumers share one connection per account
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sieveledger_managesieve::{Account, Config, Security, Session, StaticAuthenticator};
//!
//! #[tokio::main]
//! async fn main() -> sieveledger_managesieve::Result<()> {
//!     let config = Config::builder("sieve.example.com")
//!         .security(Security::StartTls)
//!         .build();
//!     let account = Account::new("work", "alice@example.com", config);
//!     let session = Session::new(account, Arc::new(StaticAuthenticator::new("password")), None);
//!
//!     session.connect()?;
//!     session.wait_ready().await?;
//!
//!     session.check_script("keep;").await?;
//!     session.put_script("default", "keep;").await?;
//!     session.set_active_script("default").await?;
//!
//!     for script in session.list_scripts().await? {
//!         println!("{} active={}", script.name, script.active);
//!     }
//!
//!     session.disconnect(false, "done").await;
//!     Ok(())
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Disconnected ── connect() ──→ Connecting ── SASL ──→ Authenticating
//!      ▲                            │                        │
//!      │                            └────────┬───────────────┘
//!      │                                     ▼
//!      │                        Ready ⇄ Busy (request in flight)
//!      │                                     │
//!      └──────── Disconnecting ←── LOGOUT ───┘
//!
//! Offline overlays every state while the network is down.
//! ```
//!
//! ## Modules
//!
//! - [`command`]: Commands and their wire encoding
//! - [`connection`]: Configuration, TLS and the byte transport
//! - [`parser`]: Sans-I/O tokenizer and response parser
//! - [`protocol`]: Sans-I/O protocol engine
//! - [`session`]: Async session handle
//! - [`registry`]: Shared sessions and channels
//! - [`types`]: Capabilities, response codes and script listings

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod handler;
pub mod parser;
pub mod protocol;
pub mod registry;
mod request;
pub mod session;
pub mod types;

pub use command::Command;
pub use connection::{
    Account, CertificateHandler, Config, ConfigBuilder, Connection, DEFAULT_PORT, SaslPreference,
    Security,
};
pub use error::{Error, Result};
pub use handler::{CallbackListener, ChannelListener, LoggingListener, RequestListener};
pub use parser::{Payload, Response, ResponseParser};
pub use protocol::{Engine, EngineConfig, ProtocolEvent, SessionState};
pub use registry::{Channel, ChannelId, SessionId, SessionRegistry};
pub use request::Request;
pub use session::{Authenticator, Session, StaticAuthenticator};
pub use sieveledger_sasl::{Credentials, Mechanism};
pub use types::{Capabilities, ResponseCode, ScriptEntry, Status};
