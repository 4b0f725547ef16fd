//! # sieveledger-sasl
//!
//! SASL payload framing for mail protocols (ManageSieve, IMAP, SMTP).
//!
//! This crate only builds and decodes the base64 payloads that travel inside
//! `AUTHENTICATE` exchanges. It never stores secrets and implements no
//! challenge/response cryptography; the caller supplies credentials.
//!
//! ## Supported mechanisms
//!
//! - **PLAIN** (RFC 4616) with optional authorization identity
//! - **LOGIN** (draft-murchison-sasl-login), a two-step username/password dialog
//! - **EXTERNAL** (RFC 4422), identity taken from the TLS layer
//! - **OAUTHBEARER** (RFC 7628) and **XOAUTH2** (Google/Microsoft)
//!
//! ## Quick Start
//!
//! ```
//! use sieveledger_sasl::{Credentials, Mechanism, Preference, select};
//!
//! let advertised = vec!["LOGIN".to_string(), "PLAIN".to_string()];
//! let mechanism = select(&advertised, &Preference::Automatic).unwrap();
//! assert_eq!(mechanism, Some(Mechanism::Plain));
//!
//! let credentials = Credentials::new("geek").with_secret("th3g33k1");
//! let payload = sieveledger_sasl::initial_response(Mechanism::Plain, &credentials);
//! assert!(payload.is_some());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod mechanism;
pub mod payload;

pub use error::{Error, Result};
pub use mechanism::{Mechanism, Preference, select};
pub use payload::{Credentials, decode_challenge, initial_response, step_response};
