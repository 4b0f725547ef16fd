//! TLS client configuration with an optional certificate override hook.

use std::fmt;
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::warn;

use crate::{Error, Result};

/// Decides whether to trust a certificate that failed verification.
///
/// Trust decisions and any prompting belong to the host application.
pub trait CertificateHandler: Send + Sync {
    /// Called when the server certificate for `host` fails verification.
    ///
    /// `certificate` is the DER encoded end-entity certificate. Return `true`
    /// to continue the handshake anyway.
    fn on_untrusted_certificate(&self, host: &str, certificate: &[u8], error: &rustls::Error) -> bool;
}

/// Verifier that defers to webpki and consults a [`CertificateHandler`]
/// when that fails.
struct OverrideVerifier {
    inner: Arc<WebPkiServerVerifier>,
    handler: Arc<dyn CertificateHandler>,
}

impl fmt::Debug for OverrideVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideVerifier").finish_non_exhaustive()
    }
}

impl ServerCertVerifier for OverrideVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            Err(error) => {
                let host = server_name.to_str();
                if self
                    .handler
                    .on_untrusted_certificate(&host, end_entity.as_ref(), &error)
                {
                    warn!(%host, %error, "Accepting untrusted certificate on override");
                    Ok(ServerCertVerified::assertion())
                } else {
                    Err(error)
                }
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn root_store() -> rustls::RootCertStore {
    rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

/// Creates a TLS connector with the webpki root certificates.
///
/// With a handler, certificates that fail verification are passed to it
/// before the handshake is aborted.
///
/// # Errors
///
/// Returns an error if the verifier cannot be built.
pub fn create_tls_connector(handler: Option<Arc<dyn CertificateHandler>>) -> Result<TlsConnector> {
    let config = match handler {
        None => rustls::ClientConfig::builder()
            .with_root_certificates(root_store())
            .with_no_client_auth(),
        Some(handler) => {
            let inner = WebPkiServerVerifier::builder(Arc::new(root_store()))
                .build()
                .map_err(|e| Error::TlsConfig(e.to_string()))?;
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(OverrideVerifier { inner, handler }))
                .with_no_client_auth()
        }
    };

    Ok(TlsConnector::from(Arc::new(config)))
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

    struct Reject;

    impl CertificateHandler for Reject {
        fn on_untrusted_certificate(&self, _host: &str, _certificate: &[u8], _error: &rustls::Error) -> bool {
            false
        }
    }

    #[test]
    fn test_create_tls_connector() {
        assert!(create_tls_connector(None).is_ok());
        assert!(create_tls_connector(Some(Arc::new(Reject))).is_ok());
    }
}
