//! A single ManageSieve connection: one socket, optionally upgraded to TLS.
//!
//! The connection moves through
//! `Closed → Connecting → Open → (TlsNegotiating → Open(secure)) → Closed`
//! and knows nothing about the protocol. Received bytes are handed to the
//! caller unparsed.

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, trace};

use super::config::Security;
use super::stream::{SieveStream, connect_plain, connect_tls};
use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Closed,
    /// TCP (and for implicit TLS, the handshake) in progress.
    Connecting,
    /// Socket usable.
    Open {
        /// Traffic is encrypted.
        secure: bool,
    },
    /// STARTTLS handshake in progress.
    TlsNegotiating,
}

/// One ManageSieve connection.
pub struct Connection {
    host: String,
    port: u16,
    state: ConnectionState,
    stream: Option<SieveStream>,
    read_buf: BytesMut,
    wire_logging: bool,
}

impl Connection {
    /// Creates a closed connection to `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            state: ConnectionState::Closed,
            stream: None,
            read_buf: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            wire_logging: false,
        }
    }

    /// Enables trace logging of received bytes.
    #[must_use]
    pub const fn with_wire_logging(mut self, enabled: bool) -> Self {
        self.wire_logging = enabled;
        self
    }

    /// Returns the server hostname.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true if the socket is usable.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Open { .. })
    }

    /// Returns true if traffic is encrypted.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        matches!(self.state, ConnectionState::Open { secure: true })
    }

    /// Opens the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not closed, the connect times
    /// out or the TLS handshake fails.
    pub async fn connect(
        &mut self,
        security: Security,
        timeout: Duration,
        connector: &TlsConnector,
    ) -> Result<()> {
        if self.state != ConnectionState::Closed {
            return Err(Error::InvalidState("connection is already open".to_string()));
        }

        info!(host = %self.host, port = self.port, ?security, "Connecting");
        self.state = ConnectionState::Connecting;

        let (host, port) = (self.host.clone(), self.port);
        let attempt = async move {
            match security {
                Security::Implicit => connect_tls(&host, port, connector).await,
                Security::None | Security::StartTls => connect_plain(&host, port).await,
            }
        };

        let stream = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ConnectionState::Closed;
                return Err(e);
            }
            Err(_) => {
                self.state = ConnectionState::Closed;
                return Err(Error::Timeout(timeout));
            }
        };

        self.state = ConnectionState::Open {
            secure: stream.is_tls(),
        };
        self.stream = Some(stream);
        Ok(())
    }

    /// Replaces the plaintext transport with TLS after STARTTLS was accepted.
    ///
    /// # Errors
    ///
    /// Returns an error unless the connection is open and insecure, or if
    /// the handshake fails. A failed handshake closes the connection.
    pub async fn upgrade_to_tls(&mut self, connector: &TlsConnector) -> Result<()> {
        if self.state != (ConnectionState::Open { secure: false }) {
            return Err(Error::InvalidState(
                "STARTTLS needs an open plaintext connection".to_string(),
            ));
        }
        let Some(stream) = self.stream.take() else {
            return Err(Error::NotConnected);
        };

        debug!(host = %self.host, "Negotiating TLS");
        self.state = ConnectionState::TlsNegotiating;
        match stream.upgrade_to_tls(&self.host, connector).await {
            Ok(tls) => {
                self.stream = Some(tls);
                self.state = ConnectionState::Open { secure: true };
                info!(host = %self.host, "TLS established");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    /// Writes `data` and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not open or the write fails.
    /// A failed write closes the connection.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::NotConnected);
        };

        let written = async {
            stream.write_all(data).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = written {
            self.close().await;
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Waits for the next chunk of bytes from the server.
    ///
    /// Cancel safe: no bytes are lost if the future is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not open, the read fails or the
    /// server closed the connection.
    pub async fn receive(&mut self) -> Result<Bytes> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::NotConnected);
        };

        self.read_buf.reserve(DEFAULT_BUFFER_SIZE);
        let n = stream.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )));
        }

        let chunk = self.read_buf.split().freeze();
        if self.wire_logging {
            trace!(host = %self.host, data = %String::from_utf8_lossy(&chunk), "S:");
        }
        Ok(chunk)
    }

    /// Shuts the socket down. Safe to call in any state, any number of times.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // Peer may already be gone
            let _ = stream.shutdown().await;
            debug!(host = %self.host, "Connection closed");
        }
        self.state = ConnectionState::Closed;
        self.read_buf.clear();
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
    use crate::connection::create_tls_connector;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_and_receive_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"OK\r\n").await.unwrap();
            let mut buf = [0u8; 6];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let connector = create_tls_connector(None).unwrap();
        let mut connection = Connection::new("127.0.0.1", port);
        connection
            .connect(Security::None, Duration::from_secs(5), &connector)
            .await
            .unwrap();
        assert_eq!(connection.state(), ConnectionState::Open { secure: false });

        let chunk = connection.receive().await.unwrap();
        assert_eq!(&chunk[..], b"OK\r\n");
        connection.send(b"NOOP\r\n").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"NOOP\r\n");

        assert!(connection.receive().await.is_err());
        connection.close().await;
        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_invalid_operations() {
        let connector = create_tls_connector(None).unwrap();
        let mut connection = Connection::new("127.0.0.1", 1);
        assert!(matches!(connection.send(b"x").await, Err(Error::NotConnected)));
        assert!(matches!(
            connection.upgrade_to_tls(&connector).await,
            Err(Error::InvalidState(_))
        ));
        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
    }
}
