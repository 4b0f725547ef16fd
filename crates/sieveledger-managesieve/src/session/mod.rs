//! ManageSieve sessions.
//!
//! A [`Session`] is a cheap, cloneable handle onto one logical connection
//! per account. Connecting spawns a driver task that owns the socket and the
//! protocol engine; requests reach it over a channel and complete through
//! their listeners.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sieveledger_managesieve::{Account, Config, Session, StaticAuthenticator};
//!
//! let account = Account::new("work", "alice", Config::new("sieve.example.com"));
//! let session = Session::new(account, Arc::new(StaticAuthenticator::new("secret")), None);
//!
//! session.connect()?;
//! session.wait_ready().await?;
//!
//! for script in session.list_scripts().await? {
//!     println!("{}{}", script.name, if script.active { " (active)" } else { "" });
//! }
//! session.put_script("vacation", "require \"vacation\";\nvacation \"Away\";").await?;
//! session.set_active_script("vacation").await?;
//! session.disconnect(false, "done").await;
//! ```

mod auth;
mod driver;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, UnboundedSender, error::SendError};
use tokio::sync::{oneshot, watch};
use tracing::debug;

pub use auth::{Authenticator, StaticAuthenticator};

use crate::command::{CHECK_SCRIPT_TEMP_NAME, Command};
use crate::connection::{Account, CertificateHandler};
use crate::parser::{Payload, Response};
use crate::protocol::SessionState;
use crate::registry::SessionId;
use crate::request::Request;
use crate::types::{self, Capabilities, ResponseCode, ScriptEntry};
use crate::{Error, Result};

use driver::DriverMessage;

/// Receives session lifecycle notifications; implemented by the registry.
pub(crate) trait SessionObserver: Send + Sync {
    fn on_ready(&self, session: SessionId);
    fn on_error(&self, session: SessionId, error: &Error);
}

/// Session status shared between handles and the driver.
#[derive(Debug, Clone, Default)]
pub(crate) struct Status {
    phase: SessionState,
    offline: bool,
    capabilities: Option<Capabilities>,
    /// Why the last connection ended, if it failed.
    error: Option<String>,
}

impl Status {
    const fn state(&self) -> SessionState {
        if self.offline {
            SessionState::Offline
        } else {
            self.phase
        }
    }
}

/// State the driver task needs; never holds the driver's own channel.
pub(crate) struct Shared {
    id: SessionId,
    account: Account,
    authenticator: Arc<dyn Authenticator>,
    certificates: Option<Arc<dyn CertificateHandler>>,
    observer: Option<Arc<dyn SessionObserver>>,
    status: watch::Sender<Status>,
}

struct DriverHandle {
    commands: UnboundedSender<DriverMessage>,
    /// Cancels a connect in progress, carrying the reason.
    abort: Option<oneshot::Sender<String>>,
}

struct SessionInner {
    shared: Arc<Shared>,
    driver: Mutex<Option<DriverHandle>>,
}

/// Handle onto one ManageSieve session.
///
/// Clones share the session. The connection is torn down when the last
/// handle is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("account", &self.inner.shared.account.key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a disconnected session.
    #[must_use]
    pub fn new(
        account: Account,
        authenticator: Arc<dyn Authenticator>,
        certificates: Option<Arc<dyn CertificateHandler>>,
    ) -> Self {
        Self::build(SessionId::next(), account, authenticator, certificates, None)
    }

    pub(crate) fn build(
        id: SessionId,
        account: Account,
        authenticator: Arc<dyn Authenticator>,
        certificates: Option<Arc<dyn CertificateHandler>>,
        observer: Option<Arc<dyn SessionObserver>>,
    ) -> Self {
        let (status, _) = watch::channel(Status::default());
        Self {
            inner: Arc::new(SessionInner {
                shared: Arc::new(Shared {
                    id,
                    account,
                    authenticator,
                    certificates,
                    observer,
                    status,
                }),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.shared.id
    }

    /// Returns the account this session connects for.
    #[must_use]
    pub fn account(&self) -> &Account {
        &self.inner.shared.account
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.shared.status.borrow().state()
    }

    /// Returns true while the offline overlay is active.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.inner.shared.status.borrow().offline
    }

    /// Returns the capabilities from the current connection, if any.
    #[must_use]
    pub fn capabilities_snapshot(&self) -> Option<Capabilities> {
        self.inner.shared.status.borrow().capabilities.clone()
    }

    /// Returns why the last connection failed, if it did.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.shared.status.borrow().error.clone()
    }

    /// Starts connecting in the background. Does nothing if a connection is
    /// already up or being set up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Offline`] while offline.
    pub fn connect(&self) -> Result<()> {
        if self.is_offline() {
            return Err(Error::Offline);
        }

        let mut driver = self
            .inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if driver
            .as_ref()
            .is_some_and(|handle| !handle.commands.is_closed())
        {
            return Ok(());
        }

        debug!(session = %self.id(), host = %self.account().config.host, "Starting session driver");
        self.inner.shared.status.send_modify(|status| {
            status.phase = SessionState::Connecting;
            status.error = None;
        });

        let (commands, receiver) = mpsc::unbounded_channel();
        let (abort, abort_rx) = oneshot::channel();
        tokio::spawn(driver::run(self.inner.shared.clone(), receiver, abort_rx));
        *driver = Some(DriverHandle {
            commands,
            abort: Some(abort),
        });
        Ok(())
    }

    /// Waits until the session is authenticated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if no connection is being set up,
    /// [`Error::Offline`] while offline, and [`Error::Disconnected`] with the
    /// cause if the connect failed.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut status = self.inner.shared.status.subscribe();
        let status = status
            .wait_for(|s| s.offline || !s.phase.is_connecting())
            .await
            .map_err(|_| Error::NotConnected)?;

        if status.offline {
            Err(Error::Offline)
        } else if status.phase.is_ready() {
            Ok(())
        } else {
            match &status.error {
                Some(error) => Err(Error::Disconnected(error.clone())),
                None => Err(Error::NotConnected),
            }
        }
    }

    /// Closes the session.
    ///
    /// Unless `force` is set, a ready session first sends LOGOUT and waits
    /// for its answer. Remaining requests then fail with
    /// [`Error::Disconnected`]. Calling this on a closed session does
    /// nothing.
    pub async fn disconnect(&self, force: bool, reason: &str) {
        let (commands, abort) = {
            let mut driver = self
                .inner
                .driver
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match driver.as_mut() {
                Some(handle) => (handle.commands.clone(), handle.abort.take()),
                None => return,
            }
        };

        let (done, finished) = oneshot::channel();
        let message = DriverMessage::Disconnect {
            force,
            reason: reason.to_string(),
            done,
        };
        if commands.send(message).is_err() {
            return;
        }
        if let Some(abort) = abort {
            let _ = abort.send(reason.to_string());
        }

        // Driver answers once the connection is gone
        let _ = finished.await;
    }

    /// Switches the offline overlay.
    ///
    /// While offline new requests fail with [`Error::Offline`]; queued ones
    /// wait until the network is back.
    pub fn set_offline(&self, offline: bool) {
        let changed = self.inner.shared.status.send_if_modified(|status| {
            let changed = status.offline != offline;
            status.offline = offline;
            changed
        });
        if changed && let Some(commands) = self.commands() {
            let _ = commands.send(DriverMessage::Offline(offline));
        }
    }

    /// Queues a request without waiting for it.
    ///
    /// The outcome reaches the request's listener. Requests on an offline
    /// or unconnected session fail right away.
    pub fn add_request(&self, request: Request) {
        if self.is_offline() {
            request.fail(Error::Offline);
            return;
        }

        let Some(commands) = self.commands() else {
            request.fail(Error::NotConnected);
            return;
        };

        if let Err(SendError(DriverMessage::Request(request))) =
            commands.send(DriverMessage::Request(request))
        {
            request.fail(Error::NotConnected);
        }
    }

    fn commands(&self) -> Option<UnboundedSender<DriverMessage>> {
        self.inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|handle| handle.commands.clone())
    }

    /// Sends a command and waits for its answer.
    ///
    /// # Errors
    ///
    /// Returns the server's refusal, a timeout or a disconnect.
    pub async fn call(&self, command: Command) -> Result<Response> {
        let (request, outcome) = Request::oneshot(command);
        self.add_request(request);
        outcome
            .await
            .map_err(|_| Error::Disconnected("request dropped".to_string()))?
    }

    /// Asks the server for its capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn capabilities(&self) -> Result<Capabilities> {
        let response = self.call(Command::Capability).await?;
        response
            .capabilities()
            .cloned()
            .ok_or_else(|| Error::Protocol("expected a capability listing".to_string()))
    }

    /// Pings the server; uses CAPABILITY on servers without NOOP.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn noop(&self) -> Result<()> {
        let command = if self.capabilities_snapshot().is_some_and(|c| c.can_noop()) {
            Command::Noop
        } else {
            Command::Capability
        };
        self.call(command).await.map(|_| ())
    }

    /// Lists the scripts on the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn list_scripts(&self) -> Result<Vec<ScriptEntry>> {
        let response = self.call(Command::ListScripts).await?;
        match response.payload {
            Payload::Scripts(scripts) => Ok(scripts),
            _ => Ok(Vec::new()),
        }
    }

    /// Downloads a script.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] with [`ResponseCode::NonExistent`] for unknown
    /// scripts.
    pub async fn get_script(&self, name: &str) -> Result<String> {
        let response = self
            .call(Command::GetScript {
                name: name.to_string(),
            })
            .await?;
        match response.payload {
            Payload::Script(body) => Ok(body),
            _ => Ok(String::new()),
        }
    }

    /// Uploads a script, replacing one with the same name.
    ///
    /// The response may carry a `WARNINGS` code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] if the server rejects the script.
    pub async fn put_script(&self, name: &str, body: &str) -> Result<Response> {
        self.call(Command::PutScript {
            name: name.to_string(),
            body: body.to_string(),
        })
        .await
    }

    /// Deletes a script.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] for unknown or active scripts.
    pub async fn delete_script(&self, name: &str) -> Result<()> {
        self.call(Command::DeleteScript {
            name: name.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// Activates a script. An empty name deactivates all scripts.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn set_active_script(&self, name: &str) -> Result<()> {
        self.call(Command::SetActive {
            name: name.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// Renames a script.
    ///
    /// Servers without RENAMESCRIPT get a copy under the new name, which is
    /// activated if the old script was active, and the old one is deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] with [`ResponseCode::AlreadyExists`] if the new
    /// name is taken, or the first failing step's error.
    pub async fn rename_script(&self, old: &str, new: &str) -> Result<()> {
        if self.capabilities_snapshot().is_some_and(|c| c.can_rename()) {
            return self
                .call(Command::RenameScript {
                    old: old.to_string(),
                    new: new.to_string(),
                })
                .await
                .map(|_| ());
        }

        let scripts = self.list_scripts().await?;
        if scripts.iter().any(|script| script.name == new) {
            return Err(Error::No {
                code: Some(ResponseCode::AlreadyExists),
                message: format!("A script named {new} already exists"),
            });
        }
        let active = scripts.iter().any(|script| script.name == old && script.active);

        let body = self.get_script(old).await?;
        self.put_script(new, &body).await?;
        if active {
            self.set_active_script(new).await?;
        }
        self.delete_script(old).await
    }

    /// Checks a script for errors without storing it.
    ///
    /// Servers without CHECKSCRIPT get a temporary upload that is deleted
    /// again; an empty script is accepted without asking them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] carrying the server's diagnostics.
    pub async fn check_script(&self, body: &str) -> Result<Response> {
        if self
            .capabilities_snapshot()
            .is_some_and(|c| c.can_check_script())
        {
            return self
                .call(Command::CheckScript {
                    body: body.to_string(),
                })
                .await;
        }

        if body.is_empty() {
            return Ok(Response::new(types::Status::Ok));
        }

        let response = self.put_script(CHECK_SCRIPT_TEMP_NAME, body).await?;
        self.delete_script(CHECK_SCRIPT_TEMP_NAME).await?;
        Ok(response)
    }

    /// Sends LOGOUT; the session closes once it is answered.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be sent.
    pub async fn logout(&self) -> Result<()> {
        self.call(Command::Logout).await.map(|_| ())
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
    use crate::connection::{Config, SaslPreference, Security};

    fn session() -> Session {
        let config = Config::builder("127.0.0.1")
            .port(1)
            .security(Security::None)
            .build();
        Session::new(
            Account::new("test", "alice", config),
            Arc::new(StaticAuthenticator::new("secret")),
            None,
        )
    }

    #[tokio::test]
    async fn test_new_session_is_disconnected() {
        let session = session();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.capabilities_snapshot().is_none());
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn test_request_without_connect_fails() {
        let session = session();
        let result = session.call(Command::Noop).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_offline_rejects_connect_and_requests() {
        let session = session();
        session.set_offline(true);
        assert_eq!(session.state(), SessionState::Offline);
        assert!(matches!(session.connect(), Err(Error::Offline)));
        assert!(matches!(
            session.call(Command::Noop).await,
            Err(Error::Offline)
        ));

        session.set_offline(false);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_wait_ready_without_connect() {
        let session = session();
        assert!(matches!(
            session.wait_ready().await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_driver_is_noop() {
        let session = session();
        session.disconnect(false, "nothing to do").await;
        session.disconnect(true, "still nothing").await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_wait_ready_pends_until_greeting() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::None)
            .sasl(SaslPreference::None)
            .build();
        let session = Session::new(
            Account::new("test", "alice", config),
            Arc::new(StaticAuthenticator::new("secret")),
            None,
        );

        session.connect().unwrap();
        // Second connect while connecting is a no-op
        session.connect().unwrap();
        assert_eq!(session.state(), SessionState::Connecting);

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut ready = tokio_test::task::spawn(session.wait_ready());
        tokio_test::assert_pending!(ready.poll());

        tokio::io::AsyncWriteExt::write_all(
            &mut socket,
            b"\"IMPLEMENTATION\" \"Test\"\r\nOK\r\n",
        )
        .await
        .unwrap();
        ready.await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        session.disconnect(true, "done").await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[derive(Default)]
    struct Recorder {
        errors: Mutex<Vec<String>>,
    }

    impl SessionObserver for Recorder {
        fn on_ready(&self, _session: SessionId) {}

        fn on_error(&self, _session: SessionId, error: &Error) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    #[tokio::test]
    async fn test_disconnect_while_connecting_is_not_an_error() {
        // Accepts but never greets
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::None)
            .build();
        let recorder = Arc::new(Recorder::default());
        let session = Session::build(
            SessionId::next(),
            Account::new("test", "alice", config),
            Arc::new(StaticAuthenticator::new("secret")),
            None,
            Some(recorder.clone() as Arc<dyn SessionObserver>),
        );

        session.connect().unwrap();
        let (_socket, _) = listener.accept().await.unwrap();
        let queued = session.call(Command::Noop);
        let (result, ()) = tokio::join!(queued, session.disconnect(false, "user cancelled"));

        assert!(matches!(result, Err(Error::Disconnected(_))));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.last_error().is_none());
        assert!(recorder.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused_reports_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::None)
            .build();
        let session = Session::new(
            Account::new("test", "alice", config),
            Arc::new(StaticAuthenticator::new("secret")),
            None,
        );

        session.connect().unwrap();
        let result = session.wait_ready().await;
        assert!(matches!(result, Err(Error::Disconnected(_))));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.last_error().is_some());
    }
}
