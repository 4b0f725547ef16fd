//! The task that owns one session's connection and engine.
//!
//! Consumer requests arrive over an unbounded channel. The channel is only
//! read once the session is authenticated, so requests queued during the
//! connect sequence wait behind it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, info, trace, warn};

use super::Shared;
use crate::command::Command;
use crate::connection::{Config, Connection, Security, create_tls_connector};
use crate::handler::LoggingListener;
use crate::parser::Response;
use crate::protocol::{Engine, ProtocolEvent, SessionState};
use crate::request::Request;
use crate::types::Capabilities;
use crate::{Error, Result};

/// Referral hops followed during one connect.
const MAX_REFERRALS: usize = 3;

/// Messages from session handles to the driver.
pub(crate) enum DriverMessage {
    Request(Request),
    Offline(bool),
    Disconnect {
        force: bool,
        reason: String,
        done: oneshot::Sender<()>,
    },
}

/// Why the driver stopped.
enum Exit {
    /// Disconnect or logout asked for by a consumer.
    Requested(String),
    /// The server ended the session.
    Server(String),
    /// Transport or connect failure.
    Failed(Error),
}

/// Runs a session until it disconnects.
pub(crate) async fn run(
    shared: Arc<Shared>,
    commands: UnboundedReceiver<DriverMessage>,
    abort: oneshot::Receiver<String>,
) {
    let mut driver = Driver::new(shared, commands);

    // A dropped handle aborts too
    let established = tokio::select! {
        result = driver.establish() => result.map_err(Exit::Failed),
        reason = abort => Err(Exit::Requested(
            reason.unwrap_or_else(|_| "session dropped".to_string()),
        )),
    };

    let exit = match established {
        Ok(()) => {
            driver.publish();
            info!(session = %driver.shared.id, "Session ready");
            if let Some(observer) = &driver.shared.observer {
                observer.on_ready(driver.shared.id);
            }
            driver.serve().await
        }
        Err(exit) => exit,
    };

    driver.shutdown(exit).await;
}

struct Driver {
    shared: Arc<Shared>,
    commands: UnboundedReceiver<DriverMessage>,
    engine: Engine,
    connection: Connection,
    wire_logging: bool,
    /// Set once the engine reports the session over.
    closing: Option<Exit>,
    /// Reason given to a graceful disconnect in progress.
    disconnect_reason: Option<String>,
    waiters: Vec<oneshot::Sender<()>>,
}

impl Driver {
    fn new(shared: Arc<Shared>, commands: UnboundedReceiver<DriverMessage>) -> Self {
        let config = &shared.account.config;
        let engine = Engine::new(config.engine_config());
        let connection = Connection::new(config.host.clone(), config.port);
        let wire_logging = config.wire_logging;

        Self {
            shared,
            commands,
            engine,
            connection,
            wire_logging,
            closing: None,
            disconnect_reason: None,
            waiters: Vec::new(),
        }
    }

    /// Connects, following referrals.
    async fn establish(&mut self) -> Result<()> {
        let connector = create_tls_connector(self.shared.certificates.clone())?;
        let mut config = self.shared.account.config.clone();
        let mut hops = 0;

        loop {
            match self.handshake(&config, &connector).await {
                Err(Error::Referral { host, port }) if hops < MAX_REFERRALS => {
                    hops += 1;
                    info!(session = %self.shared.id, %host, ?port, hops, "Following referral");
                    self.teardown("referred elsewhere").await;
                    config = config.redirected(&host, port);
                }
                result => return result,
            }
        }
    }

    /// TCP, greeting, optional STARTTLS, SASL.
    async fn handshake(
        &mut self,
        config: &Config,
        connector: &tokio_rustls::TlsConnector,
    ) -> Result<()> {
        self.connection = Connection::new(config.host.clone(), config.port)
            .with_wire_logging(config.wire_logging);
        self.engine.begin_connect()?;
        self.connection
            .connect(config.security, config.connect_timeout, connector)
            .await?;

        let mut caps = self.expect_capabilities(Command::Greeting).await?;
        debug!(implementation = ?caps.implementation(), "Greeting received");

        if config.security == Security::StartTls {
            if !caps.has_starttls() {
                return Err(Error::Unsupported("STARTTLS".to_string()));
            }
            self.roundtrip(Command::StartTls).await?;
            self.connection.upgrade_to_tls(connector).await?;

            // Servers resend capabilities after TLS; old ones need asking
            caps = match self.expect_capabilities(Command::Greeting).await {
                Err(Error::Timeout(_)) => {
                    debug!("No capabilities after STARTTLS, requesting them");
                    self.expect_capabilities(Command::Capability).await?
                }
                other => other?,
            };
        }

        self.shared
            .status
            .send_modify(|status| status.capabilities = Some(caps.clone()));

        if let Some(mechanism) = sieveledger_sasl::select(caps.sasl(), &config.sasl)? {
            self.engine.set_authenticating()?;
            self.publish();
            debug!(%mechanism, "Authenticating");

            let credentials = self
                .shared
                .authenticator
                .credentials(&self.shared.account, mechanism)?;
            match self
                .roundtrip(Command::Authenticate {
                    mechanism,
                    credentials,
                })
                .await
            {
                Ok(_) => {}
                Err(Error::No { message, .. }) => return Err(Error::Auth(message)),
                Err(e) => return Err(e),
            }
        }

        self.engine.set_ready(now())?;
        Ok(())
    }

    async fn expect_capabilities(&mut self, command: Command) -> Result<Capabilities> {
        let response = self.roundtrip(command).await?;
        response
            .capabilities()
            .cloned()
            .ok_or_else(|| Error::Protocol("expected a capability listing".to_string()))
    }

    /// Sends one request and pumps I/O until it is answered.
    async fn roundtrip(&mut self, command: Command) -> Result<Response> {
        let (request, mut outcome) = Request::oneshot(command);
        self.engine.enqueue(request, now());
        let events = self.engine.take_events();
        self.handle_events(events);

        loop {
            self.flush().await?;
            self.publish();
            match outcome.try_recv() {
                Ok(result) => return result,
                Err(TryRecvError::Closed) => {
                    return Err(Error::Disconnected("request dropped".to_string()));
                }
                Err(TryRecvError::Empty) => {}
            }

            let deadline = self.engine.poll_timeout();
            tokio::select! {
                chunk = self.connection.receive() => {
                    let events = self.engine.handle_input(&chunk?, now());
                    self.handle_events(events);
                }
                () = sleep_until(deadline) => {
                    let events = self.engine.handle_timeout(now());
                    self.handle_events(events);
                }
            }
        }
    }

    /// Main loop once the session is ready.
    async fn serve(&mut self) -> Exit {
        loop {
            if let Err(error) = self.flush().await {
                return Exit::Failed(error);
            }
            self.publish();
            if let Some(exit) = self.closing.take() {
                return exit;
            }

            let deadline = self.engine.poll_timeout();
            tokio::select! {
                message = self.commands.recv() => match message {
                    Some(DriverMessage::Request(request)) => {
                        self.engine.enqueue(request, now());
                        let events = self.engine.take_events();
                        self.handle_events(events);
                    }
                    Some(DriverMessage::Offline(offline)) => {
                        self.engine.set_offline(offline, now());
                        let events = self.engine.take_events();
                        self.handle_events(events);
                    }
                    Some(DriverMessage::Disconnect { force, reason, done }) => {
                        self.waiters.push(done);
                        if force || !self.engine.phase().is_ready() {
                            return Exit::Requested(reason);
                        }
                        if self.disconnect_reason.is_none() {
                            debug!(%reason, "Logging out");
                            self.disconnect_reason = Some(reason);
                            let logout = Request::new(Command::Logout, LoggingListener::new("LOGOUT"));
                            self.engine.logout(logout, now());
                            let events = self.engine.take_events();
                            self.handle_events(events);
                        }
                    }
                    None => return Exit::Requested("session dropped".to_string()),
                },
                chunk = self.connection.receive() => match chunk {
                    Ok(chunk) => {
                        let events = self.engine.handle_input(&chunk, now());
                        self.handle_events(events);
                    }
                    Err(error) => return Exit::Failed(error),
                },
                () = sleep_until(deadline) => {
                    let events = self.engine.handle_timeout(now());
                    self.handle_events(events);
                }
            }
        }
    }

    fn handle_events(&mut self, events: Vec<ProtocolEvent>) {
        for event in events {
            match event {
                ProtocolEvent::Capabilities(caps) => {
                    self.shared
                        .status
                        .send_modify(|status| status.capabilities = Some(caps));
                }
                ProtocolEvent::Completed { verb: "LOGOUT", .. }
                | ProtocolEvent::TimedOut { verb: "LOGOUT" }
                | ProtocolEvent::Malformed { verb: "LOGOUT" } => {
                    let reason = self
                        .disconnect_reason
                        .take()
                        .unwrap_or_else(|| "logged out".to_string());
                    self.closing = Some(Exit::Requested(reason));
                }
                ProtocolEvent::Disconnected { reason } => {
                    if self.closing.is_none() {
                        self.closing = Some(Exit::Server(reason));
                    }
                }
                other => trace!(session = %self.shared.id, ?other, "Engine event"),
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        while let Some(transmit) = self.engine.poll_transmit() {
            if self.wire_logging {
                trace!(session = %self.shared.id, data = %transmit.redacted(), "C:");
            }
            self.connection.send(transmit.as_ref()).await?;
        }
        Ok(())
    }

    /// Mirrors the engine phase into the shared status.
    fn publish(&self) {
        let phase = self.engine.phase();
        self.shared.status.send_if_modified(|status| {
            if status.phase == phase {
                false
            } else {
                status.phase = phase;
                true
            }
        });
    }

    /// Drops the connection between referral hops without publishing.
    async fn teardown(&mut self, reason: &str) {
        self.engine.disconnect(reason);
        self.connection.close().await;
        self.closing = None;
    }

    async fn shutdown(mut self, exit: Exit) {
        let (reason, error) = match exit {
            Exit::Requested(reason) => (reason, None),
            Exit::Server(reason) => (reason.clone(), Some(Error::Disconnected(reason))),
            Exit::Failed(error) => (error.to_string(), Some(error)),
        };

        self.engine.disconnect(&reason);
        self.connection.close().await;

        self.commands.close();
        while let Ok(message) = self.commands.try_recv() {
            match message {
                DriverMessage::Request(request) => {
                    request.abandon(Error::Disconnected(reason.clone()));
                }
                DriverMessage::Disconnect { done, .. } => self.waiters.push(done),
                DriverMessage::Offline(_) => {}
            }
        }

        let message = error.as_ref().map(ToString::to_string);
        self.shared.status.send_modify(|status| {
            status.phase = SessionState::Disconnected;
            status.capabilities = None;
            status.error = message;
        });

        let id = self.shared.id;
        match &error {
            Some(error) => {
                warn!(session = %id, %error, "Session ended");
                if let Some(observer) = &self.shared.observer {
                    observer.on_error(id, error);
                }
            }
            None => info!(session = %id, %reason, "Session closed"),
        }

        for done in self.waiters.drain(..) {
            let _ = done.send(());
        }
    }
}

/// Current time on the tokio clock, so paused test time applies.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
