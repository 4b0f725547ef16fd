//! Integration tests for sessions and the registry.
//!
//! These tests run the client against a small in-process ManageSieve
//! server on a loopback socket.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::{assert_err, assert_ok};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::TlsAcceptor;

use sieveledger_managesieve::{
    Account, CertificateHandler, ChannelId, ChannelListener, Config, Error, ResponseCode,
    SaslPreference, Security, Session, SessionId, SessionRegistry, SessionState,
    StaticAuthenticator,
};

/// Server behaviour knobs.
#[derive(Clone, Copy)]
struct Flavor {
    /// Advertise VERSION 1.0 (RENAMESCRIPT, CHECKSCRIPT, NOOP).
    rfc5804: bool,
}

#[derive(Default)]
struct Store {
    scripts: BTreeMap<String, String>,
    active: Option<String>,
    /// Every command line received, secrets included.
    log: Vec<String>,
}

/// A fake ManageSieve server accepting any number of connections.
struct FakeServer {
    port: u16,
    store: Arc<Mutex<Store>>,
}

impl FakeServer {
    async fn start(flavor: Flavor) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let store = Arc::new(Mutex::new(Store::default()));

        let shared = store.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, flavor, shared.clone()));
            }
        });

        Self { port, store }
    }

    fn config(&self) -> Config {
        Config::builder("127.0.0.1")
            .port(self.port)
            .security(Security::None)
            .watchdog(Duration::from_secs(5))
            .build()
    }

    fn account(&self, key: &str) -> Account {
        Account::new(key, "alice", self.config())
    }

    fn commands(&self) -> Vec<String> {
        self.store.lock().unwrap().log.clone()
    }

    fn count(&self, verb: &str) -> usize {
        self.commands()
            .iter()
            .filter(|line| line.starts_with(verb))
            .count()
    }

    fn scripts(&self) -> Vec<String> {
        self.store.lock().unwrap().scripts.keys().cloned().collect()
    }

    fn active(&self) -> Option<String> {
        self.store.lock().unwrap().active.clone()
    }
}

fn capabilities(flavor: Flavor) -> String {
    let mut out = String::from(
        "\"IMPLEMENTATION\" \"Fake Sieve\"\r\n\"SASL\" \"PLAIN\"\r\n\"SIEVE\" \"fileinto vacation\"\r\n",
    );
    if flavor.rfc5804 {
        out.push_str("\"VERSION\" \"1.0\"\r\n");
    }
    out.push_str("OK\r\n");
    out
}

/// Splits a command line into its verb and quoted arguments.
fn arguments(line: &str) -> (String, Vec<String>) {
    let verb = line.split_whitespace().next().unwrap_or_default().to_string();
    let args = line
        .split('"')
        .skip(1)
        .step_by(2)
        .map(ToString::to_string)
        .collect();
    (verb, args)
}

fn literal(body: &str) -> String {
    format!("{{{}}}\r\n{body}\r\n", body.len())
}

async fn serve(socket: TcpStream, flavor: Flavor, store: Arc<Mutex<Store>>) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    if write.write_all(capabilities(flavor).as_bytes()).await.is_err() {
        return;
    }

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let line = line.trim_end().to_string();

        // Trailing non-synchronizing literal
        let mut body = None;
        if let Some(start) = line.rfind('{')
            && line.ends_with("+}")
        {
            let len: usize = line[start + 1..line.len() - 2].parse().unwrap();
            let mut data = vec![0; len];
            reader.read_exact(&mut data).await.unwrap();
            let mut rest = String::new();
            reader.read_line(&mut rest).await.unwrap();
            body = Some(String::from_utf8(data).unwrap());
        }

        let (verb, args) = arguments(&line);
        let reply = {
            let mut store = store.lock().unwrap();
            store.log.push(line.clone());
            respond(&mut store, flavor, &verb, &args, body)
        };

        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
        if verb == "LOGOUT" {
            return;
        }
    }
}

fn respond(
    store: &mut Store,
    flavor: Flavor,
    verb: &str,
    args: &[String],
    body: Option<String>,
) -> String {
    match verb {
        "AUTHENTICATE" => "OK \"Logged in\"\r\n".to_string(),
        "CAPABILITY" => capabilities(flavor),
        "NOOP" if flavor.rfc5804 => "OK \"NOOP completed\"\r\n".to_string(),
        "LOGOUT" => "OK \"Bye\"\r\n".to_string(),
        "LISTSCRIPTS" => {
            let mut out = String::new();
            for name in store.scripts.keys() {
                out.push_str(&format!("\"{name}\""));
                if store.active.as_deref() == Some(name) {
                    out.push_str(" ACTIVE");
                }
                out.push_str("\r\n");
            }
            out.push_str("OK\r\n");
            out
        }
        // Never answered
        "GETSCRIPT" if args[0] == "stalled" => String::new(),
        "GETSCRIPT" => match store.scripts.get(&args[0]) {
            Some(script) => format!("{}OK\r\n", literal(script)),
            None => "NO (NONEXISTENT) \"No such script\"\r\n".to_string(),
        },
        "PUTSCRIPT" => {
            let body = body.unwrap_or_default();
            if body.contains("error") {
                return "NO \"line 1: syntax error\"\r\n".to_string();
            }
            store.scripts.insert(args[0].clone(), body);
            "OK\r\n".to_string()
        }
        "CHECKSCRIPT" if flavor.rfc5804 => {
            if body.unwrap_or_default().contains("error") {
                "NO \"line 1: syntax error\"\r\n".to_string()
            } else {
                "OK\r\n".to_string()
            }
        }
        "DELETESCRIPT" => {
            if store.active.as_deref() == Some(args[0].as_str()) {
                return "NO (ACTIVE) \"Script is active\"\r\n".to_string();
            }
            match store.scripts.remove(&args[0]) {
                Some(_) => "OK\r\n".to_string(),
                None => "NO (NONEXISTENT) \"No such script\"\r\n".to_string(),
            }
        }
        "SETACTIVE" => {
            if args[0].is_empty() {
                store.active = None;
            } else if store.scripts.contains_key(&args[0]) {
                store.active = Some(args[0].clone());
            } else {
                return "NO (NONEXISTENT) \"No such script\"\r\n".to_string();
            }
            "OK\r\n".to_string()
        }
        "RENAMESCRIPT" if flavor.rfc5804 => {
            let Some(script) = store.scripts.remove(&args[0]) else {
                return "NO (NONEXISTENT) \"No such script\"\r\n".to_string();
            };
            if store.active.as_deref() == Some(args[0].as_str()) {
                store.active = Some(args[1].clone());
            }
            store.scripts.insert(args[1].clone(), script);
            "OK\r\n".to_string()
        }
        _ => "NO \"Unknown command\"\r\n".to_string(),
    }
}

async fn ready_session(server: &FakeServer) -> Session {
    let session = Session::new(
        server.account("test"),
        Arc::new(StaticAuthenticator::new("secret")),
        None,
    );
    session.connect().unwrap();
    session.wait_ready().await.unwrap();
    session
}

#[tokio::test]
async fn test_connect_and_authenticate() {
    let server = FakeServer::start(Flavor { rfc5804: true }).await;
    let session = ready_session(&server).await;

    assert_eq!(session.state(), SessionState::Ready);
    let caps = session.capabilities_snapshot().unwrap();
    assert_eq!(caps.implementation(), Some("Fake Sieve"));
    assert!(caps.supports_extension("vacation"));

    let commands = server.commands();
    assert_eq!(commands.len(), 1);
    // base64("\0alice\0secret")
    assert_eq!(commands[0], "AUTHENTICATE \"PLAIN\" \"AGFsaWNlAHNlY3JldA==\"");

    session.disconnect(false, "done").await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(server.count("LOGOUT"), 1);
}

#[tokio::test]
async fn test_script_lifecycle() {
    let server = FakeServer::start(Flavor { rfc5804: true }).await;
    let session = ready_session(&server).await;

    let body = "require \"fileinto\";\nfileinto \"Spam\";\n";
    assert_ok!(session.put_script("spam", body).await);
    assert_ok!(session.set_active_script("spam").await);

    let scripts = session.list_scripts().await.unwrap();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].name, "spam");
    assert!(scripts[0].active);

    // Line breaks go out as CRLF
    let fetched = session.get_script("spam").await.unwrap();
    assert_eq!(fetched, body.replace('\n', "\r\n"));

    let error = session.delete_script("spam").await.unwrap_err();
    assert!(matches!(
        error,
        Error::No {
            code: Some(ResponseCode::Active),
            ..
        }
    ));

    assert_ok!(session.set_active_script("").await);
    assert_ok!(session.delete_script("spam").await);
    assert!(session.list_scripts().await.unwrap().is_empty());

    let error = session.get_script("spam").await.unwrap_err();
    assert!(matches!(
        error,
        Error::No {
            code: Some(ResponseCode::NonExistent),
            ..
        }
    ));

    session.noop().await.unwrap();
    assert_eq!(server.count("NOOP"), 1);

    session.disconnect(false, "done").await;
}

#[tokio::test]
async fn test_rename_native() {
    let server = FakeServer::start(Flavor { rfc5804: true }).await;
    let session = ready_session(&server).await;

    session.put_script("old", "keep;").await.unwrap();
    session.set_active_script("old").await.unwrap();
    session.rename_script("old", "new").await.unwrap();

    assert_eq!(server.count("RENAMESCRIPT"), 1);
    assert_eq!(server.scripts(), vec!["new".to_string()]);
    assert_eq!(server.active(), Some("new".to_string()));

    session.disconnect(true, "done").await;
}

#[tokio::test]
async fn test_rename_fallback_keeps_active_script() {
    let server = FakeServer::start(Flavor { rfc5804: false }).await;
    let session = ready_session(&server).await;

    session.put_script("old", "keep;").await.unwrap();
    session.put_script("other", "discard;").await.unwrap();
    session.set_active_script("old").await.unwrap();

    session.rename_script("old", "new").await.unwrap();

    assert_eq!(server.count("RENAMESCRIPT"), 0);
    assert_eq!(server.scripts(), vec!["new".to_string(), "other".to_string()]);
    assert_eq!(server.active(), Some("new".to_string()));
    assert_eq!(session.get_script("new").await.unwrap(), "keep;");

    let error = session.rename_script("new", "other").await.unwrap_err();
    assert!(matches!(
        error,
        Error::No {
            code: Some(ResponseCode::AlreadyExists),
            ..
        }
    ));
    assert_eq!(server.scripts(), vec!["new".to_string(), "other".to_string()]);

    session.disconnect(false, "done").await;
}

#[tokio::test]
async fn test_rename_fallback_inactive_script() {
    let server = FakeServer::start(Flavor { rfc5804: false }).await;
    let session = ready_session(&server).await;

    session.put_script("old", "keep;").await.unwrap();
    let before = server.count("SETACTIVE");
    session.rename_script("old", "new").await.unwrap();

    assert_eq!(server.count("SETACTIVE"), before);
    assert_eq!(server.active(), None);
    assert_eq!(server.scripts(), vec!["new".to_string()]);

    session.disconnect(false, "done").await;
}

#[tokio::test]
async fn test_check_script_native_and_fallback() {
    let server = FakeServer::start(Flavor { rfc5804: true }).await;
    let session = ready_session(&server).await;
    assert_ok!(session.check_script("keep;").await);
    assert_err!(session.check_script("error;").await);
    assert_eq!(server.count("CHECKSCRIPT"), 2);
    assert!(server.scripts().is_empty());
    session.disconnect(false, "done").await;

    let legacy = FakeServer::start(Flavor { rfc5804: false }).await;
    let session = ready_session(&legacy).await;

    assert_ok!(session.check_script("").await);
    assert_eq!(legacy.count("PUTSCRIPT"), 0);

    session.check_script("keep;").await.unwrap();
    assert_eq!(legacy.count("PUTSCRIPT \"TMP_FILE_DELETE_ME\""), 1);
    assert_eq!(legacy.count("DELETESCRIPT \"TMP_FILE_DELETE_ME\""), 1);
    assert!(legacy.scripts().is_empty());

    let error = session.check_script("error;").await.unwrap_err();
    assert!(error.to_string().contains("syntax error"));

    // NOOP falls back to CAPABILITY on old servers
    session.noop().await.unwrap();
    assert_eq!(legacy.count("NOOP"), 0);
    assert_eq!(legacy.count("CAPABILITY"), 1);

    session.disconnect(false, "done").await;
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let server = FakeServer::start(Flavor { rfc5804: true }).await;
    let session = ready_session(&server).await;

    session.disconnect(false, "first").await;
    session.disconnect(false, "second").await;
    session.disconnect(true, "third").await;

    assert_eq!(server.count("LOGOUT"), 1);
    assert!(matches!(
        session.list_scripts().await,
        Err(Error::NotConnected)
    ));

    // Reconnects on demand
    session.connect().unwrap();
    session.wait_ready().await.unwrap();
    assert!(session.list_scripts().await.unwrap().is_empty());
    session.disconnect(true, "done").await;
}

#[tokio::test]
async fn test_requests_queued_while_connecting_run_after_auth() {
    let server = FakeServer::start(Flavor { rfc5804: true }).await;
    let session = Session::new(
        server.account("test"),
        Arc::new(StaticAuthenticator::new("secret")),
        None,
    );
    session.connect().unwrap();

    let (put, list) = tokio::join!(
        session.put_script("early", "keep;"),
        session.list_scripts()
    );
    put.unwrap();
    assert_eq!(list.unwrap().len(), 1);

    let commands = server.commands();
    assert!(commands[0].starts_with("AUTHENTICATE"));
    assert!(commands[1].starts_with("PUTSCRIPT"));
    assert!(commands[2].starts_with("LISTSCRIPTS"));

    session.disconnect(false, "done").await;
}

#[derive(Default)]
struct Events {
    log: Mutex<Vec<String>>,
    ready: tokio::sync::Notify,
}

impl ChannelListener for Events {
    fn on_channel_ready(&self, _session: SessionId, channel: ChannelId) {
        self.log.lock().unwrap().push(format!("ready {channel}"));
        self.ready.notify_one();
    }

    fn on_channel_closed(&self, _session: SessionId, channel: ChannelId) {
        self.log.lock().unwrap().push(format!("closed {channel}"));
    }

    fn on_session_error(&self, _session: SessionId, channel: ChannelId, error: &Error) {
        self.log.lock().unwrap().push(format!("error {channel} {error}"));
    }
}

#[tokio::test]
async fn test_registry_shares_one_connection() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sieveledger_managesieve=debug")
        .with_test_writer()
        .try_init();

    let server = FakeServer::start(Flavor { rfc5804: true }).await;
    let registry = SessionRegistry::new();
    let auth = Arc::new(StaticAuthenticator::new("secret"));

    let session = registry.create_session(server.account("work"), auth.clone(), None);
    assert_eq!(
        registry.create_session(server.account("work"), auth, None),
        session
    );

    let first_events = Arc::new(Events::default());
    let first = registry
        .create_channel(session, first_events.clone())
        .unwrap();
    registry.open_channel(session, first).unwrap();
    tokio::time::timeout(Duration::from_secs(5), first_events.ready.notified())
        .await
        .unwrap();

    // Second channel on a ready session is ready right away
    let second_events = Arc::new(Events::default());
    let second = registry
        .create_channel(session, second_events.clone())
        .unwrap();
    registry.open_channel(session, second).unwrap();
    assert_eq!(
        second_events.log.lock().unwrap().clone(),
        vec![format!("ready {second}")]
    );

    let channel = registry.get_channel(session, second).unwrap();
    assert_eq!(channel.id(), second);
    let (request, outcome) = sieveledger_managesieve::Request::oneshot(
        sieveledger_managesieve::Command::ListScripts,
    );
    channel.add_request(request);
    assert!(outcome.await.unwrap().is_ok());

    registry.close_channel(session, first).await.unwrap();
    assert_eq!(server.count("LOGOUT"), 0);
    assert!(registry.get_channel(session, second).is_ok());

    registry.close_channel(session, second).await.unwrap();
    assert_eq!(server.count("LOGOUT"), 1);
    assert_eq!(server.count("AUTHENTICATE"), 1);
    assert!(matches!(
        registry.get_channel(session, second),
        Err(Error::UnknownSession(_))
    ));
    assert!(
        first_events
            .log
            .lock()
            .unwrap()
            .contains(&format!("closed {first}"))
    );
}

#[tokio::test]
async fn test_registry_offline_rejects_channels() {
    let server = FakeServer::start(Flavor { rfc5804: true }).await;
    let registry = SessionRegistry::new();
    let session = registry.create_session(
        server.account("work"),
        Arc::new(StaticAuthenticator::new("secret")),
        None,
    );
    let events = Arc::new(Events::default());
    let channel = registry.create_channel(session, events.clone()).unwrap();

    registry.set_offline(true);
    assert!(matches!(
        registry.open_channel(session, channel),
        Err(Error::Offline)
    ));
    assert!(server.commands().is_empty());

    registry.set_offline(false);
    registry.open_channel(session, channel).unwrap();
    tokio::time::timeout(Duration::from_secs(5), events.ready.notified())
        .await
        .unwrap();
    assert!(registry.get_channel(session, channel).is_ok());

    registry.close_channel(session, channel).await.unwrap();
    assert_eq!(server.count("LOGOUT"), 1);
}

/// Answers every connection with a referral greeting and counts them.
async fn referring_server(
    target: impl Fn(u16) -> String + Send + 'static,
) -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let greeting = format!("BYE (REFERRAL \"{}\") \"Try elsewhere\"\r\n", target(port));
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = socket.write_all(greeting.as_bytes()).await;
        }
    });

    (port, accepted)
}

fn session_for(config: Config) -> Session {
    Session::new(
        Account::new("test", "alice", config),
        Arc::new(StaticAuthenticator::new("secret")),
        None,
    )
}

#[tokio::test]
async fn test_referral_in_greeting_is_followed() {
    let server = FakeServer::start(Flavor { rfc5804: true }).await;
    let target = server.port;
    let (port, accepted) =
        referring_server(move |_| format!("sieve://127.0.0.1:{target}")).await;

    let config = Config::builder("127.0.0.1")
        .port(port)
        .security(Security::None)
        .watchdog(Duration::from_secs(5))
        .build();
    let session = session_for(config);
    session.connect().unwrap();
    assert_ok!(session.wait_ready().await);

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(server.count("AUTHENTICATE"), 1);
    assert!(session.list_scripts().await.unwrap().is_empty());

    session.disconnect(false, "done").await;
    assert!(session.last_error().is_none());
}

#[tokio::test]
async fn test_referral_loop_stops_after_three_hops() {
    let (port, accepted) = referring_server(|port| format!("sieve://127.0.0.1:{port}")).await;

    let config = Config::builder("127.0.0.1")
        .port(port)
        .security(Security::None)
        .watchdog(Duration::from_secs(5))
        .build();
    let session = session_for(config);
    session.connect().unwrap();
    assert_err!(session.wait_ready().await);

    // First connection plus three referrals
    assert_eq!(accepted.load(Ordering::SeqCst), 4);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.last_error().unwrap().starts_with("Referred to 127.0.0.1"));
}

#[tokio::test]
async fn test_starttls_required_but_not_offered() {
    let server = FakeServer::start(Flavor { rfc5804: true }).await;
    let config = Config::builder("127.0.0.1")
        .port(server.port)
        .security(Security::StartTls)
        .watchdog(Duration::from_secs(5))
        .build();
    let session = session_for(config);
    session.connect().unwrap();

    let result = session.wait_ready().await;
    assert!(matches!(result, Err(Error::Disconnected(_))));
    assert_eq!(
        session.last_error().as_deref(),
        Some("Unsupported by server: STARTTLS")
    );
    // Credentials never went over plain text
    assert_eq!(server.count("AUTHENTICATE"), 0);
}

struct AcceptAny;

impl CertificateHandler for AcceptAny {
    fn on_untrusted_certificate(
        &self,
        _host: &str,
        _certificate: &[u8],
        _error: &rustls::Error,
    ) -> bool {
        true
    }
}

fn tls_acceptor() -> TlsAcceptor {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let chain: Vec<CertificateDer<'static>> = vec![cert.der().clone()];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Upgrades on STARTTLS, then stays silent until asked for CAPABILITY.
async fn silent_after_tls_server() -> (u16, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let log = Arc::new(Mutex::new(Vec::new()));
    let acceptor = tls_acceptor();

    let lines = log.clone();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket
            .write_all(b"\"IMPLEMENTATION\" \"Old Sieve\"\r\n\"STARTTLS\"\r\nOK\r\n")
            .await
            .unwrap();
        let mut line = String::new();
        BufReader::new(&mut socket).read_line(&mut line).await.unwrap();
        lines.lock().unwrap().push(line.trim_end().to_string());
        socket.write_all(b"OK \"Begin TLS\"\r\n").await.unwrap();

        let tls = acceptor.accept(socket).await.unwrap();
        let (read, mut write) = tokio::io::split(tls);
        let mut reader = BufReader::new(read);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let line = line.trim_end().to_string();
            lines.lock().unwrap().push(line.clone());
            let reply: &[u8] = match line.as_str() {
                "CAPABILITY" => {
                    b"\"IMPLEMENTATION\" \"Old Sieve\"\r\n\"SIEVE\" \"fileinto\"\r\nOK\r\n"
                }
                "LOGOUT" => b"OK \"Bye\"\r\n",
                _ => b"NO \"Unknown command\"\r\n",
            };
            if write.write_all(reply).await.is_err() || line == "LOGOUT" {
                return;
            }
        }
    });

    (port, log)
}

#[tokio::test]
async fn test_capability_requested_when_silent_after_starttls() {
    let (port, log) = silent_after_tls_server().await;
    let config = Config::builder("127.0.0.1")
        .port(port)
        .security(Security::StartTls)
        .sasl(SaslPreference::None)
        .watchdog(Duration::from_millis(300))
        .build();
    let session = Session::new(
        Account::new("test", "alice", config),
        Arc::new(StaticAuthenticator::new("secret")),
        Some(Arc::new(AcceptAny)),
    );
    session.connect().unwrap();
    assert_ok!(session.wait_ready().await);

    let caps = session.capabilities_snapshot().unwrap();
    assert!(!caps.has_starttls());
    assert!(caps.supports_extension("fileinto"));
    assert_eq!(*log.lock().unwrap(), vec!["STARTTLS", "CAPABILITY"]);

    session.disconnect(false, "done").await;
    assert!(session.last_error().is_none());
}

#[tokio::test]
async fn test_stalled_request_times_out_and_queue_moves_on() {
    let server = FakeServer::start(Flavor { rfc5804: true }).await;
    let session = ready_session(&server).await;
    session.put_script("kept", "keep;").await.unwrap();

    tokio::time::pause();
    let stalled = session.get_script("stalled");
    let next = session.get_script("kept");
    let (stalled, next) = tokio::join!(stalled, next);

    assert!(matches!(
        stalled,
        Err(Error::Timeout(interval)) if interval == Duration::from_secs(5)
    ));
    assert_eq!(next.unwrap(), "keep;");
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(server.count("GETSCRIPT"), 2);

    session.disconnect(false, "done").await;
}
