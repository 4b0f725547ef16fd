//! Shared sessions with reference-counted channels.
//!
//! Several consumers working on the same account share one session. Each
//! consumer opens a channel on it; the session connects when the first
//! channel is opened and logs out when the last one is closed.
//!
//! Listeners are always called after the registry lock is released, so they
//! may call back into the registry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info};

use crate::connection::{Account, CertificateHandler};
use crate::handler::ChannelListener;
use crate::protocol::SessionState;
use crate::request::Request;
use crate::session::{Authenticator, Session, SessionObserver};
use crate::{Error, Result};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);
static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

/// Identifies a session. Unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Identifies a channel. Unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

struct ChannelSlot {
    listener: Arc<dyn ChannelListener>,
    /// Opened while the session was still connecting.
    awaiting: bool,
}

struct SessionEntry {
    session: Session,
    channels: BTreeMap<ChannelId, ChannelSlot>,
}

#[derive(Default)]
struct Table {
    sessions: HashMap<SessionId, SessionEntry>,
    by_account: HashMap<String, SessionId>,
}

#[derive(Default)]
struct RegistryInner {
    table: Mutex<Table>,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forwards session lifecycle events to the session's channels.
struct Observer {
    registry: Weak<RegistryInner>,
}

impl SessionObserver for Observer {
    fn on_ready(&self, session: SessionId) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        let ready: Vec<_> = {
            let mut table = registry.lock();
            let Some(entry) = table.sessions.get_mut(&session) else {
                return;
            };
            entry
                .channels
                .iter_mut()
                .filter(|(_, slot)| slot.awaiting)
                .map(|(id, slot)| {
                    slot.awaiting = false;
                    (*id, slot.listener.clone())
                })
                .collect()
        };

        for (channel, listener) in ready {
            listener.on_channel_ready(session, channel);
        }
    }

    fn on_error(&self, session: SessionId, error: &Error) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        let listeners: Vec<_> = {
            let mut table = registry.lock();
            let Some(entry) = table.sessions.get_mut(&session) else {
                return;
            };
            entry
                .channels
                .iter_mut()
                .map(|(id, slot)| {
                    slot.awaiting = false;
                    (*id, slot.listener.clone())
                })
                .collect()
        };

        for (channel, listener) in listeners {
            listener.on_session_error(session, channel, error);
        }
    }
}

/// Registry of shared sessions, one per account key.
///
/// Cloning is cheap; clones share the registry.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.inner.lock();
        f.debug_struct("SessionRegistry")
            .field("sessions", &table.sessions.len())
            .finish()
    }
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for an account, creating it if needed.
    ///
    /// Calling this again with the same account key returns the same id
    /// without touching the existing session.
    pub fn create_session(
        &self,
        account: Account,
        authenticator: Arc<dyn Authenticator>,
        certificates: Option<Arc<dyn CertificateHandler>>,
    ) -> SessionId {
        let mut table = self.inner.lock();
        if let Some(id) = table.by_account.get(&account.key) {
            return *id;
        }

        let id = SessionId::next();
        let observer: Arc<dyn SessionObserver> = Arc::new(Observer {
            registry: Arc::downgrade(&self.inner),
        });
        debug!(session = %id, account = %account.key, "Creating session");

        table.by_account.insert(account.key.clone(), id);
        let session = Session::build(id, account, authenticator, certificates, Some(observer));
        table.sessions.insert(
            id,
            SessionEntry {
                session,
                channels: BTreeMap::new(),
            },
        );
        id
    }

    /// Adds a channel to a session. The channel is not open yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSession`] if the session does not exist.
    pub fn create_channel(
        &self,
        session: SessionId,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<ChannelId> {
        let mut table = self.inner.lock();
        let entry = table
            .sessions
            .get_mut(&session)
            .ok_or(Error::UnknownSession(session.get()))?;

        let id = ChannelId::next();
        entry.channels.insert(
            id,
            ChannelSlot {
                listener,
                awaiting: false,
            },
        );
        debug!(%session, channel = %id, channels = entry.channels.len(), "Channel created");
        Ok(id)
    }

    /// Opens a channel.
    ///
    /// A ready session reports the channel ready right away. Otherwise the
    /// listener is told once the session is up; a disconnected session
    /// starts connecting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSession`] or [`Error::UnknownChannel`] for
    /// bad ids, [`Error::Offline`] while offline, and
    /// [`Error::Disconnected`] while the session is closing.
    pub fn open_channel(&self, session: SessionId, channel: ChannelId) -> Result<()> {
        let (handle, listener, state) = {
            let mut table = self.inner.lock();
            let entry = table
                .sessions
                .get_mut(&session)
                .ok_or(Error::UnknownSession(session.get()))?;
            let state = entry.session.state();
            let slot = entry
                .channels
                .get_mut(&channel)
                .ok_or(Error::UnknownChannel(channel.get()))?;

            match state {
                SessionState::Offline => return Err(Error::Offline),
                SessionState::Disconnecting => {
                    return Err(Error::Disconnected("session is closing".to_string()));
                }
                SessionState::Ready | SessionState::Busy => {}
                SessionState::Disconnected
                | SessionState::Connecting
                | SessionState::Authenticating => slot.awaiting = true,
            }
            (entry.session.clone(), slot.listener.clone(), state)
        };

        match state {
            SessionState::Ready | SessionState::Busy => {
                listener.on_channel_ready(session, channel);
            }
            SessionState::Disconnected => {
                info!(%session, %channel, "Connecting session for channel");
                handle.connect()?;
            }
            _ => debug!(%session, %channel, "Channel waits for session"),
        }
        Ok(())
    }

    /// Closes a channel.
    ///
    /// Closing the last channel removes the session and logs it out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSession`] or [`Error::UnknownChannel`] for
    /// bad ids.
    pub async fn close_channel(&self, session: SessionId, channel: ChannelId) -> Result<()> {
        let (slot, orphaned) = {
            let mut table = self.inner.lock();
            let entry = table
                .sessions
                .get_mut(&session)
                .ok_or(Error::UnknownSession(session.get()))?;
            let slot = entry
                .channels
                .remove(&channel)
                .ok_or(Error::UnknownChannel(channel.get()))?;

            let orphaned = if entry.channels.is_empty() {
                let key = entry.session.account().key.clone();
                table.by_account.remove(&key);
                table.sessions.remove(&session).map(|entry| entry.session)
            } else {
                None
            };
            (slot, orphaned)
        };

        slot.listener.on_channel_closed(session, channel);

        if let Some(orphaned) = orphaned {
            info!(%session, "Last channel closed, ending session");
            orphaned.disconnect(false, "last channel closed").await;
        }
        Ok(())
    }

    /// Returns a handle for sending requests on an open channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSession`] or [`Error::UnknownChannel`] for
    /// bad ids, [`Error::Offline`] while offline, and
    /// [`Error::NotConnected`] if the session is down.
    pub fn get_channel(&self, session: SessionId, channel: ChannelId) -> Result<Channel> {
        let table = self.inner.lock();
        let entry = table
            .sessions
            .get(&session)
            .ok_or(Error::UnknownSession(session.get()))?;
        if !entry.channels.contains_key(&channel) {
            return Err(Error::UnknownChannel(channel.get()));
        }

        match entry.session.state() {
            SessionState::Offline => Err(Error::Offline),
            state if !state.is_alive() => Err(Error::NotConnected),
            _ => Ok(Channel {
                session: entry.session.clone(),
                id: channel,
            }),
        }
    }

    /// Returns the session with the given id.
    #[must_use]
    pub fn session(&self, session: SessionId) -> Option<Session> {
        self.inner
            .lock()
            .sessions
            .get(&session)
            .map(|entry| entry.session.clone())
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Returns true if no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Switches the offline overlay on every session.
    pub fn set_offline(&self, offline: bool) {
        let sessions: Vec<_> = self
            .inner
            .lock()
            .sessions
            .values()
            .map(|entry| entry.session.clone())
            .collect();

        info!(offline, sessions = sessions.len(), "Network status changed");
        for session in sessions {
            session.set_offline(offline);
        }
    }
}

/// An open channel on a shared session.
#[derive(Debug, Clone)]
pub struct Channel {
    session: Session,
    id: ChannelId,
}

impl Channel {
    /// Returns the channel id.
    #[must_use]
    pub const fn id(&self) -> ChannelId {
        self.id
    }

    /// Returns the shared session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Queues a request on the session.
    pub fn add_request(&self, request: Request) {
        self.session.add_request(request);
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
    use crate::command::Command;
    use crate::connection::{Config, Security};
    use crate::session::StaticAuthenticator;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ChannelListener for Recorder {
        fn on_channel_ready(&self, _session: SessionId, channel: ChannelId) {
            self.events.lock().unwrap().push(format!("ready {channel}"));
        }

        fn on_channel_closed(&self, _session: SessionId, channel: ChannelId) {
            self.events.lock().unwrap().push(format!("closed {channel}"));
        }

        fn on_session_error(&self, _session: SessionId, channel: ChannelId, _error: &Error) {
            self.events.lock().unwrap().push(format!("error {channel}"));
        }
    }

    fn account(key: &str) -> Account {
        let config = Config::builder("127.0.0.1")
            .port(1)
            .security(Security::None)
            .build();
        Account::new(key, "alice", config)
    }

    fn auth() -> Arc<dyn Authenticator> {
        Arc::new(StaticAuthenticator::new("secret"))
    }

    #[test]
    fn test_create_session_is_idempotent_per_account() {
        let registry = SessionRegistry::new();
        let first = registry.create_session(account("a"), auth(), None);
        let again = registry.create_session(account("a"), auth(), None);
        let other = registry.create_session(account("b"), auth(), None);

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unknown_ids() {
        let registry = SessionRegistry::new();
        let listener = Arc::new(Recorder::default());
        let missing = SessionId(u64::MAX);

        assert!(matches!(
            registry.create_channel(missing, listener),
            Err(Error::UnknownSession(_))
        ));

        let session = registry.create_session(account("a"), auth(), None);
        assert!(matches!(
            registry.get_channel(session, ChannelId(u64::MAX)),
            Err(Error::UnknownChannel(_))
        ));
        assert!(matches!(
            registry.open_channel(session, ChannelId(u64::MAX)),
            Err(Error::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_get_channel_fails_fast_when_not_connected() {
        let registry = SessionRegistry::new();
        let session = registry.create_session(account("a"), auth(), None);
        let channel = registry
            .create_channel(session, Arc::new(Recorder::default()))
            .unwrap();

        assert!(matches!(
            registry.get_channel(session, channel),
            Err(Error::NotConnected)
        ));

        registry.set_offline(true);
        assert!(matches!(
            registry.get_channel(session, channel),
            Err(Error::Offline)
        ));
        assert!(matches!(
            registry.open_channel(session, channel),
            Err(Error::Offline)
        ));
    }

    #[tokio::test]
    async fn test_close_last_channel_removes_session() {
        let registry = SessionRegistry::new();
        let session = registry.create_session(account("a"), auth(), None);
        let listener = Arc::new(Recorder::default());
        let first = registry.create_channel(session, listener.clone()).unwrap();
        let second = registry.create_channel(session, listener.clone()).unwrap();

        registry.close_channel(session, first).await.unwrap();
        assert!(registry.session(session).is_some());

        registry.close_channel(session, second).await.unwrap();
        assert!(registry.session(session).is_none());
        assert!(registry.is_empty());
        assert_eq!(
            listener.events(),
            vec![format!("closed {first}"), format!("closed {second}")]
        );

        assert!(matches!(
            registry.close_channel(session, second).await,
            Err(Error::UnknownSession(_))
        ));

        // Account key is free again
        let fresh = registry.create_session(account("a"), auth(), None);
        assert_ne!(fresh, session);
    }

    #[tokio::test]
    async fn test_failed_connect_notifies_awaiting_channels() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let registry = SessionRegistry::new();
        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::None)
            .build();
        let session = registry.create_session(Account::new("a", "alice", config), auth(), None);
        let recorder = Arc::new(Recorder::default());
        let channel = registry.create_channel(session, recorder.clone()).unwrap();

        registry.open_channel(session, channel).unwrap();
        let handle = registry.session(session).unwrap();
        let _ = handle.wait_ready().await;

        // Let the driver finish its shutdown
        tokio::task::yield_now().await;
        assert_eq!(recorder.events(), vec![format!("error {channel}")]);
    }

    #[tokio::test]
    async fn test_channel_request_without_connection_fails() {
        let registry = SessionRegistry::new();
        let session = registry.create_session(account("a"), auth(), None);
        let handle = registry.session(session).unwrap();
        let channel = Channel {
            session: handle,
            id: ChannelId::next(),
        };

        let (request, outcome) = Request::oneshot(Command::Noop);
        channel.add_request(request);
        assert!(matches!(outcome.await.unwrap(), Err(Error::NotConnected)));
    }
}
