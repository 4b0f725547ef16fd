//! Listener traits for request completion and channel lifecycle.
//!
//! Every method is required. A listener that forgets a case fails to
//! compile instead of silently dropping an outcome.
//!
//! # Example
//!
//! ```
//! use sieveledger_managesieve::handler::RequestListener;
//! use sieveledger_managesieve::{Error, Response};
//!
//! struct PrintListener;
//!
//! impl RequestListener for PrintListener {
//!     fn on_response(self: Box<Self>, response: Response) {
//!         println!("done: {:?}", response.status);
//!     }
//!     fn on_error(self: Box<Self>, error: Error) {
//!         println!("refused: {error}");
//!     }
//!     fn on_timeout(self: Box<Self>, error: Error) {
//!         println!("gave up: {error}");
//!     }
//! }
//! ```

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::parser::Response;
use crate::registry::{ChannelId, SessionId};
use crate::{Error, Result};

/// Receives the outcome of one request.
///
/// Each method consumes the listener, so exactly one of them runs.
pub trait RequestListener: Send {
    /// The server answered OK (or BYE to a LOGOUT).
    fn on_response(self: Box<Self>, response: Response);

    /// The server refused the command (NO, BYE), its answer was malformed,
    /// or the request was rejected before it was sent.
    fn on_error(self: Box<Self>, error: Error);

    /// The watchdog fired or the session went away before an answer came.
    fn on_timeout(self: Box<Self>, error: Error);
}

impl RequestListener for oneshot::Sender<Result<Response>> {
    fn on_response(self: Box<Self>, response: Response) {
        // Receiver may be gone; the outcome is simply unobserved then
        let _ = self.send(Ok(response));
    }

    fn on_error(self: Box<Self>, error: Error) {
        let _ = self.send(Err(error));
    }

    fn on_timeout(self: Box<Self>, error: Error) {
        let _ = self.send(Err(error));
    }
}

/// Adapts a closure taking the request outcome.
pub struct CallbackListener<F>(F);

impl<F> CallbackListener<F>
where
    F: FnOnce(Result<Response>) + Send,
{
    /// Wraps a closure.
    #[must_use]
    pub const fn new(callback: F) -> Self {
        Self(callback)
    }
}

impl<F> RequestListener for CallbackListener<F>
where
    F: FnOnce(Result<Response>) + Send,
{
    fn on_response(self: Box<Self>, response: Response) {
        let callback = self.0;
        callback(Ok(response));
    }

    fn on_error(self: Box<Self>, error: Error) {
        let callback = self.0;
        callback(Err(error));
    }

    fn on_timeout(self: Box<Self>, error: Error) {
        let callback = self.0;
        callback(Err(error));
    }
}

/// A listener that only logs the outcome, used for keep-alives.
#[derive(Debug, Clone, Copy)]
pub struct LoggingListener {
    verb: &'static str,
}

impl LoggingListener {
    /// Creates a logging listener for the given command verb.
    #[must_use]
    pub const fn new(verb: &'static str) -> Self {
        Self { verb }
    }
}

impl RequestListener for LoggingListener {
    fn on_response(self: Box<Self>, response: Response) {
        debug!(verb = self.verb, status = %response.status, "Request completed");
    }

    fn on_error(self: Box<Self>, error: Error) {
        warn!(verb = self.verb, %error, "Request failed");
    }

    fn on_timeout(self: Box<Self>, error: Error) {
        warn!(verb = self.verb, %error, "Request abandoned");
    }
}

/// Receives lifecycle events for one channel.
pub trait ChannelListener: Send + Sync {
    /// The session is connected and authenticated; requests may be sent.
    fn on_channel_ready(&self, session: SessionId, channel: ChannelId);

    /// The channel was closed through the registry.
    fn on_channel_closed(&self, session: SessionId, channel: ChannelId);

    /// The session failed to connect or lost its connection.
    fn on_session_error(&self, session: SessionId, channel: ChannelId, error: &Error);
}
