//! Requests: a command paired with the listener awaiting its outcome.

use std::fmt;

use tokio::sync::oneshot;

use crate::command::Command;
use crate::handler::{CallbackListener, RequestListener};
use crate::parser::Response;
use crate::types::Status;
use crate::{Error, Result};

/// A command queued for sending, together with its listener.
///
/// The listener is notified exactly once. A request dropped without an
/// outcome reports [`Error::Disconnected`] through `on_timeout`.
pub struct Request {
    command: Command,
    listener: Option<Box<dyn RequestListener>>,
}

impl Request {
    /// Creates a request with the given listener.
    #[must_use]
    pub fn new(command: Command, listener: impl RequestListener + 'static) -> Self {
        Self {
            command,
            listener: Some(Box::new(listener)),
        }
    }

    /// Creates a request whose outcome is passed to a closure.
    #[must_use]
    pub fn with_callback<F>(command: Command, callback: F) -> Self
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        Self::new(command, CallbackListener::new(callback))
    }

    /// Creates a request whose outcome arrives on a oneshot channel.
    #[must_use]
    pub fn oneshot(command: Command) -> (Self, oneshot::Receiver<Result<Response>>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(command, tx), rx)
    }

    /// Returns the command.
    #[must_use]
    pub const fn command(&self) -> &Command {
        &self.command
    }

    /// Delivers a complete server answer.
    ///
    /// OK goes to `on_response`, NO and BYE to `on_error`. A BYE answering
    /// LOGOUT counts as success.
    pub(crate) fn complete(mut self, response: Response) {
        let Some(listener) = self.listener.take() else {
            return;
        };

        match response.status {
            Status::Ok => listener.on_response(response),
            Status::Bye if self.command.accepts_bye() => listener.on_response(response),
            Status::No | Status::Bye => match response.into_result() {
                Ok(response) => listener.on_response(response),
                Err(error) => listener.on_error(error),
            },
        }
    }

    /// Fails the request through `on_error`.
    pub(crate) fn fail(mut self, error: Error) {
        if let Some(listener) = self.listener.take() {
            listener.on_error(error);
        }
    }

    /// Abandons the request through `on_timeout`.
    pub(crate) fn abandon(mut self, error: Error) {
        if let Some(listener) = self.listener.take() {
            listener.on_timeout(error);
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.on_timeout(Error::Disconnected("request dropped".to_string()));
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("verb", &self.command.verb())
            .field("pending", &self.listener.is_some())
            .finish_non_exhaustive()
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
    use crate::types::ResponseCode;

    fn response(status: Status) -> Response {
        Response {
            message: Some("msg".to_string()),
            ..Response::new(status)
        }
    }

    #[test]
    fn test_ok_goes_to_response() {
        let (request, mut rx) = Request::oneshot(Command::Noop);
        request.complete(response(Status::Ok));
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_no_goes_to_error_with_message() {
        let (request, mut rx) = Request::oneshot(Command::Noop);
        request.complete(Response {
            code: Some(ResponseCode::TryLater),
            ..response(Status::No)
        });
        match rx.try_recv().unwrap() {
            Err(Error::No { code, message }) => {
                assert_eq!(code, Some(ResponseCode::TryLater));
                assert_eq!(message, "msg");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bye_accepted_for_logout_only() {
        let (request, mut rx) = Request::oneshot(Command::Logout);
        request.complete(response(Status::Bye));
        assert!(rx.try_recv().unwrap().is_ok());

        let (request, mut rx) = Request::oneshot(Command::ListScripts);
        request.complete(response(Status::Bye));
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::Bye { .. })));
    }

    #[test]
    fn test_drop_reports_disconnect() {
        let (request, mut rx) = Request::oneshot(Command::Noop);
        drop(request);
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::Disconnected(_))));
    }

    #[test]
    fn test_callback_runs_once() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let request = Request::with_callback(Command::Noop, move |result| {
            assert!(matches!(result, Err(Error::Timeout(_))));
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        request.abandon(Error::Timeout(std::time::Duration::from_secs(1)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
