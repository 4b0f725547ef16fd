//! Sans-I/O ManageSieve protocol engine.
//!
// Allow missing_const_for_fn since many functions can't be const in stable Rust.
#![allow(clippy::missing_const_for_fn)]
//!
//! The engine owns the request queue, the receive buffer and the watchdog,
//! and performs no I/O itself:
//!
//! - Requests enter via `enqueue()`
//! - Bytes to send come out of `poll_transmit()`
//! - Received bytes go in via `handle_input()`
//! - The next deadline is reported by `poll_timeout()`
//! - Expired deadlines are handled by `handle_timeout()`
//!
//! At most one request is in flight. The server answers strictly in order,
//! so the response bytes at the front of the buffer always belong to the
//! head request.
//!
//! # Example
//!
//! ```
//! use std::time::Instant;
//!
//! use sieveledger_managesieve::protocol::{Engine, EngineConfig};
//! use sieveledger_managesieve::{Command, Request};
//!
//! let now = Instant::now();
//! let mut engine = Engine::new(EngineConfig::default());
//! engine.begin_connect().unwrap();
//! engine.set_ready(now).unwrap();
//!
//! let (request, mut outcome) = Request::oneshot(Command::Noop);
//! engine.enqueue(request, now);
//! assert_eq!(engine.poll_transmit().unwrap().data, b"NOOP\r\n");
//!
//! engine.handle_input(b"OK \"Done\"\r\n", now);
//! assert!(outcome.try_recv().unwrap().is_ok());
//! ```

mod state;
mod transmit;
mod watchdog;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub use state::SessionState;
pub use transmit::Transmit;
pub use watchdog::Watchdog;

use tracing::{debug, info, trace, warn};

use crate::command::Command;
use crate::handler::LoggingListener;
use crate::parser::{ParseOutcome, Reply, Response};
use crate::request::Request;
use crate::types::{Capabilities, Status};
use crate::{Error, Result};

/// Default watchdog interval.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(20);

/// Engine timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long an in-flight request may wait for bytes before it times out.
    pub watchdog: Duration,
    /// Idle interval after which a keep-alive is sent.
    pub keep_alive: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watchdog: DEFAULT_WATCHDOG,
            keep_alive: None,
        }
    }
}

/// Events produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// The server sent a capability listing.
    Capabilities(Capabilities),
    /// A request received its final answer.
    Completed {
        /// Command verb.
        verb: &'static str,
        /// Status of the answer.
        status: Status,
    },
    /// A request's answer could not be parsed.
    Malformed {
        /// Command verb.
        verb: &'static str,
    },
    /// The watchdog fired for a request.
    TimedOut {
        /// Command verb.
        verb: &'static str,
    },
    /// The server ended the session with BYE or answered LOGOUT.
    Disconnected {
        /// Server message.
        reason: String,
    },
}

/// The request currently on the wire.
#[derive(Debug)]
struct InFlight {
    request: Request,
    /// Number of SASL challenges answered so far.
    step: usize,
}

/// Sans-I/O ManageSieve protocol state machine.
#[derive(Debug)]
pub struct Engine {
    /// Connection phase; `Offline` is never stored here.
    phase: SessionState,
    /// Host network is down.
    offline: bool,
    /// Requests waiting to be sent.
    queue: VecDeque<Request>,
    /// Request awaiting its answer.
    in_flight: Option<InFlight>,
    /// Outbound data queue.
    outbound: VecDeque<Transmit>,
    /// Inbound buffer for partial data.
    inbound: Vec<u8>,
    /// Skipping the rest of a malformed response.
    resync: bool,
    watchdog: Watchdog,
    keep_alive: Option<Duration>,
    /// Start of the current idle period.
    idle_since: Option<Instant>,
    /// Last capability listing seen.
    capabilities: Option<Capabilities>,
    /// Events not yet handed to the caller.
    events: Vec<ProtocolEvent>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Creates a disconnected engine.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            phase: SessionState::Disconnected,
            offline: false,
            queue: VecDeque::new(),
            in_flight: None,
            outbound: VecDeque::new(),
            inbound: Vec::new(),
            resync: false,
            watchdog: Watchdog::new(config.watchdog),
            keep_alive: config.keep_alive,
            idle_since: None,
            capabilities: None,
            events: Vec::new(),
        }
    }

    /// Returns the reported state, with the offline overlay applied.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.offline {
            SessionState::Offline
        } else {
            self.phase
        }
    }

    /// Returns the connection phase, ignoring the offline overlay.
    #[must_use]
    pub fn phase(&self) -> SessionState {
        self.phase
    }

    /// Returns true while the offline overlay is active.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Returns the last capability listing the server sent.
    #[must_use]
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Returns the number of requests waiting behind the in-flight one.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Returns the verb of the request on the wire, if any.
    #[must_use]
    pub fn in_flight(&self) -> Option<&'static str> {
        self.in_flight.as_ref().map(|f| f.request.command().verb())
    }

    /// Returns the watchdog interval.
    #[must_use]
    pub fn watchdog_interval(&self) -> Duration {
        self.watchdog.interval()
    }

    /// Starts a connection attempt.
    ///
    /// # Errors
    ///
    /// Returns an error unless the engine is disconnected.
    pub fn begin_connect(&mut self) -> Result<()> {
        self.require(SessionState::Connecting)
    }

    /// Marks the start of the SASL exchange.
    ///
    /// # Errors
    ///
    /// Returns an error unless the engine is connecting.
    pub fn set_authenticating(&mut self) -> Result<()> {
        self.require(SessionState::Authenticating)
    }

    /// Marks the session as authenticated and starts sending queued requests.
    ///
    /// # Errors
    ///
    /// Returns an error unless the engine is connecting or authenticating.
    pub fn set_ready(&mut self, now: Instant) -> Result<()> {
        self.require(SessionState::Ready)?;
        self.idle_since = Some(now);
        self.advance(now);
        self.process_input(now);
        Ok(())
    }

    /// Queues a request.
    ///
    /// Rejected requests are failed through their listener right away:
    /// with [`Error::Offline`] while offline, [`Error::NotConnected`] while
    /// disconnected and [`Error::Disconnected`] while disconnecting.
    pub fn enqueue(&mut self, request: Request, now: Instant) {
        let verb = request.command().verb();

        if self.offline {
            debug!(verb, "Rejecting request while offline");
            request.fail(Error::Offline);
            return;
        }

        match self.phase {
            SessionState::Disconnected => {
                request.fail(Error::NotConnected);
                return;
            }
            SessionState::Disconnecting => {
                request.fail(Error::Disconnected("session is closing".to_string()));
                return;
            }
            _ => {}
        }

        trace!(verb, queued = self.queue.len(), "Request queued");
        self.queue.push_back(request);
        self.advance(now);
        self.process_input(now);
    }

    /// Starts a graceful logout.
    ///
    /// The LOGOUT request is sent as soon as the in-flight request (if any)
    /// completes; queued requests stay queued until [`Engine::disconnect`].
    pub fn logout(&mut self, request: Request, now: Instant) {
        if !matches!(
            self.phase,
            SessionState::Ready | SessionState::Busy | SessionState::Authenticating
        ) {
            request.fail(Error::InvalidState(format!("cannot log out while {}", self.phase)));
            return;
        }

        self.transition(SessionState::Disconnecting);
        self.queue.push_front(request);
        self.advance(now);
        self.process_input(now);
    }

    /// Returns the next data to transmit, if any.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.outbound.pop_front()
    }

    /// Returns the next deadline the caller must report via
    /// [`Engine::handle_timeout`].
    #[must_use]
    pub fn poll_timeout(&self) -> Option<Instant> {
        match (self.watchdog.deadline(), self.keep_alive_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Feeds received data into the engine.
    ///
    /// Returns the events produced while processing it.
    pub fn handle_input(&mut self, data: &[u8], now: Instant) -> Vec<ProtocolEvent> {
        self.inbound.extend_from_slice(data);
        self.process_input(now);
        self.take_events()
    }

    /// Handles an expired deadline.
    ///
    /// A fired watchdog abandons the in-flight request with
    /// [`Error::Timeout`], discards the partial response and moves on to the
    /// next request. An expired idle interval queues a keep-alive.
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<ProtocolEvent> {
        if self.watchdog.is_expired(now) {
            self.watchdog.disarm();
            if let Some(InFlight { request, .. }) = self.in_flight.take() {
                let verb = request.command().verb();
                warn!(verb, interval = ?self.watchdog.interval(), "Watchdog fired");
                self.inbound.clear();
                request.abandon(Error::Timeout(self.watchdog.interval()));
                self.events.push(ProtocolEvent::TimedOut { verb });
                self.advance(now);
                self.process_input(now);
            }
        } else if self.keep_alive_deadline().is_some_and(|deadline| now >= deadline) {
            let command = match &self.capabilities {
                Some(caps) if caps.can_noop() => Command::Noop,
                _ => Command::Capability,
            };
            debug!(verb = command.verb(), "Sending keep-alive");
            let listener = LoggingListener::new(command.verb());
            self.enqueue(Request::new(command, listener), now);
        }

        self.take_events()
    }

    /// Returns events produced outside `handle_input`/`handle_timeout`.
    pub fn take_events(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.events)
    }

    /// Switches the offline overlay.
    ///
    /// While offline nothing new is transmitted. The in-flight request keeps
    /// its watchdog and queued requests stay queued.
    pub fn set_offline(&mut self, offline: bool, now: Instant) {
        if self.offline == offline {
            return;
        }

        info!(offline, "Network status changed");
        self.offline = offline;
        if !offline {
            if self.phase.is_ready() {
                self.idle_since = Some(now);
            }
            self.advance(now);
            self.process_input(now);
        }
    }

    /// Tears the session down.
    ///
    /// The in-flight request and then every queued request, in FIFO order,
    /// are abandoned with [`Error::Disconnected`]. Calling this on a
    /// disconnected engine does nothing.
    pub fn disconnect(&mut self, reason: &str) {
        if self.phase == SessionState::Disconnected
            && self.in_flight.is_none()
            && self.queue.is_empty()
        {
            return;
        }

        info!(reason, pending = self.queue.len(), "Session disconnected");
        self.watchdog.disarm();
        self.idle_since = None;
        self.inbound.clear();
        self.resync = false;
        self.outbound.clear();
        self.capabilities = None;
        if self.phase != SessionState::Disconnected {
            self.transition(SessionState::Disconnected);
        }

        let in_flight = self.in_flight.take().map(|f| f.request);
        let queued = std::mem::take(&mut self.queue);
        for request in in_flight.into_iter().chain(queued) {
            request.abandon(Error::Disconnected(reason.to_string()));
        }
    }

    /// Parses as many responses from the buffer as possible.
    fn process_input(&mut self, now: Instant) {
        while !self.inbound.is_empty() {
            if self.resync && !self.skip_broken_response() {
                break;
            }
            if self.inbound.is_empty() {
                break;
            }

            let Some(in_flight) = self.in_flight.as_mut() else {
                break;
            };

            match in_flight.request.command().parse_response(&self.inbound) {
                ParseOutcome::Incomplete => {
                    self.watchdog.arm(now);
                    break;
                }
                ParseOutcome::Parsed {
                    value: Reply::Challenge(_),
                    consumed,
                } => {
                    self.inbound.drain(..consumed);
                    let answer = in_flight.request.command().continuation(in_flight.step);
                    in_flight.step += 1;
                    trace!(step = in_flight.step, "Answering SASL challenge");
                    self.outbound.push_back(Transmit::sensitive(answer));
                    self.watchdog.arm(now);
                }
                ParseOutcome::Parsed {
                    value: Reply::Complete(response),
                    consumed,
                } => {
                    self.inbound.drain(..consumed);
                    self.complete(response, now);
                }
                ParseOutcome::Fatal(error) => {
                    self.resync = true;
                    self.fail_in_flight(error, now);
                }
            }
        }
    }

    /// Drops whole lines up to and including the next status line, which
    /// ends the malformed response. Returns false while that line is still
    /// missing.
    fn skip_broken_response(&mut self) -> bool {
        while let Some(end) = self.inbound.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = self.inbound.drain(..end + 2).collect();
            if is_status_line(&line) {
                trace!("Resynchronized after malformed response");
                self.resync = false;
                return true;
            }
        }
        false
    }

    /// Delivers a final answer to the in-flight request.
    fn complete(&mut self, response: Response, now: Instant) {
        let Some(InFlight { request, .. }) = self.in_flight.take() else {
            return;
        };
        self.watchdog.disarm();

        let verb = request.command().verb();
        let status = response.status;
        let closing = status == Status::Bye || request.command().accepts_bye();

        if status.is_ok()
            && let Some(caps) = response.capabilities()
        {
            self.capabilities = Some(caps.clone());
            self.events.push(ProtocolEvent::Capabilities(caps.clone()));
        }

        let reason = response.message().to_string();
        debug!(verb, %status, "Request completed");
        request.complete(response);
        self.events.push(ProtocolEvent::Completed { verb, status });

        if closing {
            if self.phase != SessionState::Disconnecting {
                self.transition(SessionState::Disconnecting);
            }
            self.events.push(ProtocolEvent::Disconnected { reason });
            return;
        }

        self.advance(now);
    }

    /// Fails the in-flight request after a malformed answer.
    fn fail_in_flight(&mut self, error: Error, now: Instant) {
        let Some(InFlight { request, .. }) = self.in_flight.take() else {
            return;
        };
        self.watchdog.disarm();

        let verb = request.command().verb();
        warn!(verb, %error, "Malformed response");
        request.fail(error);
        self.events.push(ProtocolEvent::Malformed { verb });
        self.advance(now);
    }

    /// Sends the next request if the wire is free.
    fn advance(&mut self, now: Instant) {
        if self.in_flight.is_none()
            && !self.offline
            && let Some(request) = self.next_request()
        {
            self.dispatch(request, now);
        }

        match (self.phase, self.in_flight.is_some()) {
            (SessionState::Ready, true) => {
                self.transition(SessionState::Busy);
                self.idle_since = None;
            }
            (SessionState::Busy, false) => {
                self.transition(SessionState::Ready);
                self.idle_since = Some(now);
            }
            _ => {}
        }
    }

    fn next_request(&mut self) -> Option<Request> {
        match self.phase {
            SessionState::Disconnected => None,
            // Only the LOGOUT goes out once the session is closing
            SessionState::Disconnecting => {
                let position = self
                    .queue
                    .iter()
                    .position(|r| r.command().accepts_bye())?;
                self.queue.remove(position)
            }
            _ => self.queue.pop_front(),
        }
    }

    fn dispatch(&mut self, request: Request, now: Instant) {
        let command = request.command();
        if let Some(bytes) = command.serialize() {
            let transmit = if command.is_sensitive() {
                Transmit::sensitive(bytes)
            } else {
                Transmit::new(bytes)
            };
            self.outbound.push_back(transmit);
        }

        debug!(verb = command.verb(), queued = self.queue.len(), "Request dispatched");
        self.watchdog.arm(now);
        self.in_flight = Some(InFlight { request, step: 0 });
    }

    fn keep_alive_deadline(&self) -> Option<Instant> {
        let interval = self.keep_alive?;
        let idle = self.phase == SessionState::Ready
            && !self.offline
            && self.in_flight.is_none()
            && self.queue.is_empty();
        if idle {
            self.idle_since.map(|since| since + interval)
        } else {
            None
        }
    }

    fn require(&mut self, next: SessionState) -> Result<()> {
        if self.transition(next) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "cannot move from {} to {next}",
                self.phase
            )))
        }
    }

    /// Single place where the phase changes.
    fn transition(&mut self, next: SessionState) -> bool {
        if !self.phase.can_transition_to(next) {
            warn!(from = %self.phase, to = %next, "Rejected state transition");
            return false;
        }

        debug!(from = %self.phase, to = %next, "State transition");
        self.phase = next;
        true
    }
}

/// Returns true if `line` starts with `OK`, `NO` or `BYE` as a whole word.
fn is_status_line(line: &[u8]) -> bool {
    [b"OK".as_slice(), b"NO", b"BYE"].iter().any(|word| {
        line.len() > word.len()
            && line[..word.len()].eq_ignore_ascii_case(word)
            && matches!(line[word.len()], b' ' | b'\r' | b'(')
    })
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
    use crate::parser::Payload;
    use proptest::prelude::*;
    use sieveledger_sasl::{Credentials, Mechanism};
    use std::sync::{Arc, Mutex};

    type Outcomes = Arc<Mutex<Vec<(&'static str, Result<Response>)>>>;

    fn recorder(outcomes: &Outcomes, label: &'static str, command: Command) -> Request {
        let outcomes = outcomes.clone();
        Request::with_callback(command, move |result| {
            outcomes.lock().unwrap().push((label, result));
        })
    }

    fn ready_engine(config: EngineConfig, now: Instant) -> Engine {
        let mut engine = Engine::new(config);
        engine.begin_connect().unwrap();
        engine.set_ready(now).unwrap();
        engine
    }

    fn sent(engine: &mut Engine) -> Vec<String> {
        std::iter::from_fn(|| engine.poll_transmit())
            .map(|t| String::from_utf8(t.data).unwrap())
            .collect()
    }

    fn labels(outcomes: &Outcomes) -> Vec<&'static str> {
        outcomes.lock().unwrap().iter().map(|(l, _)| *l).collect()
    }

    #[test]
    fn test_capability_response_in_fragments() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "caps", Command::Capability), now);
        assert_eq!(sent(&mut engine), ["CAPABILITY\r\n"]);
        assert_eq!(engine.state(), SessionState::Busy);

        assert!(engine.handle_input(b"\"IMPL", now).is_empty());
        assert!(engine
            .handle_input(b"EMENTATION\" \"Example\"\r\n", now)
            .is_empty());
        assert!(outcomes.lock().unwrap().is_empty());

        let events = engine.handle_input(b"OK\r\n", now);
        assert!(matches!(events[0], ProtocolEvent::Capabilities(_)));
        assert_eq!(
            events[1],
            ProtocolEvent::Completed {
                verb: "CAPABILITY",
                status: Status::Ok
            }
        );

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        let response = outcomes[0].1.as_ref().unwrap();
        assert_eq!(response.status, Status::Ok);
        let caps = response.capabilities().unwrap();
        assert_eq!(caps.entries().len(), 1);
        assert_eq!(caps.implementation(), Some("Example"));
        assert_eq!(engine.state(), SessionState::Ready);
    }

    #[test]
    fn test_putscript_then_next_request() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        let put = Command::PutScript {
            name: "a".to_string(),
            body: "hello".to_string(),
        };
        engine.enqueue(recorder(&outcomes, "put", put), now);
        engine.enqueue(recorder(&outcomes, "noop", Command::Noop), now);
        assert_eq!(sent(&mut engine), ["PUTSCRIPT \"a\" {5+}\r\nhello\r\n"]);
        assert_eq!(engine.queued(), 1);

        engine.handle_input(b"OK\r\n", now);
        assert_eq!(labels(&outcomes), ["put"]);
        assert!(outcomes.lock().unwrap()[0].1.is_ok());
        assert_eq!(sent(&mut engine), ["NOOP\r\n"]);
        assert_eq!(engine.in_flight(), Some("NOOP"));
    }

    #[test]
    fn test_fifo_with_single_byte_chunks() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "list", Command::ListScripts), now);
        engine.enqueue(
            recorder(&outcomes, "get", Command::GetScript { name: "a".to_string() }),
            now,
        );
        engine.enqueue(recorder(&outcomes, "noop", Command::Noop), now);

        let wire = b"\"a\" ACTIVE\r\n\"b\"\r\nOK\r\n{5}\r\nkeep;\r\nOK\r\nOK \"Done\"\r\n";
        for byte in wire {
            engine.handle_input(std::slice::from_ref(byte), now);
        }

        assert_eq!(labels(&outcomes), ["list", "get", "noop"]);
        let outcomes = outcomes.lock().unwrap();
        match &outcomes[0].1.as_ref().unwrap().payload {
            Payload::Scripts(scripts) => {
                assert_eq!(scripts.len(), 2);
                assert!(scripts[0].active);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            outcomes[1].1.as_ref().unwrap().payload,
            Payload::Script("keep;".to_string())
        );
        assert_eq!(outcomes[2].1.as_ref().unwrap().message(), "Done");
    }

    #[test]
    fn test_next_request_waits_for_answer() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "a", Command::Noop), now);
        engine.enqueue(recorder(&outcomes, "b", Command::ListScripts), now);
        assert_eq!(sent(&mut engine), ["NOOP\r\n"]);

        engine.handle_input(b"O", now);
        assert!(sent(&mut engine).is_empty());

        engine.handle_input(b"K\r\n", now);
        assert_eq!(sent(&mut engine), ["LISTSCRIPTS\r\n"]);
    }

    #[test]
    fn test_watchdog_fires_once_and_queue_advances() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "a", Command::Noop), now);
        engine.enqueue(recorder(&outcomes, "b", Command::ListScripts), now);
        sent(&mut engine);
        assert_eq!(engine.poll_timeout(), Some(now + DEFAULT_WATCHDOG));

        assert!(engine.handle_timeout(now + Duration::from_secs(19)).is_empty());
        assert!(outcomes.lock().unwrap().is_empty());

        let fired = now + DEFAULT_WATCHDOG;
        let events = engine.handle_timeout(fired);
        assert_eq!(events, [ProtocolEvent::TimedOut { verb: "NOOP" }]);
        assert_eq!(sent(&mut engine), ["LISTSCRIPTS\r\n"]);

        assert!(engine.handle_timeout(fired).is_empty());
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].1, Err(Error::Timeout(d)) if d == DEFAULT_WATCHDOG));
        assert_eq!(engine.poll_timeout(), Some(fired + DEFAULT_WATCHDOG));
    }

    #[test]
    fn test_partial_input_restarts_watchdog_and_is_discarded_on_timeout() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "a", Command::Noop), now);
        engine.enqueue(recorder(&outcomes, "b", Command::Noop), now);

        let later = now + Duration::from_secs(10);
        engine.handle_input(b"OK \"trunc", later);
        assert_eq!(engine.poll_timeout(), Some(later + DEFAULT_WATCHDOG));

        engine.handle_timeout(later + DEFAULT_WATCHDOG);
        engine.handle_input(b"OK\r\n", later + DEFAULT_WATCHDOG);
        assert_eq!(labels(&outcomes), ["a", "b"]);
        assert!(outcomes.lock().unwrap()[1].1.is_ok());
    }

    #[test]
    fn test_no_response_advances_queue() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(
            recorder(&outcomes, "del", Command::DeleteScript { name: "x".to_string() }),
            now,
        );
        engine.enqueue(recorder(&outcomes, "noop", Command::Noop), now);
        engine.handle_input(b"NO (NONEXISTENT) \"There is no script\"\r\nOK\r\n", now);

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 2);
        match &outcomes[0].1 {
            Err(Error::No { message, .. }) => assert_eq!(message, "There is no script"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(outcomes[1].1.is_ok());
    }

    #[test]
    fn test_syntax_error_fails_only_head() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "list", Command::ListScripts), now);
        engine.enqueue(recorder(&outcomes, "noop", Command::Noop), now);
        sent(&mut engine);

        let events = engine.handle_input(b"\"broken\r\n", now);
        assert_eq!(events, [ProtocolEvent::Malformed { verb: "LISTSCRIPTS" }]);
        assert_eq!(sent(&mut engine), ["NOOP\r\n"]);

        // Rest of the listing belongs to LISTSCRIPTS, not NOOP
        engine.handle_input(b"\"b\"\r\nOK\r\n", now);
        assert_eq!(labels(&outcomes), ["list"]);

        engine.handle_input(b"OK \"Done\"\r\n", now);
        let outcomes = outcomes.lock().unwrap();
        assert!(matches!(outcomes[0].1, Err(Error::Parse { .. })));
        assert_eq!(outcomes[1].1.as_ref().unwrap().message(), "Done");
    }

    #[test]
    fn test_broken_response_split_across_reads_does_not_shift_answers() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "list", Command::ListScripts), now);
        engine.enqueue(
            recorder(&outcomes, "get", Command::GetScript { name: "x".to_string() }),
            now,
        );
        sent(&mut engine);

        engine.handle_input(b"\"a\" PASSIVE\r\n", now);
        engine.handle_input(b"\"b\"\r\n", now);
        engine.handle_input(b"O", now);
        engine.handle_input(b"K\r\n", now);
        assert_eq!(labels(&outcomes), ["list"]);
        assert_eq!(engine.in_flight(), Some("GETSCRIPT"));

        engine.handle_input(b"{5}\r\nkeep;\r\nOK\r\n", now);
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].1, Err(Error::Parse { .. })));
        let response = outcomes[1].1.as_ref().unwrap();
        assert_eq!(response.payload, Payload::Script("keep;".to_string()));
    }

    #[test]
    fn test_malformed_status_line_ends_resync_immediately() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "noop1", Command::Noop), now);
        engine.enqueue(recorder(&outcomes, "noop2", Command::Noop), now);
        sent(&mut engine);

        engine.handle_input(b"OK \"unterminated\r\nOK\r\n", now);
        let outcomes = outcomes.lock().unwrap();
        assert!(matches!(outcomes[0].1, Err(Error::Parse { .. })));
        assert!(outcomes[1].1.is_ok());
    }

    #[test]
    fn test_status_line_detection() {
        assert!(is_status_line(b"OK\r\n"));
        assert!(is_status_line(b"no (NONEXISTENT) \"x\"\r\n"));
        assert!(is_status_line(b"BYE \"bye\"\r\n"));
        assert!(!is_status_line(b"OKAY\r\n"));
        assert!(!is_status_line(b"\"OK\"\r\n"));
    }

    #[test]
    fn test_disconnect_fails_in_fifo_order_and_is_idempotent() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        for label in ["a", "b", "c"] {
            engine.enqueue(recorder(&outcomes, label, Command::Noop), now);
        }
        engine.disconnect("closed by user");
        assert_eq!(engine.state(), SessionState::Disconnected);
        assert_eq!(labels(&outcomes), ["a", "b", "c"]);
        for (_, result) in outcomes.lock().unwrap().iter() {
            assert!(matches!(result, Err(Error::Disconnected(reason)) if reason == "closed by user"));
        }

        engine.disconnect("again");
        engine.disconnect("again");
        assert_eq!(outcomes.lock().unwrap().len(), 3);
        assert!(engine.poll_transmit().is_none());
        assert!(engine.poll_timeout().is_none());

        engine.enqueue(recorder(&outcomes, "late", Command::Noop), now);
        assert!(matches!(
            outcomes.lock().unwrap()[3].1,
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn test_disconnect_on_fresh_engine_is_noop() {
        let mut engine = Engine::default();
        engine.disconnect("nothing to do");
        assert_eq!(engine.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_offline_overlay() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "a", Command::Noop), now);
        engine.enqueue(recorder(&outcomes, "b", Command::ListScripts), now);
        sent(&mut engine);

        engine.set_offline(true, now);
        assert_eq!(engine.state(), SessionState::Offline);
        assert_eq!(engine.phase(), SessionState::Busy);
        assert!(engine.poll_timeout().is_some());

        engine.enqueue(recorder(&outcomes, "c", Command::Noop), now);
        assert_eq!(labels(&outcomes), ["c"]);
        assert!(matches!(outcomes.lock().unwrap()[0].1, Err(Error::Offline)));

        engine.handle_input(b"OK\r\n", now);
        assert_eq!(labels(&outcomes), ["c", "a"]);
        assert!(sent(&mut engine).is_empty());
        assert_eq!(engine.queued(), 1);

        engine.set_offline(false, now);
        assert_eq!(sent(&mut engine), ["LISTSCRIPTS\r\n"]);
        assert_eq!(engine.state(), SessionState::Busy);
    }

    #[test]
    fn test_login_challenges_are_answered() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = Engine::default();
        engine.begin_connect().unwrap();
        engine.set_authenticating().unwrap();

        let auth = Command::Authenticate {
            mechanism: Mechanism::Login,
            credentials: Credentials::new("geek").with_secret("th3g33k1"),
        };
        engine.enqueue(recorder(&outcomes, "auth", auth), now);
        let first = engine.poll_transmit().unwrap();
        assert!(first.sensitive);
        assert_eq!(first.data, b"AUTHENTICATE \"LOGIN\"\r\n");

        engine.handle_input(b"\"VXNlcm5hbWU6\"\r\n", now);
        assert_eq!(sent(&mut engine), ["\"Z2Vlaw==\"\r\n"]);
        engine.handle_input(b"{12}\r\nUGFzc3dvcmQ6\r\n", now);
        assert_eq!(sent(&mut engine), ["\"dGgzZzMzazE=\"\r\n"]);
        assert!(outcomes.lock().unwrap().is_empty());

        engine.handle_input(b"OK\r\n", now);
        assert!(outcomes.lock().unwrap()[0].1.is_ok());
        assert_eq!(engine.state(), SessionState::Authenticating);
        engine.set_ready(now).unwrap();
        assert_eq!(engine.state(), SessionState::Ready);
    }

    #[test]
    fn test_greeting_sends_nothing_and_records_capabilities() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = Engine::default();
        engine.begin_connect().unwrap();

        engine.enqueue(recorder(&outcomes, "greeting", Command::Greeting), now);
        assert!(engine.poll_transmit().is_none());
        assert_eq!(engine.in_flight(), Some("GREETING"));

        engine.handle_input(
            b"\"IMPLEMENTATION\" \"Dovecot\"\r\n\"VERSION\" \"1.0\"\r\nOK \"ready\"\r\n",
            now,
        );
        assert!(engine.capabilities().unwrap().can_noop());
        assert!(outcomes.lock().unwrap()[0].1.is_ok());
    }

    #[test]
    fn test_keep_alive_sent_when_idle() {
        let now = Instant::now();
        let config = EngineConfig {
            keep_alive: Some(Duration::from_secs(60)),
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config);
        engine.begin_connect().unwrap();
        engine.enqueue(Request::with_callback(Command::Greeting, |_| {}), now);
        engine.handle_input(b"\"IMPLEMENTATION\" \"x\"\r\n\"VERSION\" \"1.0\"\r\nOK\r\n", now);
        engine.set_ready(now).unwrap();

        assert_eq!(engine.poll_timeout(), Some(now + Duration::from_secs(60)));
        engine.handle_timeout(now + Duration::from_secs(30));
        assert!(engine.poll_transmit().is_none());

        let idle = now + Duration::from_secs(60);
        engine.handle_timeout(idle);
        assert_eq!(sent(&mut engine), ["NOOP\r\n"]);
        assert_eq!(engine.poll_timeout(), Some(idle + DEFAULT_WATCHDOG));

        engine.handle_input(b"OK\r\n", idle);
        assert_eq!(engine.state(), SessionState::Ready);
        assert_eq!(engine.poll_timeout(), Some(idle + Duration::from_secs(60)));
    }

    #[test]
    fn test_keep_alive_uses_capability_without_noop() {
        let now = Instant::now();
        let config = EngineConfig {
            keep_alive: Some(Duration::from_secs(5)),
            ..EngineConfig::default()
        };
        let mut engine = ready_engine(config, now);
        engine.handle_timeout(now + Duration::from_secs(5));
        assert_eq!(sent(&mut engine), ["CAPABILITY\r\n"]);
    }

    #[test]
    fn test_bye_stops_the_queue() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "list", Command::ListScripts), now);
        engine.enqueue(recorder(&outcomes, "noop", Command::Noop), now);
        sent(&mut engine);

        let events = engine.handle_input(b"BYE \"Shutting down\"\r\n", now);
        assert_eq!(
            events.last(),
            Some(&ProtocolEvent::Disconnected {
                reason: "Shutting down".to_string()
            })
        );
        assert_eq!(engine.state(), SessionState::Disconnecting);
        assert!(sent(&mut engine).is_empty());
        assert!(matches!(outcomes.lock().unwrap()[0].1, Err(Error::Bye { .. })));

        engine.disconnect("server closed the connection");
        assert_eq!(labels(&outcomes), ["list", "noop"]);
        assert!(matches!(outcomes.lock().unwrap()[1].1, Err(Error::Disconnected(_))));
    }

    #[test]
    fn test_referral_becomes_error() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "list", Command::ListScripts), now);
        engine.handle_input(b"BYE (REFERRAL \"sieve://other.example.com:2000\") \"Moved\"\r\n", now);
        match &outcomes.lock().unwrap()[0].1 {
            Err(Error::Referral { host, port }) => {
                assert_eq!(host, "other.example.com");
                assert_eq!(*port, Some(2000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_logout_jumps_the_queue() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        engine.enqueue(recorder(&outcomes, "a", Command::Noop), now);
        engine.enqueue(recorder(&outcomes, "b", Command::ListScripts), now);
        sent(&mut engine);

        engine.logout(recorder(&outcomes, "logout", Command::Logout), now);
        assert_eq!(engine.state(), SessionState::Disconnecting);
        engine.enqueue(recorder(&outcomes, "late", Command::Noop), now);

        engine.handle_input(b"OK\r\n", now);
        assert_eq!(sent(&mut engine), ["LOGOUT\r\n"]);
        let events = engine.handle_input(b"OK \"Logout completed\"\r\n", now);
        assert!(events.contains(&ProtocolEvent::Disconnected {
            reason: "Logout completed".to_string()
        }));

        engine.disconnect("logged out");
        assert_eq!(labels(&outcomes), ["late", "a", "logout", "b"]);
        let outcomes = outcomes.lock().unwrap();
        assert!(matches!(outcomes[0].1, Err(Error::Disconnected(_))));
        assert!(outcomes[2].1.is_ok());
        assert!(matches!(outcomes[3].1, Err(Error::Disconnected(_))));
    }

    #[test]
    fn test_buffered_bytes_wait_for_a_request() {
        let now = Instant::now();
        let outcomes = Outcomes::default();
        let mut engine = ready_engine(EngineConfig::default(), now);

        assert!(engine.handle_input(b"OK\r\n", now).is_empty());
        engine.enqueue(recorder(&outcomes, "noop", Command::Noop), now);
        assert!(outcomes.lock().unwrap()[0].1.is_ok());
        assert_eq!(
            engine.take_events(),
            [ProtocolEvent::Completed {
                verb: "NOOP",
                status: Status::Ok
            }]
        );
    }

    #[test]
    fn test_invalid_lifecycle_calls() {
        let now = Instant::now();
        let mut engine = Engine::default();
        assert!(matches!(engine.set_ready(now), Err(Error::InvalidState(_))));
        engine.begin_connect().unwrap();
        assert!(matches!(engine.begin_connect(), Err(Error::InvalidState(_))));
    }

    proptest! {
        #[test]
        fn prop_fragmentation_does_not_change_outcome(sizes in proptest::collection::vec(1usize..9, 1..64)) {
            let now = Instant::now();
            let outcomes = Outcomes::default();
            let mut engine = ready_engine(EngineConfig::default(), now);
            engine.enqueue(recorder(&outcomes, "caps", Command::Capability), now);
            engine.enqueue(recorder(&outcomes, "list", Command::ListScripts), now);

            let wire: &[u8] = b"\"IMPLEMENTATION\" \"Example\"\r\n\"SASL\" \"PLAIN\"\r\nOK\r\n\"x\" ACTIVE\r\n{3}\r\ny\"z\r\nOK\r\n";
            let mut rest = wire;
            let mut sizes = sizes.into_iter().cycle();
            while !rest.is_empty() {
                let n = sizes.next().unwrap_or(1).min(rest.len());
                let (chunk, tail) = rest.split_at(n);
                engine.handle_input(chunk, now);
                rest = tail;
            }

            let outcomes = outcomes.lock().unwrap();
            prop_assert_eq!(outcomes.len(), 2);
            let caps = outcomes[0].1.as_ref().unwrap().capabilities().unwrap().clone();
            prop_assert_eq!(caps.sasl(), ["PLAIN".to_string()]);
            let list = &outcomes[1].1.as_ref().unwrap().payload;
            prop_assert_eq!(
                list,
                &Payload::Scripts(vec![
                    crate::types::ScriptEntry::new("x", true),
                    crate::types::ScriptEntry::new("y\"z", false),
                ])
            );
        }
    }
}
