//! HTTP session reconstruction over a tracked connection.
//!
//! [`HttpSessionWatcher`] implements [`StreamWatcher`] and is attached to a
//! connection (usually from an `on_connection_found` listener). It discovers
//! which flow is the client and which the server by parsing the head of each
//! flow first as a request and, failing that, as a status; pairs completed
//! statuses with the FIFO queue of completed-but-unanswered requests; and
//! tears both monitors down on the first stream or parse error.

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, trace};

use crate::conntrack::{CloseReason, StreamWatcher, WatchVerdict};
use crate::error::{Error, StreamError};
use crate::stream::StreamReassembler;

use super::message::{HttpMessage, HttpRequest, HttpStatus};
use super::parser::{HttpParser, HttpRole, ParseProgress};

/// Role a flow plays in the HTTP conversation, fixed once discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpDirection {
    Client,
    Server,
}

impl HttpDirection {
    fn opposite(self) -> Self {
        match self {
            HttpDirection::Client => HttpDirection::Server,
            HttpDirection::Server => HttpDirection::Client,
        }
    }

    fn role(self) -> HttpRole {
        match self {
            HttpDirection::Client => HttpRole::Request,
            HttpDirection::Server => HttpRole::Status,
        }
    }
}

/// A request completed on the client flow.
pub struct RequestEvent<'a> {
    pub timestamp: i64,
    pub request: &'a HttpRequest,
}

/// A status completed on the server flow, paired with its request when one
/// was pending.
pub struct StatusEvent<'a> {
    pub timestamp: i64,
    pub status: &'a HttpStatus,
}

/// The watcher stopped monitoring: stream failure, parse failure, or idle
/// timeout of the connection.
pub struct WatchErrorEvent<'a> {
    pub timestamp: i64,
    pub error: &'a Error,
}

struct FlowMonitor {
    direction: Option<HttpDirection>,
    parser: HttpParser,
    /// Stream offset where the message currently being parsed began.
    message_start: usize,
    /// Discovery already fell back from request to status on this flow.
    tried_status: bool,
}

impl FlowMonitor {
    fn new() -> Self {
        Self {
            direction: None,
            parser: HttpParser::new(HttpRole::Request),
            message_start: 0,
            tried_status: false,
        }
    }
}

type RequestCallback = dyn FnMut(&RequestEvent<'_>);
type StatusCallback = dyn FnMut(&StatusEvent<'_>);
type ErrorCallback = dyn FnMut(&WatchErrorEvent<'_>);

/// Watches both flows of a connection and emits completed HTTP messages.
pub struct HttpSessionWatcher {
    monitors: [FlowMonitor; 2],
    /// Completed requests not yet answered by a status, oldest first. This is
    /// distinct from the in-progress parse each monitor holds.
    waiting_requests: VecDeque<HttpRequest>,
    on_request: Option<Box<RequestCallback>>,
    on_status: Option<Box<StatusCallback>>,
    on_error: Option<Box<ErrorCallback>>,
    dead: bool,
}

impl Default for HttpSessionWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSessionWatcher {
    pub fn new() -> Self {
        Self {
            monitors: [FlowMonitor::new(), FlowMonitor::new()],
            waiting_requests: VecDeque::new(),
            on_request: None,
            on_status: None,
            on_error: None,
            dead: false,
        }
    }

    /// Called for every completed request, in arrival order.
    pub fn on_request_found(mut self, callback: impl FnMut(&RequestEvent<'_>) + 'static) -> Self {
        self.on_request = Some(Box::new(callback));
        self
    }

    /// Called for every completed status, in arrival order.
    pub fn on_status_found(mut self, callback: impl FnMut(&StatusEvent<'_>) + 'static) -> Self {
        self.on_status = Some(Box::new(callback));
        self
    }

    /// Called once when the watcher tears down.
    pub fn on_error(mut self, callback: impl FnMut(&WatchErrorEvent<'_>) + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// The direction discovered for a flow, if any.
    pub fn direction(&self, flow: usize) -> Option<HttpDirection> {
        self.monitors[flow].direction
    }

    /// Requests still waiting for a status.
    pub fn pending_requests(&self) -> usize {
        self.waiting_requests.len()
    }

    fn assign_directions(&mut self, flow: usize, direction: HttpDirection) {
        if self.monitors[flow].direction.is_none() {
            trace!(flow, ?direction, "http direction discovered");
            self.monitors[flow].direction = Some(direction);
            self.monitors[1 - flow].direction = Some(direction.opposite());
        }
    }

    /// Bring a monitor's parser in line with a direction that was discovered
    /// via the peer flow: restart parsing from the current message start
    /// under the correct grammar.
    fn reconcile_role(&mut self, flow: usize, stream: &mut StreamReassembler) {
        let monitor = &mut self.monitors[flow];
        let Some(direction) = monitor.direction else {
            return;
        };
        if monitor.parser.role() != direction.role() {
            let _ = stream.seek(SeekFrom::Start(monitor.message_start as u64));
            monitor.parser = HttpParser::new(direction.role());
        }
    }

    fn emit_request(&mut self, request: &HttpRequest, timestamp: i64) {
        if let Some(callback) = self.on_request.as_mut() {
            let event = RequestEvent { timestamp, request };
            // consumer panics are the consumer's concern
            let _ = catch_unwind(AssertUnwindSafe(|| callback(&event)));
        }
    }

    fn emit_status(&mut self, status: &HttpStatus, timestamp: i64) {
        if let Some(callback) = self.on_status.as_mut() {
            let event = StatusEvent { timestamp, status };
            let _ = catch_unwind(AssertUnwindSafe(|| callback(&event)));
        }
    }

    fn emit_error(&mut self, error: &Error, timestamp: i64) {
        debug!(%error, "http session watcher tearing down");
        if let Some(callback) = self.on_error.as_mut() {
            let event = WatchErrorEvent { timestamp, error };
            let _ = catch_unwind(AssertUnwindSafe(|| callback(&event)));
        }
    }
}

impl StreamWatcher for HttpSessionWatcher {
    fn on_bytes(
        &mut self,
        flow: usize,
        stream: &mut StreamReassembler,
        timestamp: i64,
    ) -> WatchVerdict {
        if self.dead {
            return WatchVerdict::Teardown;
        }
        self.reconcile_role(flow, stream);

        loop {
            match self.monitors[flow].parser.process(stream) {
                Ok(ParseProgress::NeedMoreData) => return WatchVerdict::Continue,
                Ok(ParseProgress::Complete) => {
                    let Some(message) = self.monitors[flow].parser.take_message() else {
                        return WatchVerdict::Continue;
                    };
                    match message {
                        HttpMessage::Request(request) => {
                            self.assign_directions(flow, HttpDirection::Client);
                            self.emit_request(&request, timestamp);
                            self.waiting_requests.push_back(request);
                        }
                        HttpMessage::Status(mut status) => {
                            self.assign_directions(flow, HttpDirection::Server);
                            status.request = self.waiting_requests.pop_front();
                            self.emit_status(&status, timestamp);
                        }
                    }
                    stream.trim_unused_packets();
                    self.monitors[flow].message_start = stream.position();
                    // pipelined messages may already be buffered; keep going
                }
                Err(error) => {
                    let monitor = &mut self.monitors[flow];
                    if monitor.direction.is_none()
                        && monitor.parser.role() == HttpRole::Request
                        && !monitor.tried_status
                    {
                        // discovery: the head of the flow is not a request,
                        // retry it as a status
                        monitor.tried_status = true;
                        let _ = stream.seek(SeekFrom::Start(monitor.message_start as u64));
                        monitor.parser = HttpParser::new(HttpRole::Status);
                        continue;
                    }
                    self.emit_error(&Error::Http(error), timestamp);
                    self.dead = true;
                    return WatchVerdict::Teardown;
                }
            }
        }
    }

    fn on_stream_error(
        &mut self,
        _flow: usize,
        error: &StreamError,
        timestamp: i64,
    ) -> WatchVerdict {
        self.emit_error(&Error::Stream(error.clone()), timestamp);
        self.dead = true;
        WatchVerdict::Teardown
    }

    fn on_connection_closed(&mut self, reason: CloseReason, _timestamp: i64) {
        debug!(?reason, "http session over");
        self.dead = true;
    }
}
