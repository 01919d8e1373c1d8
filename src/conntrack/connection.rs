//! A tracked bidirectional TCP connection and its close state machine.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::event::{ListenerId, ListenerSet};
use crate::segment::{Endpoint, FlowKey, TcpFlags, TcpSegment, MICROS_PER_SEC};

use super::flow::Flow;
use super::{
    CloseReason, ConnectionClosedCallback, ConnectionClosedEvent, PacketCallback, PacketEvent,
    StreamWatcher, WatchVerdict,
};

/// Close-handshake state, driven by segments observed in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// One side sent FIN+ACK; waiting for the other side's FIN+ACK.
    AwaitingSecondFinAck,
    /// Both sides sent FIN+ACK; waiting for the final ACK.
    AwaitingFinalAck,
    /// Terminal; no further transitions happen.
    Closed,
}

/// A tracked connection: exactly two flows, flow 0 belonging to the endpoint
/// first observed sending.
pub struct Connection {
    id: u64,
    key: FlowKey,
    state: ConnectionState,
    flows: [Flow; 2],
    last_packet_time: i64,
    idle_timeout: i64,
    /// Token of this connection's live deadline entry in the manager's heap;
    /// older entries are stale and skipped.
    timer_token: u64,
    pub(crate) packet_received: ListenerSet<PacketCallback>,
    pub(crate) closed: ListenerSet<ConnectionClosedCallback>,
    watcher: RefCell<Option<Box<dyn StreamWatcher>>>,
}

impl Connection {
    /// Default idle expiry for a connection left at its own setting
    /// (the manager normally overrides this with its configured value).
    pub const DEFAULT_IDLE_TIMEOUT: i64 = 10 * 60 * MICROS_PER_SEC;

    pub(crate) fn new(id: u64, first: &TcpSegment, stream_limit: Option<usize>) -> Self {
        Self {
            id,
            key: first.flow_key(),
            state: ConnectionState::Open,
            flows: [
                Flow::new(first.source, stream_limit),
                Flow::new(first.destination, stream_limit),
            ],
            last_packet_time: first.timestamp,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            timer_token: 0,
            packet_received: ListenerSet::new(),
            closed: ListenerSet::new(),
            watcher: RefCell::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The unordered endpoint pair identifying this connection.
    pub fn key(&self) -> FlowKey {
        self.key
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Timestamp of the most recent delivered segment; never decreases.
    pub fn last_packet_time(&self) -> i64 {
        self.last_packet_time
    }

    /// Idle expiry window in microseconds.
    pub fn idle_timeout(&self) -> i64 {
        self.idle_timeout
    }

    pub fn set_idle_timeout(&mut self, idle_timeout: i64) {
        self.idle_timeout = idle_timeout;
    }

    /// Both flows; index 0 is the first endpoint observed sending.
    pub fn flows(&self) -> &[Flow; 2] {
        &self.flows
    }

    pub fn flow(&self, index: usize) -> &Flow {
        &self.flows[index]
    }

    /// Index of the flow whose endpoint sent this segment.
    pub fn flow_index_for(&self, source: Endpoint) -> Option<usize> {
        self.flows.iter().position(|flow| flow.endpoint() == source)
    }

    /// Register a listener for every segment delivered to this connection.
    pub fn on_packet(&self, callback: impl FnMut(&PacketEvent<'_>) + 'static) -> ListenerId {
        self.packet_received.add(Rc::new(RefCell::new(callback)))
    }

    pub fn remove_packet_listener(&self, id: ListenerId) -> bool {
        self.packet_received.remove(id)
    }

    /// Register a listener for the connection closing (FIN handshake or idle
    /// expiry).
    pub fn on_closed(
        &self,
        callback: impl FnMut(&ConnectionClosedEvent<'_>) + 'static,
    ) -> ListenerId {
        self.closed.add(Rc::new(RefCell::new(callback)))
    }

    pub fn remove_closed_listener(&self, id: ListenerId) -> bool {
        self.closed.remove(id)
    }

    /// Attach a stream watcher; it observes every flow's reassembled bytes
    /// from here on. Replaces any previous watcher.
    pub fn attach_watcher(&self, watcher: impl StreamWatcher + 'static) {
        *self.watcher.borrow_mut() = Some(Box::new(watcher));
    }

    pub fn detach_watcher(&self) {
        *self.watcher.borrow_mut() = None;
    }

    pub fn has_watcher(&self) -> bool {
        self.watcher.borrow().is_some()
    }

    pub(crate) fn timer_token(&self) -> u64 {
        self.timer_token
    }

    pub(crate) fn set_timer_token(&mut self, token: u64) {
        self.timer_token = token;
    }

    /// Deliver one segment: record it on the matched flow, drive the watcher,
    /// fire packet/flow events, then run the close state machine.
    pub(crate) fn deliver(&mut self, segment: &TcpSegment) {
        let timestamp = segment.timestamp;
        self.last_packet_time = self.last_packet_time.max(timestamp);

        let Some(index) = self.flow_index_for(segment.source) else {
            return;
        };

        match self.flows[index].record(segment) {
            Ok(()) => {
                if !segment.payload.is_empty() {
                    self.drive_watcher(index, timestamp);
                }
            }
            Err(err) => {
                warn!(connection = self.id, flow = index, %err, "flow stream failed");
                let verdict = match self.watcher.borrow_mut().as_mut() {
                    Some(watcher) => watcher.on_stream_error(index, &err, timestamp),
                    None => WatchVerdict::Continue,
                };
                if verdict == WatchVerdict::Teardown {
                    self.detach_watcher();
                }
            }
        }

        self.emit_packet(index, segment, timestamp);

        if segment.flags.fin && self.flows[index].mark_closed() {
            self.emit_flow_closed(index, timestamp);
        }

        self.advance_state(segment.flags);
    }

    fn drive_watcher(&mut self, index: usize, timestamp: i64) {
        let mut guard = self.watcher.borrow_mut();
        let verdict = match guard.as_mut() {
            Some(watcher) => watcher.on_bytes(index, self.flows[index].stream_mut(), timestamp),
            None => return,
        };
        drop(guard);
        if verdict == WatchVerdict::Teardown {
            debug!(connection = self.id, "watcher torn down");
            self.detach_watcher();
        }
    }

    fn advance_state(&mut self, flags: TcpFlags) {
        use ConnectionState::*;
        // RST does not participate: close is governed by the FIN handshake
        self.state = match (self.state, flags.fin_ack(), flags.ack) {
            (Open, true, _) => AwaitingSecondFinAck,
            (AwaitingSecondFinAck, true, _) => AwaitingFinalAck,
            (AwaitingFinalAck, _, true) => Closed,
            (state, _, _) => state,
        };
    }

    fn emit_packet(&self, index: usize, segment: &TcpSegment, timestamp: i64) {
        let event = PacketEvent {
            timestamp,
            connection: self,
            flow: &self.flows[index],
            segment,
        };
        self.flows[index].packet_received.dispatch(|cb| cb(&event));
        self.packet_received.dispatch(|cb| cb(&event));
    }

    fn emit_flow_closed(&self, index: usize, timestamp: i64) {
        let event = super::FlowClosedEvent {
            timestamp,
            connection: self,
            flow: &self.flows[index],
        };
        self.flows[index].flow_closed.dispatch(|cb| cb(&event));
    }

    /// Fire the close event; the manager calls this exactly once, right
    /// before removing the connection.
    pub(crate) fn emit_closed(&self, reason: CloseReason, timestamp: i64) {
        let event = ConnectionClosedEvent {
            timestamp,
            reason,
            connection: self,
        };
        self.closed.dispatch(|cb| cb(&event));
    }

    pub(crate) fn notify_watcher_closed(&self, reason: CloseReason, timestamp: i64) {
        if let Some(watcher) = self.watcher.borrow_mut().as_mut() {
            watcher.on_connection_closed(reason, timestamp);
        }
    }
}
