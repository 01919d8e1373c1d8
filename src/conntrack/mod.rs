//! Connection tracking: demultiplexing captured segments into connections
//! and flows.
//!
//! ## Components
//!
//! - [`ConnectionManager`] - locates or creates the connection for each
//!   segment and owns the active table
//! - [`Connection`] - a bidirectional association with exactly two [`Flow`]s
//!   and a FIN-handshake close state machine
//! - [`StreamWatcher`] - the seam through which a consumer (the HTTP session
//!   watcher) observes a connection's reassembled flow bytes
//!
//! Idle expiry is cooperative: deadlines live in a lazy min-heap that the
//! processing loop drains, so no timer thread exists and no cross-thread
//! synchronization is needed. Each delivered segment pushes a fresh deadline
//! and bumps a per-connection generation counter; stale heap entries are
//! skipped when popped.

mod connection;
mod flow;

pub use connection::{Connection, ConnectionState};
pub use flow::Flow;

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::StreamError;
use crate::event::{ListenerId, ListenerSet};
use crate::segment::{FlowKey, TcpSegment, MICROS_PER_SEC};
use crate::stream::StreamReassembler;

/// Why a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The FIN handshake completed.
    FlowsClosed,
    /// No segment arrived within the idle timeout.
    IdleTimeout,
}

/// A new connection was observed.
pub struct ConnectionEvent<'a> {
    pub timestamp: i64,
    pub connection: &'a Connection,
}

/// A connection closed and is about to be removed.
pub struct ConnectionClosedEvent<'a> {
    pub timestamp: i64,
    pub reason: CloseReason,
    pub connection: &'a Connection,
}

/// A segment was delivered to a connection.
pub struct PacketEvent<'a> {
    pub timestamp: i64,
    pub connection: &'a Connection,
    pub flow: &'a Flow,
    pub segment: &'a TcpSegment,
}

/// A flow observed its FIN.
pub struct FlowClosedEvent<'a> {
    pub timestamp: i64,
    pub connection: &'a Connection,
    pub flow: &'a Flow,
}

pub type ConnectionCallback = dyn FnMut(&ConnectionEvent<'_>);
pub type ConnectionClosedCallback = dyn FnMut(&ConnectionClosedEvent<'_>);
pub type PacketCallback = dyn FnMut(&PacketEvent<'_>);
pub type FlowClosedCallback = dyn FnMut(&FlowClosedEvent<'_>);

/// Whether a [`StreamWatcher`] wants to keep observing its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchVerdict {
    Continue,
    /// Detach the watcher; it observes nothing further.
    Teardown,
}

/// Consumer of a connection's reassembled flow bytes.
///
/// Attached per connection via [`Connection::attach_watcher`], typically from
/// an `on_connection_found` listener. The flow index passed to the callbacks
/// matches [`Connection::flows`].
pub trait StreamWatcher {
    /// Payload bytes were appended to `stream` for flow `flow`. The watcher
    /// may read, seek, and trim the stream.
    fn on_bytes(
        &mut self,
        flow: usize,
        stream: &mut StreamReassembler,
        timestamp: i64,
    ) -> WatchVerdict;

    /// The flow's reassembler rejected a segment; the stream is dead.
    fn on_stream_error(
        &mut self,
        flow: usize,
        error: &StreamError,
        timestamp: i64,
    ) -> WatchVerdict {
        let _ = (flow, error, timestamp);
        WatchVerdict::Teardown
    }

    /// The connection closed or timed out; the watcher is dropped with it.
    fn on_connection_closed(&mut self, reason: CloseReason, timestamp: i64) {
        let _ = (reason, timestamp);
    }
}

/// Configurable options for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Idle expiry applied to tracked connections (microseconds).
    pub idle_timeout: i64,
    /// Optional bound on each flow's reassembly buffer (bytes).
    pub max_stream_buffer: Option<usize>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: 5 * 60 * MICROS_PER_SEC,
            max_stream_buffer: None,
        }
    }
}

/// Demultiplexes captured segments into connections.
pub struct ConnectionManager {
    config: TrackerConfig,
    table: HashMap<FlowKey, Connection>,
    /// Lazy idle-deadline heap: (deadline, key, token), earliest first.
    /// Tokens are manager-global and never reused, so entries left behind by
    /// a removed connection cannot expire a later one with the same key.
    deadlines: BinaryHeap<Reverse<(i64, FlowKey, u64)>>,
    next_id: u64,
    next_timer_token: u64,
    connection_found: ListenerSet<ConnectionCallback>,
}

impl ConnectionManager {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            table: HashMap::new(),
            deadlines: BinaryHeap::new(),
            next_id: 1,
            next_timer_token: 0,
            connection_found: ListenerSet::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TrackerConfig::default())
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Register a listener fired once per new connection, before any packet
    /// or flow callback for it. The usual place to attach a watcher.
    pub fn on_connection_found(
        &self,
        callback: impl FnMut(&ConnectionEvent<'_>) + 'static,
    ) -> ListenerId {
        self.connection_found.add(Rc::new(RefCell::new(callback)))
    }

    pub fn remove_connection_found_listener(&self, id: ListenerId) -> bool {
        self.connection_found.remove(id)
    }

    /// Active connections, in no particular order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.table.values()
    }

    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    /// Process one captured segment.
    ///
    /// Expires idle connections up to the segment's timestamp, locates or
    /// creates the matching connection (any unmatched segment creates one,
    /// RST included), delivers the segment, and resets the connection's idle
    /// deadline. A connection whose FIN handshake completes is removed after
    /// its close event fires.
    pub fn process(&mut self, segment: &TcpSegment) {
        self.expire_idle(segment.timestamp);

        let key = segment.flow_key();
        if !self.table.contains_key(&key) {
            let mut connection =
                Connection::new(self.next_id, segment, self.config.max_stream_buffer);
            connection.set_idle_timeout(self.config.idle_timeout);
            self.next_id += 1;
            trace!(connection = connection.id(), %key, "connection found");
            self.table.insert(key, connection);

            if let Some(connection) = self.table.get(&key) {
                let event = ConnectionEvent {
                    timestamp: segment.timestamp,
                    connection,
                };
                self.connection_found.dispatch(|cb| cb(&event));
            }
        }

        let Some(connection) = self.table.get_mut(&key) else {
            return;
        };
        connection.deliver(segment);

        self.next_timer_token += 1;
        let token = self.next_timer_token;
        connection.set_timer_token(token);
        let deadline = segment.timestamp + connection.idle_timeout();
        self.deadlines.push(Reverse((deadline, key, token)));

        if connection.state() == ConnectionState::Closed {
            debug!(connection = connection.id(), %key, "connection closed");
            connection.notify_watcher_closed(CloseReason::FlowsClosed, segment.timestamp);
            connection.emit_closed(CloseReason::FlowsClosed, segment.timestamp);
            self.table.remove(&key);
        }
    }

    /// Expire connections whose idle deadline is at or before `now`.
    /// `process` calls this with each segment's timestamp; call it directly
    /// to drive expiry during capture silence.
    pub fn expire_idle(&mut self, now: i64) {
        while let Some(&Reverse((deadline, key, token))) = self.deadlines.peek() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            let current = self
                .table
                .get(&key)
                .map(|connection| connection.timer_token() == token)
                .unwrap_or(false);
            if !current {
                continue;
            }
            if let Some(connection) = self.table.get(&key) {
                debug!(connection = connection.id(), %key, "idle timeout");
                connection.notify_watcher_closed(CloseReason::IdleTimeout, now);
                connection.emit_closed(CloseReason::IdleTimeout, now);
            }
            self.table.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Endpoint, TcpFlags};
    use bytes::Bytes;
    use std::cell::Cell;
    use std::net::{IpAddr, Ipv4Addr};

    fn ep(last: u8, port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), port)
    }

    fn seg(from: Endpoint, to: Endpoint, ts: i64, flags: TcpFlags, payload: &[u8]) -> TcpSegment {
        TcpSegment {
            timestamp: ts,
            source: from,
            destination: to,
            sequence: 1,
            acknowledgment: 0,
            flags,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn ack() -> TcpFlags {
        TcpFlags {
            ack: true,
            ..Default::default()
        }
    }

    fn fin_ack() -> TcpFlags {
        TcpFlags {
            fin: true,
            ack: true,
            ..Default::default()
        }
    }

    // Test 1: segments of one conversation map to one connection
    #[test]
    fn test_demux_single_connection() {
        let mut manager = ConnectionManager::with_defaults();
        let (a, b) = (ep(1, 40000), ep(2, 80));

        manager.process(&seg(a, b, 0, ack(), b"hi"));
        manager.process(&seg(b, a, 1, ack(), b"lo"));
        manager.process(&seg(a, b, 2, ack(), b""));

        assert_eq!(manager.connection_count(), 1);
        let connection = manager.connections().next().unwrap();
        assert_eq!(connection.flow(0).endpoint(), a);
        assert_eq!(connection.flow(1).endpoint(), b);
    }

    // Test 2: distinct endpoint pairs get distinct connections
    #[test]
    fn test_demux_multiple_connections() {
        let mut manager = ConnectionManager::with_defaults();
        manager.process(&seg(ep(1, 40000), ep(2, 80), 0, ack(), b""));
        manager.process(&seg(ep(1, 40001), ep(2, 80), 1, ack(), b""));
        manager.process(&seg(ep(3, 50000), ep(4, 443), 2, ack(), b""));

        assert_eq!(manager.connection_count(), 3);
    }

    // Test 3: connection_found fires once per connection, before packets
    #[test]
    fn test_connection_found_once() {
        let mut manager = ConnectionManager::with_defaults();
        let found = Rc::new(Cell::new(0));
        let packets_at_found = Rc::new(Cell::new(u64::MAX));

        let f = Rc::clone(&found);
        let p = Rc::clone(&packets_at_found);
        manager.on_connection_found(move |event| {
            f.set(f.get() + 1);
            p.set(event.connection.flow(0).segments_seen());
        });

        let (a, b) = (ep(1, 40000), ep(2, 80));
        manager.process(&seg(a, b, 0, ack(), b""));
        manager.process(&seg(b, a, 1, ack(), b""));

        assert_eq!(found.get(), 1);
        // the found event preceded delivery of the first segment
        assert_eq!(packets_at_found.get(), 0);
    }

    // Test 4: the close handshake removes the connection and fires the event
    #[test]
    fn test_close_removes_connection() {
        let mut manager = ConnectionManager::with_defaults();
        let reason = Rc::new(Cell::new(None));

        let r = Rc::clone(&reason);
        manager.on_connection_found(move |event| {
            let r = Rc::clone(&r);
            event.connection.on_closed(move |closed| r.set(Some(closed.reason)));
        });

        let (a, b) = (ep(1, 40000), ep(2, 80));
        manager.process(&seg(a, b, 0, ack(), b"data"));
        manager.process(&seg(a, b, 1, fin_ack(), b""));
        manager.process(&seg(b, a, 2, fin_ack(), b""));
        manager.process(&seg(a, b, 3, ack(), b""));

        assert_eq!(manager.connection_count(), 0);
        assert_eq!(reason.get(), Some(CloseReason::FlowsClosed));
    }

    // Test 5: an unmatched RST still creates a connection
    #[test]
    fn test_unmatched_rst_creates_connection() {
        let mut manager = ConnectionManager::with_defaults();
        let rst = TcpFlags {
            rst: true,
            ..Default::default()
        };
        manager.process(&seg(ep(1, 40000), ep(2, 80), 0, rst, b""));
        assert_eq!(manager.connection_count(), 1);
    }

    // Test 6: RSTs on a live connection neither close it nor spawn another
    #[test]
    fn test_trailing_rst_matches_existing() {
        let mut manager = ConnectionManager::with_defaults();
        let found = Rc::new(Cell::new(0));
        let f = Rc::clone(&found);
        manager.on_connection_found(move |_| f.set(f.get() + 1));

        let (a, b) = (ep(1, 40000), ep(2, 80));
        let rst = TcpFlags {
            rst: true,
            ..Default::default()
        };
        manager.process(&seg(a, b, 0, ack(), b"data"));
        manager.process(&seg(a, b, 1, fin_ack(), b""));
        manager.process(&seg(b, a, 2, rst, b""));
        manager.process(&seg(a, b, 3, rst, b""));

        assert_eq!(found.get(), 1);
        assert_eq!(manager.connection_count(), 1);
    }

    // Test 7: idle connections expire with the timeout reason
    #[test]
    fn test_idle_timeout() {
        let mut manager = ConnectionManager::new(TrackerConfig {
            idle_timeout: 1_000,
            ..Default::default()
        });
        let reason = Rc::new(Cell::new(None));
        let r = Rc::clone(&reason);
        manager.on_connection_found(move |event| {
            let r = Rc::clone(&r);
            event.connection.on_closed(move |closed| r.set(Some(closed.reason)));
        });

        manager.process(&seg(ep(1, 40000), ep(2, 80), 0, ack(), b""));
        manager.expire_idle(500);
        assert_eq!(manager.connection_count(), 1);

        manager.expire_idle(1_000);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(reason.get(), Some(CloseReason::IdleTimeout));
    }

    // Test 8: traffic resets the idle deadline (stale heap entries skipped)
    #[test]
    fn test_traffic_resets_deadline() {
        let mut manager = ConnectionManager::new(TrackerConfig {
            idle_timeout: 1_000,
            ..Default::default()
        });
        let (a, b) = (ep(1, 40000), ep(2, 80));

        manager.process(&seg(a, b, 0, ack(), b""));
        manager.process(&seg(b, a, 800, ack(), b""));

        // the original deadline (1000) has passed but the connection is alive
        manager.expire_idle(1_200);
        assert_eq!(manager.connection_count(), 1);

        manager.expire_idle(1_800);
        assert_eq!(manager.connection_count(), 0);
    }

    // Test 9: a late segment after expiry starts a fresh connection
    #[test]
    fn test_expiry_then_new_connection() {
        let mut manager = ConnectionManager::new(TrackerConfig {
            idle_timeout: 1_000,
            ..Default::default()
        });
        let found = Rc::new(Cell::new(0));
        let f = Rc::clone(&found);
        manager.on_connection_found(move |_| f.set(f.get() + 1));

        let (a, b) = (ep(1, 40000), ep(2, 80));
        manager.process(&seg(a, b, 0, ack(), b""));
        // processing a late segment first expires the idle connection
        manager.process(&seg(a, b, 5_000, ack(), b""));

        assert_eq!(found.get(), 2);
        assert_eq!(manager.connection_count(), 1);
    }

    // Test 10: manager config overrides the connection's own default timeout
    #[test]
    fn test_manager_timeout_applied() {
        let mut manager = ConnectionManager::with_defaults();
        manager.process(&seg(ep(1, 40000), ep(2, 80), 0, ack(), b""));
        let connection = manager.connections().next().unwrap();
        assert_eq!(connection.idle_timeout(), 5 * 60 * MICROS_PER_SEC);
        assert_ne!(connection.idle_timeout(), Connection::DEFAULT_IDLE_TIMEOUT);
    }

    // Test 11: monitors can register and unregister each other mid-stream
    #[test]
    fn test_listener_churn_during_dispatch() {
        let mut manager = ConnectionManager::with_defaults();
        let hits = Rc::new(Cell::new(0u32));
        let sizes = Rc::new(RefCell::new(Vec::new()));

        let hits_outer = Rc::clone(&hits);
        let sizes_outer = Rc::clone(&sizes);
        manager.on_connection_found(move |event| {
            let hits = Rc::clone(&hits_outer);
            let sizes = Rc::clone(&sizes_outer);
            event.connection.flow(0).on_packet(move |packet| {
                hits.set(hits.get() + 1);
                sizes.borrow_mut().push(packet.flow.stream().len());
                if hits.get() == 1 {
                    // register a second monitor from inside the first; it
                    // must not run until the next segment
                    let hits = Rc::clone(&hits);
                    packet.flow.on_packet(move |_| hits.set(hits.get() + 1));
                }
            });
        });

        let (a, b) = (ep(1, 40000), ep(2, 80));
        manager.process(&seg(a, b, 0, ack(), b""));
        assert_eq!(hits.get(), 1);
        manager.process(&seg(a, b, 1, ack(), b"abcd"));
        assert_eq!(hits.get(), 3);
        assert_eq!(*sizes.borrow(), vec![0, 4]);
    }
}
