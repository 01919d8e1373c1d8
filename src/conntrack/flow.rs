//! One direction of a tracked connection.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::StreamError;
use crate::event::{ListenerId, ListenerSet};
use crate::segment::{Endpoint, TcpSegment};
use crate::stream::StreamReassembler;

use super::{FlowClosedCallback, FlowClosedEvent, PacketCallback, PacketEvent};

/// One direction of a connection: the segments sent by a single endpoint,
/// with their reassembled byte stream.
pub struct Flow {
    endpoint: Endpoint,
    is_open: bool,
    sequence: Option<u32>,
    ack: Option<u32>,
    segments_seen: u64,
    payload_bytes: u64,
    stream: StreamReassembler,
    /// Set after a fatal reassembly error; later payloads are discarded.
    stream_failed: bool,
    pub(crate) packet_received: ListenerSet<PacketCallback>,
    pub(crate) flow_closed: ListenerSet<FlowClosedCallback>,
}

impl Flow {
    pub(crate) fn new(endpoint: Endpoint, stream_limit: Option<usize>) -> Self {
        Self {
            endpoint,
            is_open: true,
            sequence: None,
            ack: None,
            segments_seen: 0,
            payload_bytes: 0,
            stream: match stream_limit {
                Some(limit) => StreamReassembler::with_limit(limit),
                None => StreamReassembler::new(),
            },
            stream_failed: false,
            packet_received: ListenerSet::new(),
            flow_closed: ListenerSet::new(),
        }
    }

    /// The endpoint that sends on this flow.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// False once a FIN has been observed in this direction.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Sequence number of the last segment seen, if any.
    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }

    /// Acknowledgment number of the last segment seen, if any.
    pub fn ack(&self) -> Option<u32> {
        self.ack
    }

    pub fn segments_seen(&self) -> u64 {
        self.segments_seen
    }

    /// Total payload bytes observed, including any discarded after a stream
    /// error.
    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }

    /// The reassembled byte stream for this direction.
    pub fn stream(&self) -> &StreamReassembler {
        &self.stream
    }

    pub(crate) fn stream_mut(&mut self) -> &mut StreamReassembler {
        &mut self.stream
    }

    /// Register a listener for segments arriving on this flow.
    pub fn on_packet(&self, callback: impl FnMut(&PacketEvent<'_>) + 'static) -> ListenerId {
        self.packet_received.add(Rc::new(RefCell::new(callback)))
    }

    pub fn remove_packet_listener(&self, id: ListenerId) -> bool {
        self.packet_received.remove(id)
    }

    /// Register a listener for this flow's FIN.
    pub fn on_closed(&self, callback: impl FnMut(&FlowClosedEvent<'_>) + 'static) -> ListenerId {
        self.flow_closed.add(Rc::new(RefCell::new(callback)))
    }

    pub fn remove_closed_listener(&self, id: ListenerId) -> bool {
        self.flow_closed.remove(id)
    }

    /// Record a segment: last-seen numbers, counters, and the payload append.
    pub(crate) fn record(&mut self, segment: &TcpSegment) -> Result<(), StreamError> {
        self.sequence = Some(segment.sequence);
        self.ack = Some(segment.acknowledgment);
        self.segments_seen += 1;
        self.payload_bytes += segment.payload.len() as u64;
        if self.stream_failed {
            return Ok(());
        }
        if let Err(err) = self.stream.append(segment) {
            self.stream_failed = true;
            return Err(err);
        }
        Ok(())
    }

    /// Mark the flow closed; returns true on the first FIN only.
    pub(crate) fn mark_closed(&mut self) -> bool {
        if self.is_open {
            self.is_open = false;
            true
        } else {
            false
        }
    }
}
