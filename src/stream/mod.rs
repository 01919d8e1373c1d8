//! Per-flow byte-stream reassembly.
//!
//! [`StreamReassembler`] accumulates the non-empty payloads of one flow into
//! a contiguous buffer, keeps a [`PacketInfo`] record per appended segment,
//! and exposes seekable read access plus prefix trimming for consumers that
//! advance through the stream (the HTTP parser).
//!
//! Segments are taken in arrival order: the reassembler does not reorder by
//! TCP sequence number. Duplicated or reordered captures therefore surface as
//! corrupt bytes at the application layer, where the parser reports an error
//! and the session watcher tears down. This is a documented limitation of the
//! capture-order model.

use std::io::SeekFrom;

use bytes::{Buf, BytesMut};
use smallvec::SmallVec;

use crate::error::StreamError;
use crate::segment::{Endpoint, TcpSegment};

/// Bookkeeping record for one appended payload.
///
/// `offset` is the payload's position in the reassembled buffer and always
/// equals the cumulative length of the records before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    /// TCP sequence number of the segment that carried the payload.
    pub sequence: u32,
    /// Payload length in bytes; never zero.
    pub length: usize,
    /// Start offset in the reassembled buffer.
    pub offset: usize,
}

/// Append-only reassembled byte stream with a read cursor.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    /// Source/destination of the first appended segment; later appends must
    /// match or they are rejected.
    endpoints: Option<(Endpoint, Endpoint)>,
    packets: SmallVec<[PacketInfo; 8]>,
    buffer: BytesMut,
    position: usize,
    limit: Option<usize>,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reassembler that refuses to grow past `limit` bytes of buffered
    /// payload.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Total buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Current cursor position. May exceed [`len`](Self::len) after a
    /// past-end seek.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes between the cursor and the end of the stream.
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Per-segment records, in append order.
    pub fn packets(&self) -> &[PacketInfo] {
        &self.packets
    }

    /// Source/destination pair pinned by the first appended segment.
    pub fn endpoints(&self) -> Option<(Endpoint, Endpoint)> {
        self.endpoints
    }

    /// Append a segment's payload to the end of the buffer.
    ///
    /// The first appended segment pins the stream's (source, destination)
    /// pair; any later segment with a different pair is rejected. Zero-length
    /// payloads validate the pair but are otherwise dropped. The read cursor
    /// is unaffected.
    pub fn append(&mut self, segment: &TcpSegment) -> Result<(), StreamError> {
        match self.endpoints {
            None => self.endpoints = Some((segment.source, segment.destination)),
            Some((source, destination)) => {
                if segment.source != source || segment.destination != destination {
                    return Err(StreamError::NotPartOfStream {
                        expected: source.to_string(),
                        got: segment.source.to_string(),
                    });
                }
            }
        }
        if segment.payload.is_empty() {
            return Ok(());
        }
        let required = self.buffer.len() + segment.payload.len();
        if let Some(limit) = self.limit {
            if required > limit {
                return Err(StreamError::BufferLimitExceeded { limit, required });
            }
        }
        self.packets.push(PacketInfo {
            sequence: segment.sequence,
            length: segment.payload.len(),
            offset: self.buffer.len(),
        });
        self.buffer.extend_from_slice(&segment.payload);
        Ok(())
    }

    /// Move the cursor. Seeking past the end is permitted; seeking before the
    /// start is an error and leaves the cursor unchanged.
    pub fn seek(&mut self, from: SeekFrom) -> Result<usize, StreamError> {
        let target = match from {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => self.buffer.len() as i64 + delta,
        };
        if target < 0 {
            return Err(StreamError::SeekOutOfRange { position: target });
        }
        self.position = target as usize;
        Ok(self.position)
    }

    /// Read up to `n` bytes from the cursor, advancing it. Reads clamp to the
    /// available bytes; at or past the end of the stream the result is empty.
    pub fn read(&mut self, n: usize) -> &[u8] {
        let start = self.position.min(self.buffer.len());
        let end = self.position.saturating_add(n).min(self.buffer.len());
        self.position = self.position.max(end);
        &self.buffer[start..end]
    }

    /// Bytes from the cursor to the end of the stream, without consuming.
    pub fn lookahead(&self) -> &[u8] {
        let start = self.position.min(self.buffer.len());
        &self.buffer[start..]
    }

    /// Move the cursor to the start of the packet record following the one
    /// that contains it. Returns false and seeks to the end of the stream if
    /// there is no next record.
    pub fn advance_to_next_packet(&mut self) -> bool {
        for (index, packet) in self.packets.iter().enumerate() {
            if self.position >= packet.offset && self.position < packet.offset + packet.length {
                return match self.packets.get(index + 1) {
                    Some(next) => {
                        self.position = next.offset;
                        true
                    }
                    None => {
                        self.position = self.buffer.len();
                        false
                    }
                };
            }
        }
        self.position = self.buffer.len();
        false
    }

    /// Drop every packet record before the one containing the cursor and
    /// rebase the survivors to offset zero. The cursor keeps its logical
    /// position: any read after the trim returns the same bytes it would have
    /// before. The pinned endpoint pair is preserved for future appends. With
    /// the cursor at (or past) the end of the stream everything is dropped
    /// and the cursor returns to zero.
    pub fn trim_unused_packets(&mut self) {
        let containing = self
            .packets
            .iter()
            .position(|p| self.position >= p.offset && self.position < p.offset + p.length);
        match containing {
            Some(index) => {
                let base = self.packets[index].offset;
                self.packets.drain(..index);
                for packet in self.packets.iter_mut() {
                    packet.offset -= base;
                }
                self.buffer.advance(base);
                self.position -= base;
            }
            None => {
                self.packets.clear();
                self.buffer.clear();
                self.position = 0;
            }
        }
    }
}
