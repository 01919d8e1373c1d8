//! Capture-file ingestion: PCAP/PCAPNG frames to [`TcpSegment`]s.
//!
//! [`SegmentReader`] opens a capture file (legacy PCAP or PCAPNG, optionally
//! gzip-compressed), walks its Ethernet frames, and yields the TCP segments
//! ready for [`ConnectionManager::process`](crate::conntrack::ConnectionManager::process).
//! Non-TCP frames and frames that fail to slice are skipped.
//!
//! PCAPNG timestamps are taken at the default microsecond resolution.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::net::IpAddr;
use std::path::Path;

use bytes::Bytes;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use flate2::read::GzDecoder;
use pcap_parser::pcapng::Block;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{create_reader, Linktype, PcapBlockOwned, PcapError};
use tracing::trace;

use crate::error::{CaptureError, Error};
use crate::segment::{Endpoint, TcpFlags, TcpSegment, MICROS_PER_SEC};

const BUFFER_CAPACITY: usize = 65536;

/// Reader that turns a capture file into a stream of TCP segments.
pub struct SegmentReader {
    reader: Box<dyn PcapReaderIterator>,
    frames: u64,
}

impl SegmentReader {
    /// Open a capture file, transparently unwrapping gzip compression.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 2];
        let n = file.read(&mut magic)?;
        file.seek(SeekFrom::Start(0))?;

        let source: Box<dyn Read> = if n == 2 && magic == [0x1f, 0x8b] {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Self::from_reader(source)
    }

    /// Read capture data from an already-decompressed byte source.
    pub fn from_reader(source: impl Read + 'static) -> Result<Self, Error> {
        let reader = create_reader(BUFFER_CAPACITY, source).map_err(|err| {
            Error::Capture(CaptureError::InvalidFormat {
                reason: format!("{err:?}"),
            })
        })?;
        Ok(Self { reader, frames: 0 })
    }

    /// Number of link-layer frames walked so far, TCP or not.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// The next TCP segment, or None at end of file.
    pub fn next_segment(&mut self) -> Result<Option<TcpSegment>, Error> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let mut produced = None;
                    match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            if header.network != Linktype::ETHERNET {
                                return Err(unsupported(header.network));
                            }
                        }
                        PcapBlockOwned::Legacy(frame) => {
                            self.frames += 1;
                            let timestamp =
                                frame.ts_sec as i64 * MICROS_PER_SEC + frame.ts_usec as i64;
                            produced = segment_from_frame(frame.data, timestamp);
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                            if idb.linktype != Linktype::ETHERNET {
                                return Err(unsupported(idb.linktype));
                            }
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            self.frames += 1;
                            let timestamp =
                                (((epb.ts_high as u64) << 32) | epb.ts_low as u64) as i64;
                            let caplen = epb.caplen as usize;
                            let data = epb.data.get(..caplen).unwrap_or(epb.data);
                            produced = segment_from_frame(data, timestamp);
                        }
                        PcapBlockOwned::NG(_) => {}
                    }
                    self.reader.consume(offset);
                    if let Some(segment) = produced {
                        return Ok(Some(segment));
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    self.reader.refill().map_err(|err| {
                        Error::Capture(CaptureError::Malformed {
                            reason: format!("{err:?}"),
                        })
                    })?;
                }
                Err(err) => {
                    return Err(Error::Capture(CaptureError::Malformed {
                        reason: format!("{err:?}"),
                    }))
                }
            }
        }
    }
}

impl Iterator for SegmentReader {
    type Item = Result<TcpSegment, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_segment().transpose()
    }
}

fn unsupported(link_type: Linktype) -> Error {
    Error::Capture(CaptureError::UnsupportedLinkType {
        link_type: link_type.0 as u16,
    })
}

/// Slice an Ethernet frame down to its TCP segment, if it has one.
fn segment_from_frame(data: &[u8], timestamp: i64) -> Option<TcpSegment> {
    let sliced = match SlicedPacket::from_ethernet(data) {
        Ok(sliced) => sliced,
        Err(err) => {
            trace!(?err, "skipping unparseable frame");
            return None;
        }
    };

    let (source_ip, destination_ip) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(ipv6)) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
        ),
        _ => return None,
    };

    let tcp = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => tcp,
        _ => return None,
    };

    Some(TcpSegment {
        timestamp,
        source: Endpoint::new(source_ip, tcp.source_port()),
        destination: Endpoint::new(destination_ip, tcp.destination_port()),
        sequence: tcp.sequence_number(),
        acknowledgment: tcp.acknowledgment_number(),
        flags: TcpFlags {
            syn: tcp.syn(),
            ack: tcp.ack(),
            fin: tcp.fin(),
            rst: tcp.rst(),
            psh: tcp.psh(),
            urg: tcp.urg(),
        },
        payload: Bytes::copy_from_slice(tcp.payload()),
    })
}
