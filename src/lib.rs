//! # httpflow
//!
//! Passive TCP connection tracking and HTTP/1.x session reconstruction.
//!
//! httpflow ingests captured TCP segments (from a PCAP file via
//! [`pcap::SegmentReader`], or any other supplier of [`TcpSegment`] records),
//! groups them into bidirectional connections with one flow per direction,
//! reassembles each flow's payload into an ordered byte stream, and drives a
//! streaming HTTP/1.x parser that emits requests and responses as they
//! complete - including transparent gzip/deflate body decompression and
//! pipelined request/response pairing.
//!
//! ## Quick Start
//!
//! ```no_run
//! use httpflow::{ConnectionManager, HttpSessionWatcher, SegmentReader, TrackerConfig};
//!
//! # fn main() -> httpflow::Result<()> {
//! let mut manager = ConnectionManager::new(TrackerConfig::default());
//! manager.on_connection_found(|event| {
//!     let watcher = HttpSessionWatcher::new()
//!         .on_request_found(|req| {
//!             println!("{} {}", req.request.method, req.request.url);
//!         })
//!         .on_status_found(|st| {
//!             println!("{} ({} byte body)", st.status.code, st.status.head.body_len());
//!         });
//!     event.connection.attach_watcher(watcher);
//! });
//!
//! for segment in SegmentReader::open("capture.pcap")? {
//!     manager.process(&segment?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------------------+
//! |                            httpflow                              |
//! +------------------------------------------------------------------+
//! |  segment/    - TcpSegment, Endpoint, FlowKey                     |
//! |  conntrack/  - ConnectionManager, Connection, Flow, idle expiry  |
//! |  stream/     - per-flow reassembled byte stream                  |
//! |  http/       - line reader, streaming parser, session watcher    |
//! |  pcap/       - PCAP/PCAPNG ingestion (pcap-parser + etherparse)  |
//! |  event/      - listener sets                                     |
//! |  error/      - error types                                       |
//! +------------------------------------------------------------------+
//! ```
//!
//! ## Scope
//!
//! The tracker observes; it never emulates a TCP endpoint. Segments are
//! reassembled in arrival order without sequence-number reordering, there is
//! no TLS or HTTP/2 support, and nothing is persisted.

pub mod conntrack;
pub mod error;
pub mod event;
pub mod http;
pub mod pcap;
pub mod segment;
pub mod stream;

// Re-export commonly used types at crate root for convenience
pub use conntrack::{
    CloseReason, Connection, ConnectionClosedEvent, ConnectionEvent, ConnectionManager,
    ConnectionState, Flow, FlowClosedEvent, PacketEvent, StreamWatcher, TrackerConfig,
    WatchVerdict,
};
pub use error::{CaptureError, Error, HttpError, Result, StreamError};
pub use event::{ListenerId, ListenerSet};
pub use http::{
    Headers, HttpDirection, HttpHead, HttpMessage, HttpMethod, HttpParser, HttpRequest, HttpRole,
    HttpSessionWatcher, HttpStatus, HttpVersion, ParseProgress, RequestEvent, StatusEvent,
    WatchErrorEvent,
};
pub use pcap::SegmentReader;
pub use segment::{Endpoint, FlowKey, TcpFlags, TcpSegment, MICROS_PER_SEC};
pub use stream::{PacketInfo, StreamReassembler};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
