//! Streaming HTTP/1.x reconstruction.
//!
//! ## Components
//!
//! - [`read_crlf_line`] - bounded CRLF line reading over a reassembled stream
//! - [`HttpParser`] - resumable per-direction message state machine
//! - [`HttpSessionWatcher`] - per-connection direction discovery and
//!   request/response pairing
//!
//! The parser recognizes HTTP/1.0 and HTTP/1.1 requests and responses with
//! `Content-Length` and chunked bodies, inflates gzip/deflate message bodies,
//! and supports pipelined exchanges through the watcher's pending-request
//! queue.

mod decode;
mod line;
mod message;
mod parser;
mod watcher;

pub use decode::decode_body;
pub use line::{read_crlf_line, LineRead};
pub use message::{
    status_name, Headers, HttpHead, HttpMessage, HttpMethod, HttpRequest, HttpStatus, HttpVersion,
    CONTENT_ENCODING, CONTENT_LENGTH, COOKIE, TRANSFER_ENCODING,
};
pub use parser::{HttpParser, HttpRole, ParseProgress};
pub use watcher::{
    HttpDirection, HttpSessionWatcher, RequestEvent, StatusEvent, WatchErrorEvent,
};
