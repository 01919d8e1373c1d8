//! Error types for httpflow.
//!
//! This module provides structured error types for all httpflow operations:
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`StreamError`] - Errors from per-flow stream reassembly
//! - [`HttpError`] - Errors from the streaming HTTP parser
//! - [`CaptureError`] - Errors from capture-file ingestion
//!
//! Parse failures are ordinary values, never panics. The HTTP parser signals
//! "not enough input yet" through its result type, not through an error; the
//! variants below are all fatal for the stream or message that raised them.

use thiserror::Error;

/// Main error type for httpflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error in per-flow stream reassembly
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Error from the streaming HTTP parser
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Error reading or decoding a capture file
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by [`StreamReassembler`](crate::stream::StreamReassembler).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The segment's endpoints do not match the stream's first-seen endpoints.
    #[error("segment from {got} is not part of the stream started by {expected}")]
    NotPartOfStream { expected: String, got: String },

    /// Appending would grow the buffer past its configured bound.
    #[error("stream buffer limit exceeded (limit {limit}, required {required})")]
    BufferLimitExceeded { limit: usize, required: usize },

    /// A seek would place the cursor before the start of the stream.
    #[error("seek out of range: {position}")]
    SeekOutOfRange { position: i64 },
}

/// Errors raised by the HTTP parser. Each variant is fatal for the message
/// being parsed; the session watcher tears down its monitors on any of them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// Unparseable HTTP version token in a start line.
    #[error("invalid HTTP version: {text:?}")]
    Version { text: String },

    /// Status-line code that does not parse as an integer.
    #[error("invalid status code: {text:?}")]
    StatusCode { text: String },

    /// Chunk-size line that does not parse as hexadecimal.
    #[error("invalid chunk length: {text:?}")]
    ChunkLength { text: String },

    /// `Content-Length` header value that does not parse as an integer.
    #[error("invalid Content-Length: {text:?}")]
    ContentLength { text: String },

    /// `Content-Encoding` names a coding the decoder does not implement.
    #[error("unknown content encoding: {encoding:?}")]
    UnknownContentEncoding { encoding: String },

    /// Any other malformed input (start line, header line, chunk separator).
    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },
}

/// Errors related to capture-file reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The file is not a PCAP or PCAPNG capture.
    #[error("invalid capture format: {reason}")]
    InvalidFormat { reason: String },

    /// The capture's link layer is not one we can decode.
    #[error("unsupported link type: {link_type}")]
    UnsupportedLinkType { link_type: u16 },

    /// A block or frame failed to parse mid-file.
    #[error("malformed capture data: {reason}")]
    Malformed { reason: String },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
