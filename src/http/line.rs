//! CRLF line reading over a reassembled stream.

use std::io::SeekFrom;

use crate::stream::StreamReassembler;

/// Outcome of one line read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// Nothing available after the cursor.
    NeedMoreBytes,
    /// Bytes are present but no CRLF arrives before the end of the stream;
    /// the cursor is restored.
    EndOfStream,
    /// A byte above 0x7F appeared before any CRLF; the cursor is restored.
    NonAscii,
    /// A complete line, CRLF stripped; the cursor is advanced past the CRLF.
    Line(String),
}

/// Read up to and including the next CR LF pair from the cursor.
///
/// Scanning stops at the first byte above 0x7F so that a binary body is never
/// walked end to end looking for a line terminator that cannot appear.
pub fn read_crlf_line(stream: &mut StreamReassembler) -> LineRead {
    let data = stream.lookahead();
    if data.is_empty() {
        return LineRead::NeedMoreBytes;
    }

    let mut found: Option<(usize, String)> = None;
    for (index, &byte) in data.iter().enumerate() {
        if byte > 0x7f {
            return LineRead::NonAscii;
        }
        if byte == b'\n' && index > 0 && data[index - 1] == b'\r' {
            let line = String::from_utf8_lossy(&data[..index - 1]).into_owned();
            found = Some((index + 1, line));
            break;
        }
    }

    match found {
        Some((consumed, line)) => {
            // forward seek within the buffer, cannot go out of range
            let _ = stream.seek(SeekFrom::Current(consumed as i64));
            LineRead::Line(line)
        }
        None => LineRead::EndOfStream,
    }
}
