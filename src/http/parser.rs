//! Streaming HTTP/1.x message parser.
//!
//! [`HttpParser`] is a per-direction state machine driven over a
//! [`StreamReassembler`]. Each [`process`](HttpParser::process) call runs
//! until it completes a message, needs more input, or fails. The cursor
//! discipline makes the parser resumable: on `NeedMoreData` the cursor sits
//! where parsing can pick up once more bytes arrive, and on an error it is
//! restored to the start of the step that failed.

use std::io::SeekFrom;

use compact_str::CompactString;

use crate::error::HttpError;
use crate::stream::StreamReassembler;

use super::decode::decode_body;
use super::line::{read_crlf_line, LineRead};
use super::message::{
    Headers, HttpHead, HttpMessage, HttpMethod, HttpRequest, HttpStatus, HttpVersion,
};

/// What a [`HttpParser::process`] call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseProgress {
    /// Parsing paused; feed more bytes and call `process` again.
    NeedMoreData,
    /// A whole message is available via [`HttpParser::take_message`].
    Complete,
}

/// Which start-line grammar the parser expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpRole {
    Request,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    StartLine,
    Headers,
    FixedBody,
    ChunkLength,
    ChunkData,
    ChunkSeparator,
    Done,
}

/// Streaming parser for one direction of an HTTP conversation.
pub struct HttpParser {
    role: HttpRole,
    phase: Phase,
    version: Option<HttpVersion>,
    headers: Headers,
    method: HttpMethod,
    url: CompactString,
    status_code: u16,
    reason: CompactString,
    body: Option<Vec<u8>>,
    content_length: Option<u64>,
    chunk_length: usize,
    last_chunk_seen: bool,
    finished: Option<HttpMessage>,
}

impl HttpParser {
    pub fn new(role: HttpRole) -> Self {
        Self {
            role,
            phase: Phase::StartLine,
            version: None,
            headers: Headers::new(),
            method: HttpMethod::Unknown,
            url: CompactString::default(),
            status_code: 0,
            reason: CompactString::default(),
            body: None,
            content_length: None,
            chunk_length: 0,
            last_chunk_seen: false,
            finished: None,
        }
    }

    pub fn role(&self) -> HttpRole {
        self.role
    }

    /// `Content-Length` cached at the end of the header phase, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Take the completed message and reset the parser for the next one on
    /// the same direction. None if no message has completed.
    pub fn take_message(&mut self) -> Option<HttpMessage> {
        let message = self.finished.take();
        if message.is_some() {
            *self = Self::new(self.role);
        }
        message
    }

    /// Run the state machine against the stream until a message completes,
    /// input runs out, or the input turns out malformed.
    pub fn process(&mut self, stream: &mut StreamReassembler) -> Result<ParseProgress, HttpError> {
        loop {
            match self.phase {
                Phase::StartLine => {
                    let step = stream.position();
                    match read_crlf_line(stream) {
                        LineRead::NeedMoreBytes | LineRead::EndOfStream => {
                            return Ok(ParseProgress::NeedMoreData)
                        }
                        LineRead::NonAscii => {
                            return Err(HttpError::Malformed {
                                what: "start line",
                                detail: "non-ascii byte".to_string(),
                            })
                        }
                        LineRead::Line(line) => {
                            if let Err(err) = self.parse_start_line(&line) {
                                rewind(stream, step);
                                return Err(err);
                            }
                        }
                    }
                    self.phase = Phase::Headers;
                }

                Phase::Headers => {
                    let step = stream.position();
                    match read_crlf_line(stream) {
                        LineRead::NeedMoreBytes | LineRead::EndOfStream => {
                            return Ok(ParseProgress::NeedMoreData)
                        }
                        LineRead::NonAscii => {
                            return Err(HttpError::Malformed {
                                what: "header line",
                                detail: "non-ascii byte".to_string(),
                            })
                        }
                        LineRead::Line(line) if line.is_empty() => {
                            self.content_length = match self.headers.content_length() {
                                Ok(value) => value,
                                Err(err) => {
                                    rewind(stream, step);
                                    return Err(err);
                                }
                            };
                            if self.content_length.is_some() {
                                self.body = Some(Vec::new());
                                self.phase = Phase::FixedBody;
                            } else if self.headers.transfer_encoding() == Some("chunked") {
                                self.body = Some(Vec::new());
                                self.phase = Phase::ChunkLength;
                            } else {
                                return self.complete(stream, step);
                            }
                        }
                        LineRead::Line(line) => match line.split_once(": ") {
                            Some((name, value)) => self.headers.insert(name, value),
                            None => {
                                rewind(stream, step);
                                return Err(HttpError::Malformed {
                                    what: "header line",
                                    detail: line,
                                });
                            }
                        },
                    }
                }

                Phase::FixedBody => {
                    let step = stream.position();
                    let need = self.content_length.unwrap_or(0) as usize;
                    if stream.remaining() < need {
                        return Ok(ParseProgress::NeedMoreData);
                    }
                    let bytes = stream.read(need).to_vec();
                    self.body = Some(bytes);
                    return self.complete(stream, step);
                }

                Phase::ChunkLength => {
                    let step = stream.position();
                    match read_crlf_line(stream) {
                        LineRead::NeedMoreBytes | LineRead::EndOfStream => {
                            return Ok(ParseProgress::NeedMoreData)
                        }
                        LineRead::NonAscii => {
                            return Err(HttpError::Malformed {
                                what: "chunk length line",
                                detail: "non-ascii byte".to_string(),
                            })
                        }
                        LineRead::Line(line) => {
                            let text = line.trim();
                            match usize::from_str_radix(text, 16) {
                                Ok(length) => {
                                    self.chunk_length = length;
                                    self.phase = Phase::ChunkData;
                                }
                                Err(_) => {
                                    rewind(stream, step);
                                    return Err(HttpError::ChunkLength {
                                        text: text.to_string(),
                                    });
                                }
                            }
                        }
                    }
                }

                Phase::ChunkData => {
                    if self.chunk_length == 0 {
                        self.last_chunk_seen = true;
                        self.phase = Phase::ChunkSeparator;
                        continue;
                    }
                    if stream.remaining() < self.chunk_length {
                        return Ok(ParseProgress::NeedMoreData);
                    }
                    let length = self.chunk_length;
                    let bytes = stream.read(length);
                    self.body.get_or_insert_with(Vec::new).extend_from_slice(bytes);
                    self.phase = Phase::ChunkSeparator;
                }

                Phase::ChunkSeparator => {
                    let step = stream.position();
                    match read_crlf_line(stream) {
                        LineRead::NeedMoreBytes | LineRead::EndOfStream => {
                            return Ok(ParseProgress::NeedMoreData)
                        }
                        LineRead::NonAscii => {
                            return Err(HttpError::Malformed {
                                what: "chunk separator",
                                detail: "non-ascii byte".to_string(),
                            })
                        }
                        LineRead::Line(line) => {
                            if !line.is_empty() {
                                rewind(stream, step);
                                return Err(HttpError::Malformed {
                                    what: "chunk separator",
                                    detail: line,
                                });
                            }
                            if self.last_chunk_seen {
                                return self.complete(stream, step);
                            }
                            self.phase = Phase::ChunkLength;
                        }
                    }
                }

                Phase::Done => return Ok(ParseProgress::Complete),
            }
        }
    }

    fn parse_start_line(&mut self, line: &str) -> Result<(), HttpError> {
        let mut parts = line.splitn(3, ' ');
        match self.role {
            HttpRole::Request => {
                let (method, url, version) = match (parts.next(), parts.next(), parts.next()) {
                    (Some(method), Some(url), Some(version)) => (method, url, version),
                    _ => {
                        return Err(HttpError::Malformed {
                            what: "request line",
                            detail: line.to_string(),
                        })
                    }
                };
                self.method = HttpMethod::parse(method).ok_or_else(|| HttpError::Malformed {
                    what: "request method",
                    detail: method.to_string(),
                })?;
                self.version = Some(HttpVersion::parse(version)?);
                self.url = CompactString::new(url);
            }
            HttpRole::Status => {
                let (version, code) = match (parts.next(), parts.next()) {
                    (Some(version), Some(code)) => (version, code),
                    _ => {
                        return Err(HttpError::Malformed {
                            what: "status line",
                            detail: line.to_string(),
                        })
                    }
                };
                // the reason phrase is everything after the second space and
                // may itself contain spaces
                let reason = parts.next().unwrap_or("");
                self.version = Some(HttpVersion::parse(version)?);
                self.status_code = code
                    .parse::<u16>()
                    .map_err(|_| HttpError::StatusCode { text: code.to_string() })?;
                self.reason = CompactString::new(reason);
            }
        }
        Ok(())
    }

    /// Decode the body and assemble the finished message.
    fn complete(
        &mut self,
        stream: &mut StreamReassembler,
        step: usize,
    ) -> Result<ParseProgress, HttpError> {
        let raw = self.body.take();
        let (body, compressed_body) = match raw {
            Some(raw) => match decode_body(self.headers.content_encoding(), raw) {
                Ok((body, compressed)) => (Some(body), compressed),
                Err(err) => {
                    rewind(stream, step);
                    return Err(err);
                }
            },
            None => (None, None),
        };

        let head = HttpHead {
            version: self.version.take().ok_or(HttpError::Malformed {
                what: "message",
                detail: "missing start line".to_string(),
            })?,
            headers: std::mem::take(&mut self.headers),
            body,
            compressed_body,
        };
        self.finished = Some(match self.role {
            HttpRole::Request => HttpMessage::Request(HttpRequest {
                method: self.method,
                url: std::mem::take(&mut self.url),
                head,
            }),
            HttpRole::Status => HttpMessage::Status(HttpStatus {
                code: self.status_code,
                reason: std::mem::take(&mut self.reason),
                request: None,
                head,
            }),
        });
        self.phase = Phase::Done;
        Ok(ParseProgress::Complete)
    }
}

fn rewind(stream: &mut StreamReassembler, to: usize) {
    // target is a previously observed position, always in range
    let _ = stream.seek(SeekFrom::Start(to as u64));
}
