//! HTTP message types shared by the parser and the session watcher.

use std::collections::HashMap;
use std::fmt;

use compact_str::CompactString;

use crate::error::HttpError;

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    V1_0,
    V1_1,
}

impl HttpVersion {
    pub fn parse(text: &str) -> Result<Self, HttpError> {
        match text {
            "HTTP/1.0" => Ok(HttpVersion::V1_0),
            "HTTP/1.1" => Ok(HttpVersion::V1_1),
            _ => Err(HttpError::Version { text: text.to_string() }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::V1_0 => "HTTP/1.0",
            HttpVersion::V1_1 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    Head,
    Get,
    Post,
    Put,
    Delete,
    Trace,
    Options,
    Connect,
    #[default]
    Unknown,
}

impl HttpMethod {
    /// Parse a method token. Returns None for tokens outside the recognized
    /// set; the caller treats that as a malformed request line.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "HEAD" => Some(HttpMethod::Head),
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "DELETE" => Some(HttpMethod::Delete),
            "TRACE" => Some(HttpMethod::Trace),
            "OPTIONS" => Some(HttpMethod::Options),
            "CONNECT" => Some(HttpMethod::Connect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Head => "HEAD",
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The literal header keys the parser consults. Lookups are exact byte
/// matches; no case folding happens anywhere.
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_ENCODING: &str = "Content-Encoding";
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const COOKIE: &str = "Cookie";

/// Header map. Keys are case-sensitive; writing a duplicate key keeps the
/// last value.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    map: HashMap<CompactString, CompactString>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.map
            .insert(CompactString::new(name), CompactString::new(value));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(|value| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Cached `Content-Length`, parsed on demand. A present but unparseable
    /// value is fatal for the message.
    pub fn content_length(&self) -> Result<Option<u64>, HttpError> {
        match self.get(CONTENT_LENGTH) {
            None => Ok(None),
            Some(value) => value
                .parse::<u64>()
                .map(Some)
                .map_err(|_| HttpError::ContentLength { text: value.to_string() }),
        }
    }

    pub fn transfer_encoding(&self) -> Option<&str> {
        self.get(TRANSFER_ENCODING)
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.get(CONTENT_ENCODING)
    }

    /// `Cookie` header pairs, split on `"; "` and then on the first `=`.
    /// Fragments without an `=` come back with an empty value.
    pub fn cookies(&self) -> Vec<(String, String)> {
        let Some(raw) = self.get(COOKIE) else {
            return Vec::new();
        };
        raw.split("; ")
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect()
    }
}

/// Reason phrase for the well-known status codes; other codes stay raw.
pub fn status_name(code: u16) -> Option<&'static str> {
    match code {
        100 => Some("Continue"),
        101 => Some("Switching Protocols"),
        200 => Some("OK"),
        201 => Some("Created"),
        202 => Some("Accepted"),
        204 => Some("No Content"),
        206 => Some("Partial Content"),
        301 => Some("Moved Permanently"),
        302 => Some("Found"),
        303 => Some("See Other"),
        304 => Some("Not Modified"),
        307 => Some("Temporary Redirect"),
        308 => Some("Permanent Redirect"),
        400 => Some("Bad Request"),
        401 => Some("Unauthorized"),
        403 => Some("Forbidden"),
        404 => Some("Not Found"),
        405 => Some("Method Not Allowed"),
        408 => Some("Request Timeout"),
        410 => Some("Gone"),
        411 => Some("Length Required"),
        413 => Some("Payload Too Large"),
        429 => Some("Too Many Requests"),
        500 => Some("Internal Server Error"),
        501 => Some("Not Implemented"),
        502 => Some("Bad Gateway"),
        503 => Some("Service Unavailable"),
        504 => Some("Gateway Timeout"),
        _ => None,
    }
}

/// Fields common to requests and statuses.
#[derive(Debug, Clone)]
pub struct HttpHead {
    pub version: HttpVersion,
    pub headers: Headers,
    /// Decoded body bytes; None when the message carried no body phase.
    pub body: Option<Vec<u8>>,
    /// The original compressed bytes when the body was gzip/deflate decoded,
    /// else None.
    pub compressed_body: Option<Vec<u8>>,
}

impl HttpHead {
    /// Length of the (decoded) body, zero when absent.
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// A completed HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: CompactString,
    pub head: HttpHead,
}

/// A completed HTTP status (response).
#[derive(Debug, Clone)]
pub struct HttpStatus {
    pub code: u16,
    pub reason: CompactString,
    /// The pipelined request this status answers, when one was waiting.
    pub request: Option<HttpRequest>,
    pub head: HttpHead,
}

impl HttpStatus {
    /// The conventional name for the code, when it is a well-known one.
    pub fn code_name(&self) -> Option<&'static str> {
        status_name(self.code)
    }
}

/// A completed message of either kind.
#[derive(Debug, Clone)]
pub enum HttpMessage {
    Request(HttpRequest),
    Status(HttpStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(HttpVersion::parse("HTTP/1.1").unwrap(), HttpVersion::V1_1);
        assert_eq!(HttpVersion::parse("HTTP/1.0").unwrap(), HttpVersion::V1_0);
        assert!(matches!(
            HttpVersion::parse("HTTP/2.0"),
            Err(HttpError::Version { .. })
        ));
        assert!(HttpVersion::parse("http/1.1").is_err());
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(HttpMethod::parse("GET"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::parse("CONNECT"), Some(HttpMethod::Connect));
        assert_eq!(HttpMethod::parse("get"), None);
        assert_eq!(HttpMethod::parse("PATCH"), None);
    }

    #[test]
    fn test_headers_last_write_wins() {
        let mut headers = Headers::new();
        headers.insert("X-Test", "one");
        headers.insert("X-Test", "two");
        assert_eq!(headers.get("X-Test"), Some("two"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_headers_case_sensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Length", "10");
        assert_eq!(headers.get("content-length"), None);
        assert_eq!(headers.get("Content-Length"), Some("10"));
    }

    #[test]
    fn test_content_length() {
        let mut headers = Headers::new();
        assert_eq!(headers.content_length().unwrap(), None);

        headers.insert(CONTENT_LENGTH, "242");
        assert_eq!(headers.content_length().unwrap(), Some(242));

        headers.insert(CONTENT_LENGTH, "none");
        assert!(matches!(
            headers.content_length(),
            Err(HttpError::ContentLength { .. })
        ));
    }

    #[test]
    fn test_cookies() {
        let mut headers = Headers::new();
        headers.insert(COOKIE, "session=abc123; user=john; bare");
        assert_eq!(
            headers.cookies(),
            vec![
                ("session".to_string(), "abc123".to_string()),
                ("user".to_string(), "john".to_string()),
                ("bare".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_status_name() {
        assert_eq!(status_name(200), Some("OK"));
        assert_eq!(status_name(404), Some("Not Found"));
        assert_eq!(status_name(299), None);
    }
}
