//! Body decompression for `Content-Encoding` codings.

use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};

use crate::error::HttpError;

/// Decode a message body according to its `Content-Encoding`.
///
/// Returns `(body, compressed_body)`: for `gzip` and `deflate` the body is
/// replaced with the inflated bytes and the original compressed bytes are
/// retained alongside; `identity` and `br` pass the body through untouched
/// (brotli is not implemented, so its bodies keep their declared
/// Content-Length worth of compressed bytes); any other token is an error.
pub fn decode_body(
    encoding: Option<&str>,
    body: Vec<u8>,
) -> Result<(Vec<u8>, Option<Vec<u8>>), HttpError> {
    match encoding {
        None | Some("identity") | Some("br") => Ok((body, None)),
        Some("gzip") => {
            let inflated = inflate(GzDecoder::new(body.as_slice()), "gzip body")?;
            Ok((inflated, Some(body)))
        }
        Some("deflate") => {
            let inflated = inflate(ZlibDecoder::new(body.as_slice()), "deflate body")?;
            Ok((inflated, Some(body)))
        }
        Some(other) => Err(HttpError::UnknownContentEncoding {
            encoding: other.to_string(),
        }),
    }
}

fn inflate(mut decoder: impl Read, what: &'static str) -> Result<Vec<u8>, HttpError> {
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| HttpError::Malformed {
            what,
            detail: err.to_string(),
        })?;
    Ok(out)
}
