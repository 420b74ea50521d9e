//! Minimal HTTP/1.1 wire codec for ranged GET requests.
//!
//! Everything byte-level lives here: request encoding, the header/body split,
//! status-line checks, and length-header extraction. The rest of the engine
//! only sees typed outputs from this module, never raw buffers.
//!
//! The codec deliberately speaks a tiny subset of HTTP/1.1: plain GET with a
//! `Range` header, `200`/`206` responses with `Content-Length`, and (for the
//! length probe) `Content-Range`. No chunked encoding, no redirects, no TLS.

/// The four-byte delimiter between the header block and the body.
pub const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";

/// Build a ranged GET request.
///
/// Produces exactly:
///
/// ```text
/// GET <path> HTTP/1.1\r\n
/// Host: <host>\r\n
/// Connection: keep-alive\r\n        (only when keep_alive is set)
/// Range: bytes=<start>-<end>\r\n
/// \r\n
/// ```
///
/// `start` and `end` are inclusive byte offsets, matching the `Range`
/// header's own convention.
pub fn encode_range_request(
    host: &str,
    path: &str,
    start: u64,
    end: u64,
    keep_alive: bool,
) -> Vec<u8> {
    let connection = if keep_alive {
        "Connection: keep-alive\r\n"
    } else {
        ""
    };
    format!("GET {path} HTTP/1.1\r\nHost: {host}\r\n{connection}Range: bytes={start}-{end}\r\n\r\n")
        .into_bytes()
}

/// Split a receive buffer at the first header/body delimiter.
///
/// Returns `(header, body)` where the header includes the delimiter itself.
/// If the delimiter has not arrived yet, the header is empty and the entire
/// buffer comes back as the body: the caller's signal to keep reading and
/// re-split once more bytes are in. Calling this repeatedly on a growing
/// buffer is the intended use.
pub fn split_header_body(buffer: &[u8]) -> (&[u8], &[u8]) {
    match buffer
        .windows(HEADER_DELIMITER.len())
        .position(|window| window == HEADER_DELIMITER)
    {
        Some(at) => buffer.split_at(at + HEADER_DELIMITER.len()),
        None => (&[], buffer),
    }
}

/// Whether the status line accepts this response.
///
/// Only `HTTP/1.1 200 OK` and `HTTP/1.1 206 Partial Content` count as
/// success. Anything else, including an empty header, is a failure for the
/// caller to handle; no retry logic lives at this layer.
pub fn is_success_status(header: &[u8]) -> bool {
    let first = first_line(header);
    first == b"HTTP/1.1 200 OK" || first == b"HTTP/1.1 206 Partial Content"
}

/// The response status line, for error reporting.
pub fn status_line(header: &[u8]) -> String {
    String::from_utf8_lossy(first_line(header)).into_owned()
}

/// The number of body bytes in *this* response, from `Content-Length`.
///
/// Not the resource total: a ranged response's `Content-Length` covers only
/// the requested range.
pub fn body_length(header: &[u8]) -> Option<u64> {
    header_value(header, "content-length:")?.parse().ok()
}

/// The resource's total length, from the `Content-Range` denominator.
///
/// Parses the `bytes <start>-<end>/<total>` form and returns `<total>`.
/// Used only by the length probe.
pub fn total_length(header: &[u8]) -> Option<u64> {
    let range = header_value(header, "content-range:")?;
    range.rsplit('/').next()?.parse().ok()
}

/// First line of the header block, without the trailing CRLF.
fn first_line(header: &[u8]) -> &[u8] {
    let end = header
        .windows(2)
        .position(|window| window == b"\r\n")
        .unwrap_or(header.len());
    &header[..end]
}

/// Value of the named header, matched ASCII-case-insensitively.
///
/// Returns the last whitespace-separated token of the matching line, which
/// for the single-token headers this codec cares about is the whole value.
fn header_value(header: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(header);
    for line in text.lines() {
        let mut words = line.split_whitespace();
        if words
            .next()
            .map_or(false, |word| word.eq_ignore_ascii_case(name))
        {
            return words.last().map(str::to_string);
        }
    }
    None
}
