//! Minimal HTTP/1.1 wire codec.
//!
//! Parsing reads complete requests from the front of a connection buffer
//! into reusable [`Request`] objects; serialization appends finished
//! [`Response`]s to a connection write buffer. Pipelined requests are
//! handled by calling [`parse_requests`] on whatever the buffer holds.
//!
//! Supported: request line, header block, `Content-Length` bodies.
//! Rejected: `Transfer-Encoding` bodies, versions other than 1.0/1.1.

use std::io::Write as _;

use shortener_core::http::{Method, Request, Response, Status, Version};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    RequestLine,
    #[error("unsupported protocol version")]
    Version,
    #[error("malformed header line")]
    Header,
    #[error("invalid Content-Length")]
    ContentLength,
    #[error("transfer encodings are not supported")]
    TransferEncoding,
}

impl ParseError {
    pub fn status(&self) -> Status {
        match self {
            ParseError::TransferEncoding => Status::NOT_IMPLEMENTED,
            _ => Status::BAD_REQUEST,
        }
    }
}

const SERVER: &str = "shortener";

/// Locate the end of the header block; returns the index just past CRLFCRLF.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn trim(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = s {
        s = rest;
    }
    s
}

fn parse_request_line(line: &[u8], r: &mut Request) -> Result<(), ParseError> {
    let mut parts = line.split(|&b| b == b' ').filter(|p| !p.is_empty());
    let method = parts.next().ok_or(ParseError::RequestLine)?;
    let target = parts.next().ok_or(ParseError::RequestLine)?;
    let version = parts.next().ok_or(ParseError::RequestLine)?;
    if parts.next().is_some() || target.first() != Some(&b'/') {
        return Err(ParseError::RequestLine);
    }

    r.method = Method::parse(method);
    r.version = match version {
        b"HTTP/1.1" => Version::Http11,
        b"HTTP/1.0" => Version::Http10,
        _ => return Err(ParseError::Version),
    };

    let target = std::str::from_utf8(target).map_err(|_| ParseError::RequestLine)?;
    match target.split_once('?') {
        Some((path, query)) => {
            r.path.push_str(path);
            r.query.push_str(query);
        }
        None => r.path.push_str(target),
    }
    Ok(())
}

/// Parse one request from the front of `buf` into `r`.
///
/// Returns `Ok(Some(consumed))` for a complete request, `Ok(None)` if more
/// bytes are needed. `r` is reset first.
pub fn parse_request(buf: &[u8], r: &mut Request) -> Result<Option<usize>, ParseError> {
    let head_end = match find_head_end(buf) {
        Some(end) => end,
        None => return Ok(None),
    };
    r.reset();

    let head = &buf[..head_end - 4];
    let mut lines = head.split(|&b| b == b'\n').map(|l| l.strip_suffix(b"\r").unwrap_or(l));

    let request_line = lines.next().ok_or(ParseError::RequestLine)?;
    parse_request_line(request_line, r)?;

    for line in lines {
        let colon = line.iter().position(|&b| b == b':').ok_or(ParseError::Header)?;
        let name = &line[..colon];
        if name.is_empty() || name.iter().any(|b| b.is_ascii_whitespace()) {
            return Err(ParseError::Header);
        }
        let name = std::str::from_utf8(name).map_err(|_| ParseError::Header)?;
        let value = String::from_utf8_lossy(trim(&line[colon + 1..]));
        r.headers.add(name, value);
    }

    if r.headers.has("Transfer-Encoding") {
        return Err(ParseError::TransferEncoding);
    }
    let body_len = match r.headers.get("Content-Length") {
        Some(v) => v.trim().parse::<usize>().map_err(|_| ParseError::ContentLength)?,
        None => 0,
    };

    let total = head_end.checked_add(body_len).ok_or(ParseError::ContentLength)?;
    if buf.len() < total {
        return Ok(None);
    }
    r.body.extend_from_slice(&buf[head_end..total]);
    Ok(Some(total))
}

/// Parse as many complete requests as fit in `out`, in arrival order.
///
/// Returns `(consumed, count)`. An error is returned only when the very
/// first request is malformed; a malformed request behind valid ones stops
/// the batch and is reported by the next call.
pub fn parse_requests(buf: &[u8], out: &mut [Request]) -> Result<(usize, usize), ParseError> {
    let mut consumed = 0;
    let mut count = 0;

    while count < out.len() {
        match parse_request(&buf[consumed..], &mut out[count]) {
            Ok(Some(n)) => {
                consumed += n;
                count += 1;
            }
            Ok(None) => break,
            Err(e) if count == 0 => return Err(e),
            Err(_) => break,
        }
    }

    Ok((consumed, count))
}

/// Append `w` to `wbuf`. `date` is the current header cache value.
/// `include_body` is false for `HEAD`.
pub fn fill_response(wbuf: &mut Vec<u8>, w: &Response, date: &[u8], include_body: bool) {
    let _ = write!(wbuf, "HTTP/1.1 {} {}\r\n", w.status.0, w.status.reason());
    wbuf.extend_from_slice(b"Date: ");
    wbuf.extend_from_slice(date);
    let _ = write!(wbuf, "\r\nServer: {}\r\nContent-Length: {}\r\n", SERVER, w.body.len());
    for (name, value) in w.headers.iter() {
        if name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("Date") {
            continue;
        }
        let _ = write!(wbuf, "{}: {}\r\n", name, value);
    }
    wbuf.extend_from_slice(b"\r\n");
    if include_body {
        wbuf.extend_from_slice(&w.body);
    }
}

/// Append a synthesized plain-text error response (no handler involved).
pub fn fill_error(wbuf: &mut Vec<u8>, status: Status, message: &str, date: &[u8], close: bool) {
    let _ = write!(wbuf, "HTTP/1.1 {} {}\r\n", status.0, status.reason());
    wbuf.extend_from_slice(b"Date: ");
    wbuf.extend_from_slice(date);
    let _ = write!(
        wbuf,
        "\r\nServer: {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\nContent-Length: {}\r\n",
        SERVER,
        message.len() + 1
    );
    if close {
        wbuf.extend_from_slice(b"Connection: close\r\n");
    }
    wbuf.extend_from_slice(b"\r\n");
    wbuf.extend_from_slice(message.as_bytes());
    wbuf.push(b'\n');
}
