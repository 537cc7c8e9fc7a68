//! Request/response types shared by the worker and the routing boundary.
//!
//! Only what the dispatch pipeline needs: method, target, version, headers,
//! an optional body, and cookie helpers. Worker threads keep a fixed batch
//! of these and `reset()` them between requests, so the containers keep
//! their capacity across the connection's lifetime.

use std::fmt;
use std::io::Write as _;

use chrono::{DateTime, Utc};

/// Length of an IMF-fixdate: `Sun, 06 Nov 1994 08:49:37 GMT`.
pub const HTTP_DATE_LEN: usize = 29;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Other,
}

impl Method {
    pub fn parse(raw: &[u8]) -> Method {
        match raw {
            b"GET" => Method::Get,
            b"HEAD" => Method::Head,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"OPTIONS" => Method::Options,
            _ => Method::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Other => "OTHER",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

/// HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Status(pub u16);

impl Status {
    pub const OK: Status = Status(200);
    pub const FOUND: Status = Status(302);
    pub const SEE_OTHER: Status = Status(303);
    pub const BAD_REQUEST: Status = Status(400);
    pub const UNAUTHORIZED: Status = Status(401);
    pub const FORBIDDEN: Status = Status(403);
    pub const NOT_FOUND: Status = Status(404);
    pub const METHOD_NOT_ALLOWED: Status = Status(405);
    pub const CONFLICT: Status = Status(409);
    pub const PAYLOAD_TOO_LARGE: Status = Status(413);
    pub const INTERNAL_SERVER_ERROR: Status = Status(500);
    pub const NOT_IMPLEMENTED: Status = Status(501);
    pub const SERVICE_UNAVAILABLE: Status = Status(503);

    pub fn reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            302 => "Found",
            303 => "See Other",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            409 => "Conflict",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }

    #[inline]
    pub fn is_client_error(self) -> bool {
        (400..500).contains(&self.0)
    }

    #[inline]
    pub fn is_server_error(self) -> bool {
        self.0 >= 500
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::OK
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason())
    }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace the first header called `name`, or append it.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Append without replacing (e.g. several `Set-Cookie`).
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_string(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A parsed request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: Method,
    /// Target path without the query string.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
    pub version: Version,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Peer address of the connection the request arrived on.
    pub remote_addr: String,
}

impl Request {
    pub fn reset(&mut self) {
        self.method = Method::Get;
        self.path.clear();
        self.query.clear();
        self.version = Version::Http11;
        self.headers.clear();
        self.body.clear();
        self.remote_addr.clear();
    }

    /// Value of cookie `name` from the `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        let header = self.headers.get("Cookie")?;
        header.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then_some(v)
        })
    }

    /// Whether the peer expects the connection to stay open.
    pub fn keep_alive(&self) -> bool {
        match self.headers.get("Connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version == Version::Http11,
        }
    }
}

/// A response under construction.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: Status,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn reset(&mut self) {
        self.status = Status::OK;
        self.headers.clear();
        self.body.clear();
    }

    #[inline]
    pub fn write_str(&mut self, s: &str) {
        self.body.extend_from_slice(s.as_bytes());
    }

    pub fn write_int(&mut self, n: i64) {
        let _ = write!(self.body, "{}", n);
    }

    /// Append `s` with `& < > " '` escaped.
    pub fn write_html(&mut self, s: &str) {
        for ch in s.chars() {
            match ch {
                '&' => self.write_str("&amp;"),
                '<' => self.write_str("&lt;"),
                '>' => self.write_str("&gt;"),
                '"' => self.write_str("&quot;"),
                '\'' => self.write_str("&#39;"),
                _ => {
                    let mut tmp = [0u8; 4];
                    self.body.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
                }
            }
        }
    }

    pub fn redirect(&mut self, location: &str, status: Status) {
        self.status = status;
        self.headers.set("Location", location);
    }

    /// `Set-Cookie` for `name=value` expiring at `expiry` (Unix seconds).
    /// `secure` adds the `Secure` attribute.
    pub fn set_cookie(&mut self, name: &str, value: &str, expiry: i64, secure: bool) {
        let mut cookie = format!(
            "{}={}; Path=/; Expires={}; HttpOnly; SameSite=Strict",
            name,
            value,
            http_date(expiry)
        );
        if secure {
            cookie.push_str("; Secure");
        }
        self.headers.add("Set-Cookie", cookie);
    }

    pub fn delete_cookie(&mut self, name: &str) {
        self.headers.add(
            "Set-Cookie",
            format!("{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly", name),
        );
    }
}

/// Format `unix` seconds as an IMF-fixdate.
pub fn http_date(unix: i64) -> String {
    let mut buf = Vec::with_capacity(HTTP_DATE_LEN);
    put_http_date(&mut buf, unix);
    String::from_utf8(buf).unwrap_or_default()
}

/// Append the IMF-fixdate for `unix` to `buf`.
pub fn put_http_date(buf: &mut Vec<u8>, unix: i64) {
    let dt = DateTime::<Utc>::from_timestamp(unix, 0).unwrap_or_default();
    let _ = write!(buf, "{}", dt.format("%a, %d %b %Y %H:%M:%S GMT"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_date_is_fixed_width() {
        assert_eq!(http_date(784111777), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(http_date(0).len(), HTTP_DATE_LEN);
        assert_eq!(http_date(1_900_000_000).len(), HTTP_DATE_LEN);
    }

    #[test]
    fn headers_are_case_insensitive() {
        let mut h = Headers::new();
        h.add("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        h.set("CONTENT-TYPE", "text/html");
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("Content-Type"), Some("text/html"));
        h.remove("content-type");
        assert!(h.is_empty());
    }

    #[test]
    fn cookie_lookup() {
        let mut r = Request::default();
        r.headers.add("Cookie", "lang=ru; Token=abc-_123; other=1");
        assert_eq!(r.cookie("Token"), Some("abc-_123"));
        assert_eq!(r.cookie("lang"), Some("ru"));
        assert_eq!(r.cookie("missing"), None);
    }

    #[test]
    fn keep_alive_rules() {
        let mut r = Request::default();
        assert!(r.keep_alive());
        r.headers.set("Connection", "close");
        assert!(!r.keep_alive());
        r.headers.clear();
        r.version = Version::Http10;
        assert!(!r.keep_alive());
        r.headers.set("Connection", "Keep-Alive");
        assert!(r.keep_alive());
    }

    #[test]
    fn html_escaping() {
        let mut w = Response::default();
        w.write_html("<a href=\"x\">'&'</a>");
        assert_eq!(
            std::str::from_utf8(&w.body).unwrap(),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn cookies_and_redirect() {
        let mut w = Response::default();
        w.set_cookie("Token", "t", 0, true);
        w.delete_cookie("Token");
        w.redirect("/", Status::SEE_OTHER);
        let cookies: Vec<&str> = w.headers.iter().filter(|(k, _)| *k == "Set-Cookie").map(|(_, v)| v).collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("Token=t; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
        assert!(cookies[0].ends_with("; Secure"));
        assert!(cookies[1].contains("Max-Age=0"));
        assert_eq!(w.status, Status::SEE_OTHER);
        assert_eq!(w.headers.get("Location"), Some("/"));
    }

    #[test]
    fn status_classes() {
        assert!(Status::NOT_FOUND.is_client_error());
        assert!(!Status::NOT_FOUND.is_server_error());
        assert!(Status::SERVICE_UNAVAILABLE.is_server_error());
        assert_eq!(Status::SEE_OTHER.to_string(), "303 See Other");
    }
}
