//! `application/x-www-form-urlencoded` decoding.

use shortener_core::http::{Method, Request};
use shortener_core::router::HttpError;

/// Decoded form fields, query string first, then a POST body.
#[derive(Debug, Default)]
pub struct Form {
    fields: Vec<(String, String)>,
}

impl Form {
    pub fn parse(r: &Request) -> Result<Self, HttpError> {
        let mut form = Form::default();
        form.extend(r.query.as_bytes())?;
        if r.method == Method::Post {
            form.extend(&r.body)?;
        }
        Ok(form)
    }

    fn extend(&mut self, raw: &[u8]) -> Result<(), HttpError> {
        for pair in raw.split(|&b| b == b'&').filter(|p| !p.is_empty()) {
            let (k, v) = match pair.iter().position(|&b| b == b'=') {
                Some(eq) => (&pair[..eq], &pair[eq + 1..]),
                None => (pair, &b""[..]),
            };
            self.fields.push((decode(k)?, decode(v)?));
        }
        Ok(())
    }

    /// First value of `name`, or `""`.
    pub fn get(&self, name: &str) -> &str {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-decode with `+` as space.
pub fn decode(raw: &[u8]) -> Result<String, HttpError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let byte = raw
                    .get(i + 1..i + 3)
                    .and_then(|h| Some(hex(h[0])? << 4 | hex(h[1])?))
                    .ok_or_else(|| HttpError::bad_request("malformed percent-encoding in form"))?;
                out.push(byte);
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8(out).map_err(|_| HttpError::bad_request("form value is not valid UTF-8"))
}
