use std::collections::HashMap;
use std::fmt;

use memchr::memchr;

use crate::buffer::Buffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsingState {
    RequestLine,
    Headers,
    Body,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    MalformedRequestLine,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
        }
    }
}

impl std::error::Error for ParseError {}

/// One in-flight HTTP request on a connection. Reinitialized at the start of
/// every request on a kept-alive connection, so the parser never carries
/// state across requests.
#[derive(Debug)]
pub struct Request {
    pub state: ParsingState,
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub form: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    pub fn new() -> Self {
        Self {
            state: ParsingState::RequestLine,
            method: String::new(),
            path: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            form: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Resets all fields to their initial values, for reuse on the next
    /// request of a keep-alive connection.
    pub fn reset(&mut self) {
        self.state = ParsingState::RequestLine;
        self.method.clear();
        self.path.clear();
        self.version.clear();
        self.headers.clear();
        self.form.clear();
        self.body.clear();
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParsingState::Finish
    }

    pub fn keep_alive(&self) -> bool {
        self.version == "HTTP/1.1"
            && self
                .headers
                .get("Connection")
                .map(|v| v.eq_ignore_ascii_case("keep-alive"))
                .unwrap_or(false)
    }

    pub fn is_cgi(&self) -> bool {
        self.path.starts_with("/cgi-bin/")
    }

    /// Consumes as many complete lines as the buffer holds, advancing
    /// `state` through REQUEST_LINE -> HEADERS -> BODY -> FINISH. Returns
    /// `false` only when the buffer was empty on entry or the request line
    /// was malformed; the caller turns that into a 400 response. Otherwise
    /// returns `true`, possibly without reaching FINISH yet (more bytes are
    /// expected on a future call).
    pub fn parse(&mut self, buf: &mut Buffer) -> bool {
        if buf.is_empty() {
            return false;
        }

        loop {
            match self.state {
                ParsingState::RequestLine => {
                    let Some(line) = take_line(buf) else { return true };
                    match self.parse_request_line(&line) {
                        Some(()) => self.state = ParsingState::Headers,
                        None => return false,
                    }
                }
                ParsingState::Headers => {
                    let Some(line) = take_line(buf) else { return true };
                    if line.is_empty() {
                        self.state = ParsingState::Body;
                    } else if let Some((key, value)) = split_header(&line) {
                        self.headers.insert(key, value);
                    }
                }
                ParsingState::Body => {
                    let line = take_body_line(buf);
                    self.body = line;
                    if self.method == "POST"
                        && self
                            .headers
                            .get("Content-Type")
                            .map(|v| v == "application/x-www-form-urlencoded")
                            .unwrap_or(false)
                    {
                        self.parse_form_body();
                    }
                    self.state = ParsingState::Finish;
                }
                ParsingState::Finish => return true,
            }

            if !matches!(self.state, ParsingState::Finish) && buf.is_empty() {
                return true;
            }
            if self.state == ParsingState::Finish {
                return true;
            }
        }
    }

    fn parse_request_line(&mut self, line: &[u8]) -> Option<()> {
        let line = std::str::from_utf8(line).ok()?;
        let mut parts = line.splitn(3, ' ');
        let method = parts.next()?;
        let path = parts.next()?;
        let version = parts.next()?;
        if method.is_empty() || path.is_empty() || !version.starts_with("HTTP/") {
            return None;
        }
        self.method = method.to_string();
        self.path = canonicalize_path(path);
        self.version = version.to_string();
        Some(())
    }

    /// No URL-decoding: a deliberate simplification carried from the
    /// original implementation.
    fn parse_form_body(&mut self) {
        let body = String::from_utf8_lossy(&self.body);
        for pair in body.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                self.form.insert(k.to_string(), v.to_string());
            }
        }
    }
}

fn canonicalize_path(path: &str) -> String {
    match path {
        "/" => "/index.html".to_string(),
        "/index" => "/index.html".to_string(),
        other => other.to_string(),
    }
}

/// Single-space trim after the colon, per the simplified header grammar;
/// keys are kept exactly as received (no case normalization).
fn split_header(line: &[u8]) -> Option<(String, String)> {
    let colon = memchr(b':', line)?;
    let key = String::from_utf8_lossy(&line[..colon]).into_owned();
    let mut rest = &line[colon + 1..];
    if rest.first() == Some(&b' ') {
        rest = &rest[1..];
    }
    let value = String::from_utf8_lossy(rest).into_owned();
    Some((key, value))
}

/// Consumes the body "line": up to the next CRLF if one is buffered,
/// otherwise everything currently readable. Bodies in this simplified
/// server arrive without a trailing terminator, so the common case is the
/// latter.
fn take_body_line(buf: &mut Buffer) -> Vec<u8> {
    let slice = buf.as_slice();
    match memchr(b'\n', slice) {
        Some(nl) => {
            let mut end = nl;
            if end > 0 && slice[end - 1] == b'\r' {
                end -= 1;
            }
            let line = slice[..end].to_vec();
            buf.advance_read(nl + 1);
            line
        }
        None => {
            let line = slice.to_vec();
            buf.advance_read(line.len());
            line
        }
    }
}

/// Removes and returns one CRLF-terminated line from the front of `buf`,
/// without the terminator. Returns `None` if no full line is buffered yet.
fn take_line(buf: &mut Buffer) -> Option<Vec<u8>> {
    let slice = buf.as_slice();
    let nl = memchr(b'\n', slice)?;
    let mut end = nl;
    if end > 0 && slice[end - 1] == b'\r' {
        end -= 1;
    }
    let line = slice[..end].to_vec();
    buf.advance_read(nl + 1);
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(raw: &[u8]) -> Request {
        let mut buf = Buffer::with_capacity(64);
        buf.append(raw);
        let mut req = Request::new();
        req.parse(&mut buf);
        req
    }

    #[test]
    fn parses_simple_get() {
        let req = parse_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.version, "HTTP/1.1");
        assert!(req.is_finished());
    }

    #[test]
    fn rejects_malformed_request_line() {
        let mut buf = Buffer::with_capacity(64);
        buf.append(b"FOO\r\n\r\n");
        let mut req = Request::new();
        assert!(!req.parse(&mut buf));
    }

    #[test]
    fn keep_alive_requires_1_1_and_header() {
        let req = parse_all(b"GET /a HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        assert!(req.keep_alive());

        let req = parse_all(b"GET /a HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        assert!(!req.keep_alive());
    }

    #[test]
    fn duplicate_headers_overwrite() {
        let req = parse_all(b"GET / HTTP/1.1\r\nX-A: first\r\nX-A: second\r\n\r\n");
        assert_eq!(req.headers.get("X-A"), Some(&"second".to_string()));
    }

    #[test]
    fn post_form_body_parsed_without_url_decoding() {
        let req = parse_all(
            b"POST /cgi-bin/echo.py HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 5\r\n\r\nx=abc",
        );
        assert_eq!(req.form.get("x"), Some(&"abc".to_string()));
        assert!(req.is_cgi());
    }

    #[test]
    fn lowercase_connection_header_does_not_match() {
        let req = parse_all(b"GET /a HTTP/1.1\r\nconnection: keep-alive\r\n\r\n");
        assert!(!req.keep_alive());
    }
}
