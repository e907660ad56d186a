//! Incremental HTTP/1.1 request parser.

use io_poll::Buffer;
use std::collections::HashMap;

const CRLF: &[u8] = b"\r\n";

/// Routes that map to a same-named `.html` page under the document root.
const DEFAULT_HTML: &[&str] = &[
    "/index",
    "/register",
    "/login",
    "/welcome",
    "/video",
    "/picture",
];

/// Outcome of feeding the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parse {
    /// A full request has been assembled.
    Complete,
    /// The input so far is a valid prefix; more bytes are needed.
    Incomplete,
    /// The request is malformed; respond 400 and close.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    RequestLine,
    Headers,
    Body,
    Finish,
}

/// A four-phase request parser: RequestLine -> Headers -> Body -> Finish.
///
/// State persists across [`Request::parse`] calls until the request
/// completes or fails; call [`Request::reset`] before reusing the parser
/// for the next request on a keep-alive connection.
pub struct Request {
    phase: Phase,
    method: String,
    path: String,
    version: String,
    body: Vec<u8>,
    content_length: usize,
    headers: HashMap<String, String>,
    form: HashMap<String, String>,
}

impl Request {
    pub fn new() -> Request {
        Request {
            phase: Phase::RequestLine,
            method: String::new(),
            path: String::new(),
            version: String::new(),
            body: Vec::new(),
            content_length: 0,
            headers: HashMap::new(),
            form: HashMap::new(),
        }
    }

    /// Reset to the initial state for the next request.
    pub fn reset(&mut self) {
        self.phase = Phase::RequestLine;
        self.method.clear();
        self.path.clear();
        self.version.clear();
        self.body.clear();
        self.content_length = 0;
        self.headers.clear();
        self.form.clear();
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rewrite the resolved path (used for login/register outcomes).
    pub fn set_path(&mut self, path: &str) {
        self.path.clear();
        self.path.push_str(path);
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_post(&self) -> bool {
        self.method == "POST"
    }

    /// Look up a decoded form field from an urlencoded POST body.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form.get(key).map(String::as_str)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True iff HTTP/1.1 and `Connection: keep-alive` (value compared
    /// case-insensitively).
    pub fn keep_alive(&self) -> bool {
        self.version == "1.1"
            && self
                .header("Connection")
                .is_some_and(|v| v.eq_ignore_ascii_case("keep-alive"))
    }

    /// Consume whatever the buffer holds, advancing the state machine.
    pub fn parse(&mut self, buf: &mut Buffer) -> Parse {
        loop {
            match self.phase {
                Phase::RequestLine => {
                    let line = match take_line(buf) {
                        Some(line) => line,
                        None => return Parse::Incomplete,
                    };
                    if !self.parse_request_line(&line) {
                        return Parse::Error;
                    }
                    self.normalize_path();
                    self.phase = Phase::Headers;
                }
                Phase::Headers => {
                    let line = match take_line(buf) {
                        Some(line) => line,
                        None => return Parse::Incomplete,
                    };
                    if line.is_empty() {
                        self.content_length = self
                            .header("Content-Length")
                            .and_then(|v| v.trim().parse().ok())
                            .unwrap_or(0);
                        self.phase = if self.is_post() && self.content_length > 0 {
                            Phase::Body
                        } else {
                            Phase::Finish
                        };
                        continue;
                    }
                    if !self.parse_header(&line) {
                        return Parse::Error;
                    }
                }
                Phase::Body => {
                    let need = self.content_length - self.body.len();
                    let take = need.min(buf.readable_len());
                    self.body.extend_from_slice(&buf.readable()[..take]);
                    buf.consume(take);
                    if self.body.len() < self.content_length {
                        return Parse::Incomplete;
                    }
                    self.parse_form();
                    self.phase = Phase::Finish;
                }
                Phase::Finish => return Parse::Complete,
            }
        }
    }

    /// `METHOD SP PATH SP HTTP/VERSION`
    fn parse_request_line(&mut self, line: &str) -> bool {
        let mut parts = line.split(' ');
        let (method, path, proto) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(m), Some(p), Some(v), None) => (m, p, v),
            _ => return false,
        };
        let version = match proto.strip_prefix("HTTP/") {
            Some(v) => v,
            None => return false,
        };
        if method.is_empty() || path.is_empty() || version.is_empty() {
            return false;
        }
        self.method = method.to_string();
        self.path = path.to_string();
        self.version = version.to_string();
        tracing::debug!(method = %self.method, path = %self.path, "request line");
        true
    }

    fn normalize_path(&mut self) {
        if self.path == "/" {
            self.path = "/index.html".to_string();
        } else if DEFAULT_HTML.contains(&self.path.as_str()) {
            self.path.push_str(".html");
        }
    }

    /// `Key: Value`
    fn parse_header(&mut self, line: &str) -> bool {
        match line.split_once(':') {
            Some((key, value)) => {
                self.headers
                    .insert(key.trim().to_string(), value.trim().to_string());
                true
            }
            None => false,
        }
    }

    fn parse_form(&mut self) {
        let urlencoded = self
            .header("Content-Type")
            .is_some_and(|v| v.eq_ignore_ascii_case("application/x-www-form-urlencoded"));
        if !urlencoded {
            return;
        }
        for pair in self.body.split(|&b| b == b'&') {
            let eq = pair.iter().position(|&b| b == b'=');
            let (key, value) = match eq {
                Some(i) => (&pair[..i], &pair[i + 1..]),
                None => continue,
            };
            self.form.insert(url_decode(key), url_decode(value));
        }
    }
}

impl Default for Request {
    fn default() -> Request {
        Request::new()
    }
}

/// Pop one CRLF-terminated line off the buffer, or `None` if no full line
/// has arrived yet.
fn take_line(buf: &mut Buffer) -> Option<String> {
    let readable = buf.readable();
    let pos = readable.windows(2).position(|w| w == CRLF)?;
    let line = String::from_utf8_lossy(&readable[..pos]).into_owned();
    buf.consume_until(pos + 2);
    Some(line)
}

/// Decode one urlencoded component: `+` becomes space, `%HH` becomes the
/// byte (upper and lower case hex both accepted).
fn url_decode(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                match (
                    bytes.get(i + 1).copied().and_then(hex_value),
                    bytes.get(i + 2).copied().and_then(hex_value),
                ) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi * 16 + lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(bytes: &[u8]) -> Buffer {
        let mut buf = Buffer::new();
        buf.append(bytes);
        buf
    }

    #[test]
    fn test_parse_simple_get() {
        let mut buf = buffer_with(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n");
        let mut req = Request::new();
        assert_eq!(req.parse(&mut buf), Parse::Complete);
        assert_eq!(req.method(), "GET");
        assert_eq!(req.path(), "/index.html");
        assert_eq!(req.version(), "1.1");
        assert_eq!(req.header("host"), Some("x"));
    }

    #[test]
    fn test_root_path_rewrites_to_index() {
        let mut buf = buffer_with(b"GET / HTTP/1.1\r\n\r\n");
        let mut req = Request::new();
        assert_eq!(req.parse(&mut buf), Parse::Complete);
        assert_eq!(req.path(), "/index.html");
    }

    #[test]
    fn test_known_routes_gain_html_suffix() {
        for (route, expected) in [
            ("/login", "/login.html"),
            ("/register", "/register.html"),
            ("/index", "/index.html"),
        ] {
            let raw = format!("GET {} HTTP/1.1\r\n\r\n", route);
            let mut buf = buffer_with(raw.as_bytes());
            let mut req = Request::new();
            assert_eq!(req.parse(&mut buf), Parse::Complete);
            assert_eq!(req.path(), expected);
        }
    }

    #[test]
    fn test_malformed_request_line_is_an_error() {
        for raw in [
            "GET/index.html HTTP/1.1\r\n\r\n",
            "GET /index.html\r\n\r\n",
            "GET /index.html SMTP/1.1\r\n\r\n",
            "GET /index.html HTTP/1.1 extra\r\n\r\n",
        ] {
            let mut buf = buffer_with(raw.as_bytes());
            let mut req = Request::new();
            assert_eq!(req.parse(&mut buf), Parse::Error, "input: {:?}", raw);
        }
    }

    #[test]
    fn test_partial_request_line_needs_more_input() {
        let mut buf = buffer_with(b"GET /index.h");
        let mut req = Request::new();
        assert_eq!(req.parse(&mut buf), Parse::Incomplete);

        buf.append(b"tml HTTP/1.1\r\n\r\n");
        assert_eq!(req.parse(&mut buf), Parse::Complete);
        assert_eq!(req.path(), "/index.html");
    }

    #[test]
    fn test_keep_alive_requires_version_and_header() {
        let mut buf = buffer_with(b"GET / HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\n");
        let mut req = Request::new();
        assert_eq!(req.parse(&mut buf), Parse::Complete);
        assert!(req.keep_alive());

        let mut buf = buffer_with(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        let mut req = Request::new();
        assert_eq!(req.parse(&mut buf), Parse::Complete);
        assert!(!req.keep_alive());

        let mut buf = buffer_with(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        let mut req = Request::new();
        assert_eq!(req.parse(&mut buf), Parse::Complete);
        assert!(!req.keep_alive());
    }

    #[test]
    fn test_post_body_decodes_form_fields() {
        let body = "username=alice&password=p%40ss+word";
        let raw = format!(
            "POST /login HTTP/1.1\r\nContent-Length: {}\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\r\n{}",
            body.len(),
            body
        );
        let mut buf = buffer_with(raw.as_bytes());
        let mut req = Request::new();
        assert_eq!(req.parse(&mut buf), Parse::Complete);
        assert_eq!(req.form_value("username"), Some("alice"));
        assert_eq!(req.form_value("password"), Some("p@ss word"));
    }

    #[test]
    fn test_hex_decoding_accepts_both_cases() {
        assert_eq!(url_decode(b"a%2Fb"), "a/b");
        assert_eq!(url_decode(b"a%2fb"), "a/b");
        assert_eq!(url_decode(b"100%25"), "100%");
    }

    #[test]
    fn test_truncated_percent_escape_passes_through() {
        assert_eq!(url_decode(b"abc%"), "abc%");
        assert_eq!(url_decode(b"abc%f"), "abc%f");
        assert_eq!(url_decode(b"abc%zz"), "abc%zz");
    }

    #[test]
    fn test_body_assembles_across_many_feeds() {
        // A large body fed in small chunks must produce exactly one request.
        let body: String = std::iter::repeat("x").take(1 << 20).collect();
        let payload = format!("username=bob&password={}", &body[..body.len() - 22]);
        let raw = format!(
            "POST /login HTTP/1.1\r\nContent-Length: {}\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\r\n{}",
            payload.len(),
            payload
        );
        let bytes = raw.as_bytes();

        let mut buf = Buffer::new();
        let mut req = Request::new();
        let mut completions = 0;
        for chunk in bytes.chunks(bytes.len() / 8 + 1) {
            buf.append(chunk);
            match req.parse(&mut buf) {
                Parse::Complete => completions += 1,
                Parse::Incomplete => {}
                Parse::Error => panic!("unexpected parse error"),
            }
        }
        assert_eq!(completions, 1);
        assert_eq!(req.form_value("username"), Some("bob"));
        assert_eq!(
            req.form_value("password").map(str::len),
            Some(payload.len() - 22)
        );
    }

    #[test]
    fn test_reset_clears_state_for_next_request() {
        let mut buf = buffer_with(b"GET /login HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        let mut req = Request::new();
        assert_eq!(req.parse(&mut buf), Parse::Complete);
        req.reset();

        buf.append(b"GET /welcome HTTP/1.1\r\n\r\n");
        assert_eq!(req.parse(&mut buf), Parse::Complete);
        assert_eq!(req.path(), "/welcome.html");
        assert!(!req.keep_alive());
    }
}
