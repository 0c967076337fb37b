//! Http wire layer of the database protocol.
//!
//! Request heads, response heads and the header names the server and client
//! agree on. Transport backends only move these around, the layout is fixed
//! here so backends cannot drift apart.
use bytes::BytesMut;
use std::{borrow::Cow, fmt};

use crate::{
    common::ByteStr,
    ext::{FmtExt, HeaderExt},
};

pub(crate) mod multipart;
#[cfg(feature = "tokio")]
pub(crate) mod tcp;

/// Summary json sent once the query finished.
pub(crate) const HEADER_SUMMARY: &str = "x-columnar-summary";
/// Progress json sent while the query is running.
pub(crate) const HEADER_PROGRESS: &str = "x-columnar-progress";
/// Numeric server error code accompanying an error body.
pub(crate) const HEADER_EXCEPTION_CODE: &str = "x-columnar-exception-code";
/// Client identification.
pub(crate) const HEADER_CLIENT_NAME: &str = "x-columnar-client";
/// Column schema declaration of a multipart external table part.
pub(crate) const HEADER_STRUCTURE: &str = "x-columnar-structure";
/// Payload format declaration of a multipart external table part.
pub(crate) const HEADER_FORMAT: &str = "x-columnar-format";

pub(crate) const CLIENT_NAME: &str = concat!("colonna/", env!("CARGO_PKG_VERSION"));

/// Request target under construction: path plus query string.
#[derive(Debug)]
pub(crate) struct Target {
    out: String,
    has_query: bool,
}

impl Target {
    /// `context` is a normalized web context, see [`Node::context`][crate::node::Node::context].
    pub(crate) fn new(context: &str) -> Target {
        let mut out = String::with_capacity(64);
        out.push('/');
        out.push_str(context);
        Target { out, has_query: false }
    }

    /// Append one path segment, no separator handling.
    pub(crate) fn push_path(&mut self, segment: &str) {
        debug_assert!(!self.has_query);
        self.out.push_str(segment);
    }

    /// Append one query string parameter, percent encoded.
    pub(crate) fn param(&mut self, name: &str, value: &str) {
        self.out.push(if self.has_query { '&' } else { '?' });
        self.has_query = true;
        percent_encode_into(&mut self.out, name);
        self.out.push('=');
        percent_encode_into(&mut self.out, value);
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

/// Percent encode `value` into `out`, keeping rfc3986 unreserved bytes.
pub(crate) fn percent_encode_into(out: &mut String, value: &str) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for &b in value.as_bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            },
            _ => {
                out.push('%');
                out.push(HEX[(b >> 4) as usize] as char);
                out.push(HEX[(b & 0xf) as usize] as char);
            },
        }
    }
}

/// An outgoing request head, transport agnostic.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub(crate) method: &'static str,
    pub(crate) target: String,
    pub(crate) headers: Vec<(ByteStr, ByteStr)>,
}

impl RequestHead {
    pub(crate) fn new(method: &'static str, target: String) -> RequestHead {
        RequestHead { method, target, headers: Vec::new() }
    }

    pub(crate) fn header(&mut self, name: impl Into<ByteStr>, value: impl Into<ByteStr>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Returns `true` if a header with `name` is already set.
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.header_eq(name))
    }
}

/// Response headers with case insensitive lookup.
#[derive(Debug, Default)]
pub(crate) struct Headers {
    entries: Vec<(ByteStr, ByteStr)>,
}

impl Headers {
    pub(crate) fn push(&mut self, name: ByteStr, value: ByteStr) {
        self.entries.push((name, value));
    }

    pub(crate) fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.header_eq(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for repeated headers, in arrival order.
    pub(crate) fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.header_eq(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed response status line and headers.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub(crate) status: u16,
    pub(crate) headers: Headers,
}

impl ResponseHead {
    /// Try to parse a complete head from `buf`.
    ///
    /// Returns `None` when the terminating blank line did not arrive yet.
    /// Consumes the head bytes from `buf` on success.
    pub(crate) fn parse(buf: &mut BytesMut) -> Result<Option<ResponseHead>, ProtocolError> {
        let Some(end) = find_head_end(buf) else {
            return Ok(None);
        };

        let head = ByteStr::from_utf8(buf.split_to(end + 4).freeze())
            .map_err(|_| ProtocolError { reason: "non ascii response head".into() })?;

        let mut lines = head.as_str().split("\r\n");
        let status_line = lines.next().unwrap_or("");

        // "HTTP/1.1 200 OK"
        let mut it = status_line.splitn(3, ' ');
        let version = it.next().unwrap_or("");
        if !version.starts_with("HTTP/1.") {
            return Err(ProtocolError { reason: "not an http response".into() });
        }
        let status = it
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(ProtocolError { reason: "malformed status line".into() })?;

        let mut headers = Headers::default();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(ProtocolError { reason: "malformed header line".into() });
            };
            headers.push(head.slice_ref(name), head.slice_ref(value.trim_ascii()));
        }

        Ok(Some(ResponseHead { status, headers }))
    }

    pub(crate) fn content_length(&self) -> Result<Option<u64>, ProtocolError> {
        match self.headers.get("content-length") {
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| ProtocolError { reason: "malformed content-length".into() }),
            None => Ok(None),
        }
    }

    pub(crate) fn is_chunked(&self) -> bool {
        self.headers
            .get("transfer-encoding")
            .is_some_and(|v| v.header_eq("chunked"))
    }

    pub(crate) fn keep_alive(&self) -> bool {
        !self
            .headers
            .get("connection")
            .is_some_and(|v| v.header_eq("close"))
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// An error reported by the server.
///
/// Either a non success status carrying an error body, or the
/// `Code: N. DB::Exception:` marker embedded at the tail of an otherwise
/// successful stream.
pub struct ServerError {
    pub(crate) code: Option<i32>,
    pub(crate) message: String,
}

impl ServerError {
    /// Numeric server error code, when the server provided one.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Build from an error body, preferring the code from the marker text,
    /// falling back to `header_code`.
    pub(crate) fn from_body(body: &[u8], header_code: Option<i32>) -> ServerError {
        let message = body.lossy().to_string().trim().to_string();
        let code = parse_marker_code(&message).or(header_code);
        ServerError { code, message }
    }

    /// Detect the embedded error marker at the tail of a success stream.
    pub(crate) fn from_marker(tail: &[u8]) -> Option<ServerError> {
        let text = std::str::from_utf8(tail).ok()?;
        let text = text.trim_start_matches(['\r', '\n']);
        let code = parse_marker_code(text)?;
        Some(ServerError { code: Some(code), message: text.trim_end().to_string() })
    }
}

/// Returns `true` if `tail` could be the beginning of the embedded error
/// marker. Used at record boundaries to defer row parsing until the rest
/// of the stream settles the question.
pub(crate) fn marker_candidate(tail: &[u8]) -> bool {
    const PREFIX: &[u8] = b"Code: ";
    let mut tail = tail;
    while let [b'\r' | b'\n', rest @ ..] = tail {
        tail = rest;
    }
    let len = tail.len().min(PREFIX.len());
    &tail[..len] == &PREFIX[..len]
}

fn parse_marker_code(text: &str) -> Option<i32> {
    let rest = text.strip_prefix("Code: ")?;
    let digits = rest.split('.').next()?;
    let code = digits.parse().ok()?;
    rest.contains("DB::Exception:").then_some(code)
}

impl std::error::Error for ServerError { }

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "server error {code}: {}", self.message),
            None => write!(f, "server error: {}", self.message),
        }
    }
}

impl fmt::Debug for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Response violates the http framing the protocol expects.
pub struct ProtocolError {
    pub(crate) reason: Cow<'static, str>,
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol violation: {}", self.reason)
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
