//! Streaming `multipart/form-data` encoder.
//!
//! The main query travels as one part, each external table as a named part
//! with its own schema and format headers. Parts stream: a table body is
//! pulled chunk by chunk, never materialized.
use bytes::Bytes;
use futures_core::Stream;
use std::{
    collections::VecDeque,
    mem,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll, ready},
};

use crate::{Result, manager::Manager, transport::BoxBodyStream};

pub(crate) enum PartBody {
    Full(Bytes),
    Stream(BoxBodyStream),
}

/// One named part.
pub(crate) struct Part {
    name: String,
    filename: Option<String>,
    headers: Vec<(String, String)>,
    body: PartBody,
}

impl Part {
    pub(crate) fn new(name: impl Into<String>, body: PartBody) -> Part {
        Part {
            name: name.into(),
            filename: None,
            headers: Vec::new(),
            body,
        }
    }

    pub(crate) fn filename(mut self, filename: impl Into<String>) -> Part {
        self.filename = Some(filename.into());
        self
    }

    pub(crate) fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Part {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn render_head(&self, boundary: &str) -> String {
        let mut out = String::with_capacity(128);
        out.push_str("--");
        out.push_str(boundary);
        out.push_str("\r\nContent-Disposition: form-data; name=\"");
        out.push_str(&self.name);
        out.push('"');
        if let Some(filename) = &self.filename {
            out.push_str("; filename=\"");
            out.push_str(filename);
            out.push('"');
        }
        out.push_str("\r\n");
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

/// Generate a boundary no payload will contain by accident.
pub(crate) fn boundary() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(1);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("----colonna-{:08x}-{seq:04x}", Manager::global().tag() as u32)
}

enum Phase {
    /// Next part head, or the closing boundary.
    Next,
    Body(PartBody),
    /// Part body done, terminate it before the next boundary.
    BodyEnd,
    Done,
}

/// The whole multipart body as one chunked stream.
pub(crate) struct MultipartStream {
    boundary: String,
    parts: VecDeque<Part>,
    state: Phase,
}

impl MultipartStream {
    pub(crate) fn new(boundary: String, parts: Vec<Part>) -> MultipartStream {
        MultipartStream {
            boundary,
            parts: parts.into(),
            state: Phase::Next,
        }
    }
}

impl Stream for MultipartStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();

        loop {
            match &mut me.state {
                Phase::Next => match me.parts.pop_front() {
                    Some(part) => {
                        let head = part.render_head(&me.boundary);
                        me.state = Phase::Body(part.body);
                        return Poll::Ready(Some(Ok(head.into())));
                    },
                    None => {
                        me.state = Phase::Done;
                        let close = format!("--{}--\r\n", me.boundary);
                        return Poll::Ready(Some(Ok(close.into())));
                    },
                },
                Phase::Body(PartBody::Full(bytes)) => {
                    let bytes = mem::take(bytes);
                    me.state = Phase::BodyEnd;
                    if bytes.is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(bytes)));
                },
                Phase::Body(PartBody::Stream(stream)) => {
                    match ready!(stream.as_mut().poll_next(cx)) {
                        Some(Ok(chunk)) => return Poll::Ready(Some(Ok(chunk))),
                        Some(Err(err)) => {
                            me.state = Phase::Done;
                            return Poll::Ready(Some(Err(err)));
                        },
                        None => me.state = Phase::BodyEnd,
                    }
                },
                Phase::BodyEnd => {
                    me.state = Phase::Next;
                    return Poll::Ready(Some(Ok(Bytes::from_static(b"\r\n"))));
                },
                Phase::Done => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::task::Waker;

    fn drain(mut stream: MultipartStream) -> Vec<u8> {
        let mut cx = Context::from_waker(Waker::noop());
        let mut out = Vec::new();
        loop {
            match Pin::new(&mut stream).poll_next(&mut cx) {
                Poll::Ready(Some(Ok(chunk))) => out.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(err))) => panic!("{err}"),
                Poll::Ready(None) => return out,
                Poll::Pending => panic!("in memory parts never pend"),
            }
        }
    }

    #[test]
    fn layout() {
        let parts = vec![
            Part::new("query", PartBody::Full(Bytes::from_static(b"select 1"))),
            Part::new("x", PartBody::Full(Bytes::from_static(b"1,23\n4,56")))
                .filename("x")
                .header("x-columnar-structure", "i Int32, s String"),
        ];
        let body = drain(MultipartStream::new("b0".into(), parts));
        let text = std::str::from_utf8(&body).unwrap();

        assert!(text.starts_with("--b0\r\nContent-Disposition: form-data; name=\"query\"\r\n\r\nselect 1\r\n"));
        assert!(text.contains("name=\"x\"; filename=\"x\"\r\nx-columnar-structure: i Int32, s String\r\n\r\n1,23\n4,56\r\n"));
        assert!(text.ends_with("--b0--\r\n"));
    }

    #[test]
    fn empty_part_body() {
        let parts = vec![Part::new("query", PartBody::Full(Bytes::new()))];
        let body = drain(MultipartStream::new("b1".into(), parts));
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.contains("name=\"query\"\r\n\r\n\r\n--b1--\r\n"));
    }
}
