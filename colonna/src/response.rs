//! The [`Response`] type and its record stream.
use futures_core::Stream;
use serde::Deserialize;
use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use crate::{
    Error, Result,
    compress::{Decompressor, Method},
    format::Format,
    http::{self, Headers, ServerError},
    record::Record,
    rowbinary::RowReader,
    transport::{BodyStream, ResponsePayload},
};

/// Post execution metadata: rows read and written, elapsed time.
///
/// Definitive only after the response is fully consumed or closed. A server
/// that sent no metadata yields zero valued defaults.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Summary {
    #[serde(deserialize_with = "de_u64")]
    read_rows: u64,
    #[serde(deserialize_with = "de_u64")]
    read_bytes: u64,
    #[serde(deserialize_with = "de_u64")]
    written_rows: u64,
    #[serde(deserialize_with = "de_u64")]
    written_bytes: u64,
    #[serde(deserialize_with = "de_u64")]
    total_rows_to_read: u64,
    #[serde(deserialize_with = "de_u64")]
    elapsed_ns: u64,
}

impl Summary {
    pub fn read_rows(&self) -> u64 {
        self.read_rows
    }

    pub fn read_bytes(&self) -> u64 {
        self.read_bytes
    }

    pub fn written_rows(&self) -> u64 {
        self.written_rows
    }

    pub fn written_bytes(&self) -> u64 {
        self.written_bytes
    }

    pub fn total_rows_to_read(&self) -> u64 {
        self.total_rows_to_read
    }

    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed_ns
    }

    /// Progress reports are cumulative, keep the furthest one.
    fn update(&mut self, other: Summary) {
        self.read_rows = self.read_rows.max(other.read_rows);
        self.read_bytes = self.read_bytes.max(other.read_bytes);
        self.written_rows = self.written_rows.max(other.written_rows);
        self.written_bytes = self.written_bytes.max(other.written_bytes);
        self.total_rows_to_read = self.total_rows_to_read.max(other.total_rows_to_read);
        self.elapsed_ns = self.elapsed_ns.max(other.elapsed_ns);
    }
}

/// The server reports counters as json strings, tolerate both shapes.
fn de_u64<'de, D: serde::Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    struct V;

    impl serde::de::Visitor<'_> for V {
        type Value = u64;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("an integer or a string holding one")
        }

        fn visit_u64<E>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<u64, E> {
            v.parse().map_err(E::custom)
        }
    }

    de.deserialize_any(V)
}

fn parse_summary(headers: &Headers) -> Summary {
    let mut summary = Summary::default();
    for value in headers.get_all(http::HEADER_PROGRESS) {
        if let Ok(progress) = serde_json::from_str(value) {
            summary.update(progress);
        }
    }
    if let Some(value) = headers.get(http::HEADER_SUMMARY) {
        if let Ok(done) = serde_json::from_str(value) {
            summary.update(done);
        }
    }
    summary
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Exhausted,
    Errored,
    Closed,
}

/// A streaming query response.
///
/// Owns the underlying connection until closed. Records are produced one at
/// a time on demand; the sequence is finite, forward only, and single pass.
/// Closing at any point, explicitly or by drop, releases the connection,
/// aborting a download still in flight rather than draining it.
#[derive(Debug)]
pub struct Response {
    phase: Phase,
    eof: bool,
    body: Option<BodyStream>,
    decomp: Option<Decompressor>,
    reader: RowReader,
    summary: Summary,
}

impl Response {
    /// Inspect status and headers, turning a non success status into the
    /// server reported error.
    pub(crate) async fn open(payload: ResponsePayload, format: Format) -> Result<Response> {
        let ResponsePayload { status, headers, mut body } = payload;

        let encoding = match headers.get("content-encoding") {
            Some(name) => match Method::parse(name) {
                Some(method) => method,
                None => return Err(Error::stream(format!("unknown content-encoding {name:?}"))),
            },
            None => Method::None,
        };

        if !(200..300).contains(&status) {
            let code = headers
                .get(http::HEADER_EXCEPTION_CODE)
                .and_then(|v| v.parse().ok());
            // error bodies are small, read them whole
            let raw = body.collect().await?;
            let text = match encoding {
                Method::None => raw,
                method => {
                    let mut decomp = Decompressor::new(method)?;
                    let mut out = bytes::BytesMut::new();
                    out.extend_from_slice(&decomp.feed(&raw)?);
                    out.extend_from_slice(&decomp.finish()?);
                    out.freeze()
                },
            };
            return Err(ServerError::from_body(&text, code).into());
        }

        let decomp = match encoding {
            Method::None => None,
            method => Some(Decompressor::new(method)?),
        };

        Ok(Response {
            phase: Phase::Streaming,
            eof: false,
            body: Some(body),
            decomp,
            reader: RowReader::new(format),
            summary: parse_summary(&headers),
        })
    }

    /// The lazy record sequence.
    ///
    /// The sequence is single pass: asking again after exhaustion yields an
    /// error, not a restart.
    pub fn records(&mut self) -> Records<'_> {
        let stale = self.phase != Phase::Streaming;
        Records { response: self, stale }
    }

    /// Pull the next record.
    pub async fn next_record(&mut self) -> Result<Option<Record>> {
        std::future::poll_fn(|cx| self.poll_next_record(cx)).await
    }

    /// Pull the first record of a response expected to have one.
    pub async fn first_record(&mut self) -> Result<Record> {
        match self.next_record().await? {
            Some(record) => Ok(record),
            None => Err(Error::stream("response produced no records")),
        }
    }

    /// Drain the remaining records, keeping only the summary.
    pub async fn finish(&mut self) -> Result<Summary> {
        while self.next_record().await?.is_some() { }
        Ok(self.summary.clone())
    }

    /// Rows read and written as reported by the server.
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Release the underlying connection.
    ///
    /// A download still in flight is aborted, not drained. Closing twice is
    /// a no-op.
    pub fn close(&mut self) {
        self.body = None;
        self.decomp = None;
        if self.phase == Phase::Streaming {
            self.phase = Phase::Closed;
        }
    }

    fn poll_next_record(&mut self, cx: &mut Context) -> Poll<Result<Option<Record>>> {
        loop {
            match self.phase {
                Phase::Exhausted => {
                    return Poll::Ready(Err(Error::stream("response stream already consumed")));
                },
                Phase::Errored => {
                    return Poll::Ready(Err(Error::stream("response stream already failed")));
                },
                Phase::Closed => {
                    return Poll::Ready(Err(Error::stream("response already closed")));
                },
                Phase::Streaming => {},
            }

            // at a record boundary, bytes shaped like the embedded error
            // marker defer row parsing until the stream tail settles
            // whether they are the marker or data
            let candidate = {
                let remaining = self.reader.remaining();
                !remaining.is_empty() && http::marker_candidate(remaining)
            };

            if candidate && self.eof {
                if ServerError::from_marker(self.reader.remaining()).is_some() {
                    let err = Error::stream("error marker embedded in stream");
                    // fail() turns the marker into the server error
                    return Poll::Ready(Err(self.fail(err)));
                }
            }

            if !candidate || self.eof {
                match self.reader.try_next() {
                    Ok(Some(record)) => return Poll::Ready(Ok(Some(record))),
                    Ok(None) => {},
                    Err(err) => return Poll::Ready(Err(self.fail(err))),
                }
            }

            if self.eof {
                let remaining = self.reader.remaining();
                if remaining.is_empty() {
                    self.phase = Phase::Exhausted;
                    return Poll::Ready(Ok(None));
                }
                let err = Error::stream("trailing bytes after the last record");
                return Poll::Ready(Err(self.fail(err)));
            }

            let Some(body) = self.body.as_mut() else {
                self.eof = true;
                continue;
            };

            match ready!(body.poll_chunk(cx)) {
                Ok(Some(chunk)) => match &mut self.decomp {
                    Some(decomp) => match decomp.feed(&chunk) {
                        Ok(out) => self.reader.push(&out),
                        Err(err) => return Poll::Ready(Err(self.fail(err.into()))),
                    },
                    None => self.reader.push(&chunk),
                },
                Ok(None) => {
                    // body fully delivered, flush the codec tail
                    self.body = None;
                    self.eof = true;
                    if let Some(decomp) = self.decomp.take() {
                        match decomp.finish() {
                            Ok(out) => self.reader.push(&out),
                            Err(err) => return Poll::Ready(Err(self.fail(err.into()))),
                        }
                    }
                },
                Err(err) => return Poll::Ready(Err(self.fail(err))),
            }
        }
    }

    /// Terminal failure: the connection is dropped, never pooled, and a
    /// trailing error marker takes precedence over the parse failure it
    /// caused.
    fn fail(&mut self, err: Error) -> Error {
        self.phase = Phase::Errored;
        self.body = None;
        self.decomp = None;
        match ServerError::from_marker(self.reader.remaining()) {
            Some(server) => server.into(),
            None => err,
        }
    }
}

/// [`Stream`] over a [`Response`], see [`Response::records`].
#[derive(Debug)]
#[must_use = "streams do nothing unless polled"]
pub struct Records<'r> {
    response: &'r mut Response,
    /// Created on an already terminal response: a second iteration attempt,
    /// which fails instead of restarting.
    stale: bool,
}

impl Stream for Records<'_> {
    type Item = Result<Record>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();

        if !me.stale && me.response.phase == Phase::Exhausted {
            // this pass reached the natural end
            return Poll::Ready(None);
        }
        me.stale = false;

        match ready!(me.response.poll_next_record(cx)) {
            Ok(Some(record)) => Poll::Ready(Some(Ok(record))),
            Ok(None) => Poll::Ready(None),
            Err(err) => Poll::Ready(Some(Err(err))),
        }
    }
}
