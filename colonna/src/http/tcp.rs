//! Buffered http connection over [`TcpStream`].
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_core::Stream;
use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf},
    net::TcpStream,
};

use super::{ProtocolError, RequestHead, ResponseHead};
use crate::{
    Error, Result,
    common::trace,
    node::{Node, Scheme},
    pool,
    transport::RequestBody,
};

/// One http connection with its read and write buffers.
#[derive(Debug)]
pub(crate) struct TcpTransport {
    socket: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    read_size: usize,
}

impl TcpTransport {
    pub(crate) async fn connect(
        node: &Node,
        timeout: Duration,
        read_size: usize,
    ) -> Result<TcpTransport> {
        if node.scheme() == Scheme::Https {
            return Err(Error::config(
                "tcp backend is plain http, https requires the reqwest backend",
            ));
        }

        let connect = TcpStream::connect((node.host(), node.port()));
        let socket = match tokio::time::timeout(timeout, connect).await {
            Ok(ok) => ok?,
            Err(_) => return Err(Error::timeout("connect")),
        };
        socket.set_nodelay(true)?;

        trace!("connected to {node}");

        Ok(TcpTransport {
            socket,
            read_buf: BytesMut::with_capacity(read_size),
            write_buf: BytesMut::with_capacity(1024),
            read_size,
        })
    }

    /// Write the request head and stream the body out.
    ///
    /// A streamed body goes out with chunked transfer coding, so its total
    /// size is never required upfront.
    pub(crate) async fn send(
        &mut self,
        head: &RequestHead,
        host: &str,
        body: RequestBody,
    ) -> Result<()> {
        let buf = &mut self.write_buf;
        buf.clear();
        buf.extend_from_slice(head.method.as_bytes());
        buf.put_u8(b' ');
        buf.extend_from_slice(head.target.as_bytes());
        buf.extend_from_slice(b" HTTP/1.1\r\nHost: ");
        buf.extend_from_slice(host.as_bytes());
        buf.extend_from_slice(b"\r\n");

        for (name, value) in &head.headers {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        match &body {
            RequestBody::Empty => buf.extend_from_slice(b"Content-Length: 0\r\n\r\n"),
            RequestBody::Full(bytes) => {
                buf.extend_from_slice(b"Content-Length: ");
                let mut len = itoa::Buffer::new();
                buf.extend_from_slice(len.format(bytes.len()).as_bytes());
                buf.extend_from_slice(b"\r\n\r\n");
            },
            RequestBody::Stream(_) => {
                buf.extend_from_slice(b"Transfer-Encoding: chunked\r\n\r\n")
            },
        }

        self.socket.write_all_buf(buf).await?;

        match body {
            RequestBody::Empty => {},
            RequestBody::Full(bytes) => self.socket.write_all(&bytes).await?,
            RequestBody::Stream(mut stream) => {
                loop {
                    let next = std::future::poll_fn(|cx| stream.as_mut().poll_next(cx)).await;
                    match next {
                        Some(chunk) => {
                            let chunk = chunk?;
                            if chunk.is_empty() {
                                // a zero sized chunk would terminate the coding
                                continue;
                            }
                            let frame = format!("{:x}\r\n", chunk.len());
                            self.socket.write_all(frame.as_bytes()).await?;
                            self.socket.write_all(&chunk).await?;
                            self.socket.write_all(b"\r\n").await?;
                        },
                        None => {
                            self.socket.write_all(b"0\r\n\r\n").await?;
                            break;
                        },
                    }
                }
            },
        }

        self.socket.flush().await?;
        Ok(())
    }

    /// Read until a complete response head is buffered.
    pub(crate) async fn read_head(&mut self) -> Result<ResponseHead> {
        loop {
            if let Some(head) = ResponseHead::parse(&mut self.read_buf)? {
                return Ok(head);
            }
            self.read_buf.reserve(self.read_size);
            if self.socket.read_buf(&mut self.read_buf).await? == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
        }
    }

    /// Poll one read into the buffer, returns the number of bytes read.
    fn poll_fill(&mut self, cx: &mut Context) -> Poll<io::Result<usize>> {
        self.read_buf.reserve(self.read_size);

        let n = {
            let dst = self.read_buf.chunk_mut();
            let dst = unsafe { dst.as_uninit_slice_mut() };
            let mut buf = ReadBuf::uninit(dst);
            let ptr = buf.filled().as_ptr();
            ready!(Pin::new(&mut self.socket).poll_read(cx, &mut buf)?);

            // Ensure the pointer does not change from under us
            assert_eq!(ptr, buf.filled().as_ptr());
            buf.filled().len()
        };

        // Safety: This is guaranteed to be the number of initialized (and read)
        // bytes due to the invariants provided by `ReadBuf::filled`.
        unsafe {
            self.read_buf.advance_mut(n);
        }

        Poll::Ready(Ok(n))
    }
}

/// How the response body ends.
#[derive(Debug)]
enum Framing {
    Length(u64),
    Chunked(Chunk),
    /// Delimited by connection close.
    Eof,
}

#[derive(Debug)]
enum Chunk {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
}

/// The response body of one exchange, pulled chunk by chunk.
///
/// Fully draining the body hands the connection back to the pool when the
/// exchange allows reuse. Dropping the body early closes the socket instead,
/// aborting the remaining download.
#[derive(Debug)]
pub(crate) struct TcpBody {
    transport: Option<TcpTransport>,
    pool: Option<pool::Handle>,
    framing: Framing,
    keep_alive: bool,
}

impl TcpBody {
    pub(crate) fn new(
        transport: TcpTransport,
        head: &ResponseHead,
        pool: Option<pool::Handle>,
    ) -> Result<TcpBody> {
        let framing = if head.is_chunked() {
            Framing::Chunked(Chunk::Size)
        } else if let Some(n) = head.content_length()? {
            Framing::Length(n)
        } else {
            Framing::Eof
        };

        Ok(TcpBody {
            keep_alive: head.keep_alive() && !matches!(framing, Framing::Eof),
            transport: Some(transport),
            pool,
            framing,
        })
    }

    pub(crate) fn poll_chunk(&mut self, cx: &mut Context) -> Poll<Result<Option<Bytes>>> {
        loop {
            let Some(transport) = self.transport.as_mut() else {
                return Poll::Ready(Ok(None));
            };

            match &mut self.framing {
                Framing::Length(0) => {
                    self.release();
                    return Poll::Ready(Ok(None));
                },
                Framing::Length(rem) => {
                    if !transport.read_buf.is_empty() {
                        let take = (*rem).min(transport.read_buf.len() as u64) as usize;
                        *rem -= take as u64;
                        return Poll::Ready(Ok(Some(transport.read_buf.split_to(take).freeze())));
                    }
                    if ready!(transport.poll_fill(cx)?) == 0 {
                        return Poll::Ready(Err(unexpected_eof()));
                    }
                },
                Framing::Chunked(chunk) => match chunk {
                    Chunk::Size => match find_crlf(&transport.read_buf) {
                        Some(i) => {
                            let line = transport.read_buf.split_to(i + 2);
                            let size = parse_chunk_size(&line[..i])?;
                            *chunk = match size {
                                0 => Chunk::Trailer,
                                n => Chunk::Data(n),
                            };
                        },
                        None => {
                            if ready!(transport.poll_fill(cx)?) == 0 {
                                return Poll::Ready(Err(unexpected_eof()));
                            }
                        },
                    },
                    Chunk::Data(0) => *chunk = Chunk::DataEnd,
                    Chunk::Data(rem) => {
                        if !transport.read_buf.is_empty() {
                            let take = (*rem).min(transport.read_buf.len() as u64) as usize;
                            *rem -= take as u64;
                            return Poll::Ready(Ok(Some(
                                transport.read_buf.split_to(take).freeze(),
                            )));
                        }
                        if ready!(transport.poll_fill(cx)?) == 0 {
                            return Poll::Ready(Err(unexpected_eof()));
                        }
                    },
                    Chunk::DataEnd => {
                        if transport.read_buf.len() < 2 {
                            if ready!(transport.poll_fill(cx)?) == 0 {
                                return Poll::Ready(Err(unexpected_eof()));
                            }
                            continue;
                        }
                        if &transport.read_buf[..2] != b"\r\n" {
                            return Poll::Ready(Err(ProtocolError {
                                reason: "chunk data not terminated".into(),
                            }
                            .into()));
                        }
                        transport.read_buf.advance(2);
                        *chunk = Chunk::Size;
                    },
                    Chunk::Trailer => {
                        if transport.read_buf.starts_with(b"\r\n") {
                            transport.read_buf.advance(2);
                            self.release();
                            return Poll::Ready(Ok(None));
                        }
                        match find_crlf(&transport.read_buf) {
                            // skip a trailer header line
                            Some(i) => transport.read_buf.advance(i + 2),
                            None => {
                                if ready!(transport.poll_fill(cx)?) == 0 {
                                    return Poll::Ready(Err(unexpected_eof()));
                                }
                            },
                        }
                    },
                },
                Framing::Eof => {
                    if !transport.read_buf.is_empty() {
                        let all = transport.read_buf.split().freeze();
                        return Poll::Ready(Ok(Some(all)));
                    }
                    if ready!(transport.poll_fill(cx)?) == 0 {
                        self.transport = None;
                        return Poll::Ready(Ok(None));
                    }
                },
            }
        }
    }

    fn release(&mut self) {
        let Some(transport) = self.transport.take() else { return };
        if self.keep_alive {
            if let Some(pool) = &self.pool {
                pool.release(transport);
            }
        }
    }
}

fn unexpected_eof() -> Error {
    io::Error::from(io::ErrorKind::UnexpectedEof).into()
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ProtocolError> {
    let line = std::str::from_utf8(line)
        .map_err(|_| ProtocolError { reason: "malformed chunk size".into() })?;
    let digits = line.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(digits, 16)
        .map_err(|_| ProtocolError { reason: "malformed chunk size".into() })
}
