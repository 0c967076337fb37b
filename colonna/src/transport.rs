//! Interchangeable http transport backends.
//!
//! A [`Provider`] runs one http exchange against a [`Node`] and hands back
//! status, headers and a streaming body. Backends differ in plumbing only:
//! timeout semantics, header layout and context path handling are fixed by
//! the wire layer, so callers cannot observe which backend served them.
use bytes::Bytes;
use futures_core::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};

use crate::{
    Result,
    common::verbose,
    compress::Compressor,
    config::Config,
    http::{Headers, RequestHead},
    node::Node,
};

#[cfg(feature = "tokio")]
use crate::{
    http::tcp::{TcpBody, TcpTransport},
    pool,
};

/// Transport backend selection.
///
/// Selected via [`Config::backend`][crate::Config::backend], never by the
/// request. Both backends must behave identically from the caller's
/// perspective.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    /// Hand written http/1.1 over [`TcpStream`][tokio::net::TcpStream]
    /// with keep alive reuse. Plain http only.
    #[default]
    Tcp,
    /// [`reqwest`] client. Carries the tls configuration.
    Reqwest,
}

pub(crate) type BoxBodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// An outgoing request body.
pub(crate) enum RequestBody {
    Empty,
    Full(Bytes),
    Stream(BoxBodyStream),
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Full(b) => f.debug_tuple("Full").field(&b.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// One finished exchange: status, headers, and the body still streaming.
pub(crate) struct ResponsePayload {
    pub(crate) status: u16,
    pub(crate) headers: Headers,
    pub(crate) body: BodyStream,
}

/// The streaming response body, backend independent.
///
/// Dropping it before exhaustion aborts the remaining download instead of
/// draining it.
pub(crate) enum BodyStream {
    Empty,
    #[cfg(feature = "tokio")]
    Tcp(TcpBody),
    #[cfg(feature = "reqwest")]
    Reqwest(Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>),
}

impl BodyStream {
    pub(crate) fn poll_chunk(&mut self, cx: &mut Context) -> Poll<Result<Option<Bytes>>> {
        match self {
            BodyStream::Empty => Poll::Ready(Ok(None)),
            #[cfg(feature = "tokio")]
            BodyStream::Tcp(body) => body.poll_chunk(cx),
            #[cfg(feature = "reqwest")]
            BodyStream::Reqwest(stream) => match ready!(stream.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => Poll::Ready(Ok(Some(chunk))),
                Some(Err(err)) => Poll::Ready(Err(map_reqwest_err(err))),
                None => Poll::Ready(Ok(None)),
            },
        }
    }

    /// Read the remaining body into one buffer. Error bodies are small.
    pub(crate) async fn collect(&mut self) -> Result<Bytes> {
        let mut out = bytes::BytesMut::new();
        while let Some(chunk) = std::future::poll_fn(|cx| self.poll_chunk(cx)).await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BodyStream")
    }
}

/// A connection provider for one backend.
#[derive(Clone, Debug)]
pub(crate) enum Provider {
    #[cfg(feature = "tokio")]
    Tcp(pool::Handle),
    #[cfg(feature = "reqwest")]
    Reqwest(reqwest::Client),
}

impl Provider {
    pub(crate) fn new(config: &Config) -> Result<Provider> {
        match config.backend {
            Backend::Tcp => {
                #[cfg(feature = "tokio")]
                {
                    let (handle, worker) = pool::Handle::new(config.pool.clone());
                    tokio::spawn(worker);
                    Ok(Provider::Tcp(handle))
                }

                #[cfg(not(feature = "tokio"))]
                {
                    Err(crate::Error::config("tcp backend requires the `tokio` feature"))
                }
            },
            Backend::Reqwest => {
                #[cfg(feature = "reqwest")]
                {
                    Ok(Provider::Reqwest(build_reqwest(config)?))
                }

                #[cfg(not(feature = "reqwest"))]
                {
                    Err(crate::Error::config("reqwest backend requires the `reqwest` feature"))
                }
            },
        }
    }

    /// Run one http exchange against `node`.
    ///
    /// `connect_timeout` bounds connection acquisition only, a lapse is a
    /// [`TimeoutError`][crate::error::TimeoutError], not a server error.
    pub(crate) async fn send(
        &self,
        node: &Node,
        head: RequestHead,
        body: RequestBody,
        connect_timeout: Duration,
        read_size: usize,
    ) -> Result<ResponsePayload> {
        verbose!("{} {}:{}{}", head.method, node.host(), node.port(), head.target);

        match self {
            #[cfg(feature = "tokio")]
            Provider::Tcp(pool) => {
                let mut transport = match pool.acquire().await {
                    Some(reused) => reused,
                    None => TcpTransport::connect(node, connect_timeout, read_size).await?,
                };

                let host = format!("{}:{}", node.host(), node.port());
                transport.send(&head, &host, body).await?;
                let response = transport.read_head().await?;
                let tcp_body = TcpBody::new(transport, &response, Some(pool.clone()))?;

                Ok(ResponsePayload {
                    status: response.status,
                    headers: response.headers,
                    body: BodyStream::Tcp(tcp_body),
                })
            },
            #[cfg(feature = "reqwest")]
            Provider::Reqwest(client) => {
                let _ = (connect_timeout, read_size);

                let url = format!(
                    "{}://{}:{}{}",
                    node.scheme().as_str(),
                    node.host(),
                    node.port(),
                    head.target,
                );
                let method = reqwest::Method::from_bytes(head.method.as_bytes())
                    .expect("method is a known http verb");

                let mut request = client.request(method, url);
                for (name, value) in &head.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                let request = match body {
                    RequestBody::Empty => request,
                    RequestBody::Full(bytes) => request.body(bytes),
                    RequestBody::Stream(stream) => {
                        request.body(reqwest::Body::wrap_stream(stream))
                    },
                };

                let response = request.send().await.map_err(map_reqwest_err)?;

                let status = response.status().as_u16();
                let mut headers = Headers::default();
                for (name, value) in response.headers() {
                    if let Ok(value) = value.to_str() {
                        headers.push(name.as_str().into(), value.into());
                    }
                }

                Ok(ResponsePayload {
                    status,
                    headers,
                    body: BodyStream::Reqwest(Box::pin(response.bytes_stream())),
                })
            },
        }
    }
}

#[cfg(feature = "reqwest")]
fn build_reqwest(config: &Config) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .danger_accept_invalid_certs(config.tls.accept_invalid_certs);

    if let Some(path) = &config.tls.ca_bundle {
        let pem = std::fs::read(path)?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(map_reqwest_err)?;
        builder = builder.add_root_certificate(cert);
    }

    builder.build().map_err(map_reqwest_err)
}

#[cfg(feature = "reqwest")]
fn map_reqwest_err(err: reqwest::Error) -> crate::Error {
    if err.is_timeout() {
        return crate::Error::timeout("request");
    }
    std::io::Error::other(err).into()
}

/// Wraps a body stream with one outer [`Compressor`].
///
/// Compression wraps the transport body as a whole, not individual parts.
pub(crate) struct CompressStream {
    inner: BoxBodyStream,
    comp: Option<Compressor>,
}

impl CompressStream {
    pub(crate) fn new(inner: BoxBodyStream, comp: Compressor) -> CompressStream {
        CompressStream { inner, comp: Some(comp) }
    }
}

impl Stream for CompressStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();

        loop {
            let Some(comp) = me.comp.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(me.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => match comp.write(&chunk) {
                    Ok(out) if out.is_empty() => continue,
                    Ok(out) => return Poll::Ready(Some(Ok(out))),
                    Err(err) => {
                        me.comp = None;
                        return Poll::Ready(Some(Err(err.into())));
                    },
                },
                Some(Err(err)) => {
                    me.comp = None;
                    return Poll::Ready(Some(Err(err)));
                },
                None => {
                    let comp = me.comp.take().expect("checked above");
                    return match comp.finish() {
                        Ok(out) if out.is_empty() => Poll::Ready(None),
                        Ok(out) => Poll::Ready(Some(Ok(out))),
                        Err(err) => Poll::Ready(Some(Err(err.into()))),
                    };
                },
            }
        }
    }
}

impl std::fmt::Debug for CompressStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompressStream")
    }
}
