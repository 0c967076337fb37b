//! The request descriptor and its http encoding.
use base64::Engine;
use bytes::{Bytes, BytesMut};
use std::{sync::Arc, time::Duration};

use crate::{
    Error, Result,
    client::Client,
    common::ByteStr,
    compress::{Compressor, Method},
    external::{Body, ExternalTable},
    format::Format,
    http::{
        self, RequestHead, Target,
        multipart::{MultipartStream, Part, PartBody, boundary},
    },
    manager::Transaction,
    response::Response,
    transport::{CompressStream, RequestBody},
    value::IntoParam,
};

#[derive(Clone, Debug)]
struct SessionBinding {
    id: String,
    create_if_absent: bool,
    timeout: Option<Duration>,
}

#[derive(Clone, Debug, Default)]
enum TxBinding {
    /// Server side default behavior.
    #[default]
    Inherit,
    /// Force an implicit, single statement transaction.
    Implicit,
    /// Join an explicit transaction until it turns terminal.
    Explicit(Transaction),
}

/// A query request under construction, immutable once sent.
///
/// Cloning produces an independent descriptor sharing no mutable state,
/// the idiom for issuing repeated requests against one logical session:
///
/// ```no_run
/// use colonna::{Client, Manager};
///
/// # async fn app() -> colonna::Result<()> {
/// let client = Client::connect("http://localhost:8123")?;
/// let session = Manager::global().create_session_id();
///
/// let req = client
///     .request("create temporary table t(a String) engine=Memory as select '1'")
///     .session(&session, true);
///
/// req.clone().execute().await?.finish().await?;
///
/// let mut resp = req
///     .clone()
///     .query("select * from t")
///     .execute()
///     .await?;
/// let first = resp.first_record().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Request {
    client: Client,
    query: String,
    query_id: Option<String>,
    pub(crate) format: Format,
    params: Vec<(ByteStr, String)>,
    settings: Vec<(ByteStr, String)>,
    headers: Vec<(ByteStr, ByteStr)>,
    session: Option<SessionBinding>,
    transaction: TxBinding,
    /// [`None`] inherits the client wide default.
    compress_request: Option<(Method, i32)>,
    compress_response: Option<Method>,
    external: Vec<Arc<ExternalTable>>,
    credentials: Option<(ByteStr, ByteStr)>,
}

impl Request {
    pub(crate) fn new(client: Client, query: String) -> Request {
        Request {
            client,
            query,
            query_id: None,
            format: Format::default(),
            params: Vec::new(),
            settings: Vec::new(),
            headers: Vec::new(),
            session: None,
            transaction: TxBinding::default(),
            compress_request: None,
            compress_response: None,
            external: Vec::new(),
            credentials: None,
        }
    }

    /// Replace the query text.
    pub fn query(mut self, query: impl Into<String>) -> Request {
        self.query = query.into();
        self
    }

    /// Attach a caller chosen query id, see
    /// [`Manager::create_query_id`][crate::Manager::create_query_id].
    pub fn query_id(mut self, id: impl Into<String>) -> Request {
        self.query_id = Some(id.into());
        self
    }

    /// Result format.
    pub fn format(mut self, format: Format) -> Request {
        self.format = format;
        self
    }

    /// Bind a named parameter, `{name:Type}` in the query text.
    pub fn param(mut self, name: impl Into<ByteStr>, value: impl IntoParam) -> Request {
        self.params.push((name.into(), value.into_param().as_str().into()));
        self
    }

    /// Set an arbitrary per request option, passed through to the server.
    pub fn set(mut self, key: impl Into<ByteStr>, value: impl IntoParam) -> Request {
        self.settings.push((key.into(), value.into_param().as_str().into()));
        self
    }

    /// Clear an option set earlier.
    pub fn unset(mut self, key: &str) -> Request {
        self.settings.retain(|(k, _)| k.as_str() != key);
        self
    }

    /// Set a custom http header.
    pub fn header(mut self, name: impl Into<ByteStr>, value: impl Into<ByteStr>) -> Request {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Remove a custom header set earlier.
    pub fn remove_header(mut self, name: &str) -> Request {
        self.headers.retain(|(n, _)| n.as_str() != name);
        self
    }

    /// Bind a session id.
    ///
    /// With `create_if_absent` the server creates the session lazily on
    /// first use; without it the server verifies the session exists.
    pub fn session(mut self, id: impl Into<String>, create_if_absent: bool) -> Request {
        self.session = Some(SessionBinding {
            id: id.into(),
            create_if_absent,
            timeout: self.session.take().and_then(|s| s.timeout),
        });
        self
    }

    /// Server side idle timeout of the bound session.
    pub fn session_timeout(mut self, timeout: Duration) -> Request {
        if let Some(session) = &mut self.session {
            session.timeout = Some(timeout);
        }
        self
    }

    /// Join an explicit transaction, or force an implicit single statement
    /// transaction with [`None`].
    ///
    /// Attaching a transaction that reached a terminal state fails at
    /// execute time, before anything is sent.
    pub fn transaction(mut self, transaction: Option<&Transaction>) -> Request {
        self.transaction = match transaction {
            Some(tx) => TxBinding::Explicit(tx.clone()),
            None => TxBinding::Implicit,
        };
        self
    }

    /// Compress the request body, overriding the client default.
    pub fn compress_request(mut self, method: Method, level: i32) -> Request {
        self.compress_request = Some((method, level));
        self
    }

    /// Ask the server to compress the response body, overriding the client
    /// default. [`Method::None`] disables.
    pub fn compress_response(mut self, method: Method) -> Request {
        self.compress_response = Some(method);
        self
    }

    /// Attach an external table.
    pub fn external(mut self, table: ExternalTable) -> Request {
        self.external.push(Arc::new(table));
        self
    }

    /// Credentials scoped to this request only.
    pub fn credentials(mut self, user: impl Into<ByteStr>, pass: impl Into<ByteStr>) -> Request {
        self.credentials = Some((user.into(), pass.into()));
        self
    }

    /// Execute and wait for the response head.
    ///
    /// Records stream lazily from the returned [`Response`].
    pub async fn execute(self) -> Result<Response> {
        let client = self.client.clone();
        client.send(self).await
    }

    /// Serialize into an http request head and body.
    ///
    /// All configuration errors surface here, before a connection is
    /// acquired.
    pub(crate) fn encode(&self, config: &crate::Config) -> Result<(RequestHead, RequestBody)> {
        crate::common::span!("encode");

        // eager checks first: codec direction, level, terminal transaction
        let request_comp = match self.compress_request.or(config.compress_request) {
            Some((method, level)) if method != Method::None => {
                if !method.supports_request() {
                    return Err(Error::config(format!(
                        "{method} cannot compress a request body"
                    )));
                }
                Some((method, method.normalize_level(level)?))
            },
            _ => None,
        };
        let response_comp = match self.compress_response.or(config.compress_response) {
            Some(method) if method != Method::None => {
                if !method.supports_response() {
                    return Err(Error::config(format!(
                        "{method} cannot compress a response body"
                    )));
                }
                Some(method)
            },
            _ => None,
        };
        if let TxBinding::Explicit(tx) = &self.transaction {
            tx.ensure_active()?;
        }

        let mut target = Target::new(config.context());
        if let Some(id) = &self.query_id {
            target.param("query_id", id);
        }
        if let Some(session) = &self.session {
            target.param("session_id", &session.id);
            if !session.create_if_absent {
                target.param("session_check", "1");
            }
            if let Some(timeout) = session.timeout {
                target.param("session_timeout", itoa::Buffer::new().format(timeout.as_secs()));
            }
        }
        match &self.transaction {
            TxBinding::Inherit => {},
            TxBinding::Implicit => target.param("implicit_transaction", "1"),
            TxBinding::Explicit(tx) => {
                target.param("transaction_id", tx.id());
                if let Some(timeout) = tx.timeout() {
                    target.param(
                        "transaction_timeout",
                        itoa::Buffer::new().format(timeout.as_secs()),
                    );
                }
            },
        }
        target.param("default_format", self.format.as_str());
        for (key, value) in &self.settings {
            target.param(key, value);
        }
        for (name, value) in &self.params {
            target.param(&format!("param_{name}"), value);
        }
        for (name, value) in &config.custom_params {
            target.param(name, value);
        }
        for table in &self.external {
            target.param(&format!("{}_format", table.name()), table.format().as_str());
            target.param(&format!("{}_structure", table.name()), table.structure());
        }

        // custom headers first, authentication after: an explicit
        // Authorization header wins over credential derived auth
        let mut head = RequestHead::new("POST", target.finish());
        for (name, value) in &config.custom_headers {
            head.header(name.clone(), value.clone());
        }
        for (name, value) in &self.headers {
            head.header(name.clone(), value.clone());
        }
        if !head.contains("authorization") {
            let (user, pass) = match &self.credentials {
                Some((user, pass)) => (user, pass),
                None => (&config.user, &config.pass),
            };
            let token =
                base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            head.header("Authorization", format!("Basic {token}"));
        }
        head.header(http::HEADER_CLIENT_NAME, http::CLIENT_NAME);
        if let Some(method) = response_comp {
            head.header("Accept-Encoding", method.as_str());
        }
        if let Some((method, _)) = request_comp {
            head.header("Content-Encoding", method.as_str());
        }

        let body = if self.external.is_empty() {
            head.header("Content-Type", "text/plain; charset=UTF-8");
            RequestBody::Full(Bytes::copy_from_slice(self.query.as_bytes()))
        } else {
            let bound = boundary();
            head.header("Content-Type", format!("multipart/form-data; boundary={bound}"));

            let mut parts = Vec::with_capacity(self.external.len() + 1);
            parts.push(Part::new(
                "query",
                PartBody::Full(Bytes::copy_from_slice(self.query.as_bytes())),
            ));
            for table in &self.external {
                let content = match table.take_content()? {
                    Body::Bytes(bytes) => PartBody::Full(bytes),
                    Body::Stream(stream) => PartBody::Stream(stream),
                };
                let mut part = Part::new(table.name(), content)
                    .filename(table.name())
                    .header(http::HEADER_STRUCTURE, table.structure())
                    .header(http::HEADER_FORMAT, table.format().as_str());
                if let Some(method) = table.compression() {
                    part = part.header("Content-Encoding", method.as_str());
                }
                parts.push(part);
            }

            RequestBody::Stream(Box::pin(MultipartStream::new(bound, parts)))
        };

        // one outer stream wraps the whole body, external parts included
        let body = match (request_comp, body) {
            (None, body) => body,
            (Some(_), RequestBody::Empty) => RequestBody::Empty,
            (Some((method, level)), RequestBody::Full(bytes)) => {
                let mut comp = Compressor::new(method, level)?;
                let mut out = BytesMut::new();
                out.extend_from_slice(&comp.write(&bytes)?);
                out.extend_from_slice(&comp.finish()?);
                RequestBody::Full(out.freeze())
            },
            (Some((method, level)), RequestBody::Stream(stream)) => {
                let comp = Compressor::new(method, level)?;
                RequestBody::Stream(Box::pin(CompressStream::new(stream, comp)))
            },
        };

        Ok((head, body))
    }
}
