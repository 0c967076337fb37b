//! The [`Client`] type.
use std::{sync::Arc, time::Duration};

use crate::{
    Result,
    common::trace,
    config::{Config, HealthCheck},
    format::Format,
    http::{RequestHead, Target},
    request::Request,
    response::{Response, Summary},
    transport::{Provider, RequestBody},
};

/// Entrypoint of the driver: configuration plus a transport provider.
///
/// Cheap to clone; clones share the provider and its reusable connections.
/// Requests issued concurrently from independent tasks each own their
/// connection acquisition and their [`Response`].
///
/// ```no_run
/// use colonna::Client;
///
/// # async fn app() -> colonna::Result<()> {
/// let client = Client::connect("http://localhost:8123")?;
///
/// let mut resp = client.request("select 1,2").execute().await?;
/// let record = resp.first_record().await?;
/// assert_eq!(record.try_get::<_, i32>(0)?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    config: Arc<Config>,
    provider: Provider,
}

impl Client {
    /// Build a client from configuration.
    ///
    /// No io happens until the first request; an unusable backend selection
    /// fails here.
    pub fn new(config: Config) -> Result<Client> {
        let provider = Provider::new(&config)?;
        Ok(Client { config: Arc::new(config), provider })
    }

    /// Build a client from a node url.
    pub fn connect(url: &str) -> Result<Client> {
        Client::new(Config::parse(url)?)
    }

    /// Build a client from environment variables, see
    /// [`Config::from_env`].
    pub fn connect_env() -> Result<Client> {
        Client::new(Config::from_env())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Begin a request descriptor for `query`.
    pub fn request(&self, query: impl Into<String>) -> Request {
        Request::new(self.clone(), query.into())
    }

    /// Execute a statement, drain its records, return the summary.
    pub async fn execute(&self, query: impl Into<String>) -> Result<Summary> {
        let mut response = self.request(query).execute().await?;
        response.finish().await
    }

    pub(crate) async fn send(&self, request: Request) -> Result<Response> {
        let format = request.format;
        let (head, body) = request.encode(&self.config)?;
        let payload = self
            .provider
            .send(
                &self.config.node,
                head,
                body,
                self.config.connect_timeout,
                self.config.read_size(),
            )
            .await
            .map_err(|err| err.with_context("http exchange failed"))?;
        Response::open(payload, format).await
    }

    /// Liveness probe, degraded to a boolean: any failure, reachable or
    /// not, is `false`. Use [`try_ping`][Client::try_ping] to distinguish.
    pub async fn ping(&self, timeout: Duration) -> bool {
        match self.try_ping(timeout).await {
            Ok(healthy) => healthy,
            Err(_err) => {
                trace!("ping failed: {_err}");
                false
            },
        }
    }

    /// Liveness probe.
    ///
    /// A reachable but unhealthy server is `Ok(false)`; only
    /// unreachability or a lapsed deadline is an error. The probing
    /// strategy comes from [`Config::health_check`]; the strategies may
    /// disagree for the same server state and are deliberately not
    /// reconciled.
    pub async fn try_ping(&self, timeout: Duration) -> Result<bool> {
        match self.probe(timeout).await {
            Ok(healthy) => Ok(healthy),
            Err(err) if err.is_unreachable() => Err(err),
            Err(_err) => {
                trace!("ping unhealthy: {_err}");
                Ok(false)
            },
        }
    }

    async fn probe(&self, timeout: Duration) -> Result<bool> {
        let probe = async {
            match self.config.health_check {
                HealthCheck::Ping => {
                    let mut target = Target::new(self.config.context());
                    target.push_path("ping");
                    let head = RequestHead::new("GET", target.finish());

                    let mut payload = self
                        .provider
                        .send(
                            &self.config.node,
                            head,
                            RequestBody::Empty,
                            timeout,
                            self.config.read_size(),
                        )
                        .await?;

                    let body = payload.body.collect().await?;
                    Ok((200..300).contains(&payload.status)
                        && body.starts_with(b"Ok"))
                },
                HealthCheck::SelectOne => {
                    let mut response = self
                        .request("SELECT 1")
                        .format(Format::Tsv)
                        .execute()
                        .await?;
                    let one = response.first_record().await?;
                    Ok(one.try_get::<_, i32>(0)? == 1)
                },
            }
        };

        #[cfg(feature = "tokio")]
        {
            match tokio::time::timeout(timeout, probe).await {
                Ok(result) => result,
                Err(_) => Err(crate::Error::timeout("ping")),
            }
        }

        #[cfg(not(feature = "tokio"))]
        {
            probe.await
        }
    }
}
