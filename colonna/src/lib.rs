//! Http driver for columnar analytic databases.
//!
//! # Examples
//!
//! Single query:
//!
//! ```no_run
//! use colonna::Client;
//!
//! # async fn app() -> colonna::Result<()> {
//! let client = Client::connect("http://localhost:8123")?;
//!
//! let mut resp = client.request("select number n from numbers({count:UInt64})")
//!     .param("count", 10)
//!     .execute()
//!     .await?;
//!
//! while let Some(record) = resp.next_record().await? {
//!     let _n: u64 = record.try_get("n")?;
//! }
//!
//! assert_eq!(resp.summary().read_rows(), 10);
//! # Ok(())
//! # }
//! ```
//!
//! Server side session shared across requests:
//!
//! ```no_run
//! use colonna::{Client, Manager};
//!
//! # async fn app() -> colonna::Result<()> {
//! let client = Client::connect_env()?;
//! let session = Manager::global().create_session_id();
//!
//! let req = client
//!     .request("create temporary table foo(id Int32) engine=Memory as select 420")
//!     .session(&session, true);
//!
//! req.clone().execute().await?.finish().await?;
//!
//! let mut resp = req.query("select id from foo").execute().await?;
//! assert_eq!(resp.first_record().await?.try_get::<_, i32>("id")?, 420);
//! # Ok(())
//! # }
//! ```

pub mod common;
mod ext;

// Wire
mod http;
pub mod compress;

// Encoding
mod format;
mod rowbinary;
pub mod value;
pub mod record;

// Component
mod node;
mod config;
pub mod external;
pub mod manager;

// Operation
pub mod request;
pub mod response;

// Connection
mod transport;
mod client;
#[cfg(feature = "tokio")]
mod pool;

mod error;


pub use common::ByteStr;

pub use client::Client;
pub use config::{Config, HealthCheck, PoolOptions, TlsConfig, buffer_size};
pub use node::{Node, ParseError, Scheme};
pub use format::Format;
pub use transport::Backend;

pub use external::ExternalTable;
pub use manager::{Manager, Transaction, TransactionError, TxState};
pub use record::{DecodeError, FromRecord, FromValue, Record, Value};
pub use request::Request;
pub use response::{Records, Response, Summary};
pub use value::IntoParam;

pub use error::{ConfigError, Error, ErrorKind, Result, StreamError, TimeoutError};
pub use http::{ProtocolError, ServerError};
