//! `colonna` error types.
use std::{backtrace::Backtrace, borrow::Cow, fmt, io, str::Utf8Error};

use crate::{
    http::{ProtocolError, ServerError},
    manager::TransactionError,
    node::ParseError,
    record::DecodeError,
};

/// A specialized [`Result`] type for `colonna` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `colonna` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Attach operation context to the error message.
    pub(crate) fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub(crate) fn config(reason: impl Into<Cow<'static, str>>) -> Self {
        ConfigError { reason: reason.into() }.into()
    }

    pub(crate) fn stream(reason: impl Into<Cow<'static, str>>) -> Self {
        StreamError { reason: reason.into() }.into()
    }

    pub(crate) fn timeout(op: &'static str) -> Self {
        TimeoutError { op }.into()
    }

    /// Returns `true` for errors that mean the peer cannot be reached at all.
    pub(crate) fn is_unreachable(&self) -> bool {
        matches!(self.kind, ErrorKind::Io(_) | ErrorKind::Timeout(_))
    }
}

/// All possible error kind from `colonna` library.
pub enum ErrorKind {
    /// Malformed node url.
    Parse(ParseError),
    /// Invalid or incompatible configuration, raised before any io.
    Config(ConfigError),
    /// Attaching a transaction that already reached a terminal state.
    Transaction(TransactionError),
    /// Io failure: unreachable host, connection drop mid read.
    Io(io::Error),
    /// Lapsed connect or ping deadline.
    Timeout(TimeoutError),
    /// Error reported by the server, with its code and message.
    Server(ServerError),
    /// Response violates the http framing the protocol expects.
    Protocol(ProtocolError),
    /// Decompression failure or malformed record framing.
    Stream(StreamError),
    /// Record value extraction failure.
    Decode(DecodeError),
    /// Non utf8 where text was promised.
    Utf8(Utf8Error),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Parse(e));
from!(<ConfigError>e => ErrorKind::Config(e));
from!(<TransactionError>e => ErrorKind::Transaction(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<TimeoutError>e => ErrorKind::Timeout(e));
from!(<ServerError>e => ErrorKind::Server(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<StreamError>e => ErrorKind::Stream(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => e.fmt(f),
            Self::Config(e) => e.fmt(f),
            Self::Transaction(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::Server(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Stream(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Invalid or incompatible configuration.
///
/// Raised eagerly, before any network io.
pub struct ConfigError {
    pub(crate) reason: Cow<'static, str>,
}

impl std::error::Error for ConfigError { }

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return f.write_str(&self.reason)
        }
        write!(f, "invalid configuration: {}", self.reason)
    }
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// A lapsed deadline, distinct from a server reported error.
pub struct TimeoutError {
    pub(crate) op: &'static str,
}

impl std::error::Error for TimeoutError { }

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} timed out", self.op)
    }
}

impl fmt::Debug for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Terminal streaming failure: decompression error, malformed framing,
/// or a connection dropped mid read.
pub struct StreamError {
    pub(crate) reason: Cow<'static, str>,
}

impl std::error::Error for StreamError { }

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream failed: {}", self.reason)
    }
}

impl fmt::Debug for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
