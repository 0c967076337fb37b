//! Session and transaction correlation.
//!
//! The server owns session and transaction state; this module only models
//! which identifier to send next and whether sending it is still legal.
use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

/// Process wide identifier generation for sessions, queries and
/// transactions.
///
/// Identifier creation is pure, no network effect: the server creates the
/// actual state lazily on first use.
pub struct Manager {
    tag: u64,
    session_seq: AtomicU64,
    query_seq: AtomicU64,
    tx_seq: AtomicU64,
}

impl Manager {
    /// The process wide instance.
    pub fn global() -> &'static Manager {
        static GLOBAL: OnceLock<Manager> = OnceLock::new();
        GLOBAL.get_or_init(Manager::new)
    }

    fn new() -> Manager {
        use std::hash::{BuildHasher, Hasher};
        // RandomState is randomly seeded per process, which keeps ids from
        // two client processes on one server apart
        let tag = std::collections::hash_map::RandomState::new().build_hasher().finish();
        Manager {
            tag,
            session_seq: AtomicU64::new(1),
            query_seq: AtomicU64::new(1),
            tx_seq: AtomicU64::new(1),
        }
    }

    /// Per process entropy mixed into generated identifiers.
    pub(crate) fn tag(&self) -> u64 {
        self.tag
    }

    /// Generate a session identifier, unique within the process lifetime.
    pub fn create_session_id(&self) -> String {
        let seq = self.session_seq.fetch_add(1, Ordering::Relaxed);
        format!("cs-{:08x}-{seq}", self.tag as u32)
    }

    /// Generate a query identifier, unique within the process lifetime.
    pub fn create_query_id(&self) -> String {
        let seq = self.query_seq.fetch_add(1, Ordering::Relaxed);
        format!("cq-{:08x}-{seq}", self.tag as u32)
    }

    /// Start tracking a new explicit transaction in the [`Active`][TxState::Active] state.
    pub fn begin_transaction(&self, timeout: Option<Duration>) -> Transaction {
        let seq = self.tx_seq.fetch_add(1, Ordering::Relaxed);
        Transaction {
            inner: Arc::new(TxInner {
                id: format!("tx-{:08x}-{seq}", self.tag as u32),
                implicit: false,
                timeout,
                state: AtomicU8::new(ACTIVE),
            }),
        }
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Manager")
    }
}

const ACTIVE: u8 = 0;
const COMMITTED: u8 = 1;
const ROLLED_BACK: u8 = 2;
const ABORTED: u8 = 3;

/// Client side transaction state.
///
/// The last three states are terminal: an identifier that reached one of
/// them must not be attached to new work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
    Aborted,
}

impl TxState {
    fn from_u8(state: u8) -> TxState {
        match state {
            ACTIVE => TxState::Active,
            COMMITTED => TxState::Committed,
            ROLLED_BACK => TxState::RolledBack,
            _ => TxState::Aborted,
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, TxState::Active)
    }

    const fn as_str(self) -> &'static str {
        match self {
            TxState::Active => "active",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled back",
            TxState::Aborted => "aborted",
        }
    }
}

struct TxInner {
    id: String,
    implicit: bool,
    timeout: Option<Duration>,
    state: AtomicU8,
}

/// A cheaply cloneable handle to one server side transaction.
///
/// Every request participating in the transaction carries its id until the
/// transaction reaches a terminal state, see
/// [`Request::transaction`][crate::request::Request::transaction].
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxInner>,
}

impl Transaction {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Returns `true` for a server managed single statement transaction.
    pub fn is_implicit(&self) -> bool {
        self.inner.implicit
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    pub fn state(&self) -> TxState {
        TxState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Mark the transaction committed.
    pub fn commit(&self) -> Result<(), TransactionError> {
        self.transition(COMMITTED)
    }

    /// Mark the transaction rolled back.
    pub fn rollback(&self) -> Result<(), TransactionError> {
        self.transition(ROLLED_BACK)
    }

    /// Mark the transaction aborted.
    pub fn abort(&self) -> Result<(), TransactionError> {
        self.transition(ABORTED)
    }

    fn transition(&self, to: u8) -> Result<(), TransactionError> {
        self.inner
            .state
            .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
            .map(drop)
            .map_err(|was| TransactionError {
                id: self.inner.id.clone(),
                state: TxState::from_u8(was),
            })
    }

    /// Check the transaction is still legal to attach to a request.
    pub(crate) fn ensure_active(&self) -> Result<(), TransactionError> {
        match self.state() {
            TxState::Active => Ok(()),
            state => Err(TransactionError { id: self.inner.id.clone(), state }),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Usage error: the transaction already reached a terminal state.
pub struct TransactionError {
    pub(crate) id: String,
    pub(crate) state: TxState,
}

impl std::error::Error for TransactionError { }

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transaction {} already {}", self.id, self.state.as_str())
    }
}

impl fmt::Debug for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
