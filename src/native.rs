//! Boundary to the native database engine.
//!
//! The core never talks to a server itself. A [`Driver`] opens sessions and
//! each session is a [`NativeConnection`] whose methods are *blocking*: the
//! core only ever calls them from a background worker (see
//! [`offload`](crate::offload)), never from an async task.

use crate::error::NativeResult;
use crate::handler::Summary;
use crate::opts::Opts;
use crate::row::Field;
use crate::value::Value;

/// How the engine should deliver rows of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultMode {
    /// Materialize every row before returning.
    #[default]
    Buffered,
    /// Return the header only; rows are pulled with
    /// [`NativeConnection::fetch_row`].
    Streaming,
}

/// Outcome of a query or statement execution.
#[derive(Debug, Clone, Default)]
pub struct NativeOutcome {
    /// Result columns; empty when the command produced no result set
    pub fields: Vec<Field>,
    /// Materialized rows (always empty in streaming mode)
    pub rows: Vec<Vec<Value>>,
    /// True when rows are still pending on the native side
    pub pending: bool,
    /// Affected rows, insert id, warnings
    pub summary: Summary,
}

/// Metadata of a freshly prepared statement.
#[derive(Debug, Clone)]
pub struct PreparedInfo {
    /// Native statement id
    pub id: u32,
    /// Number of `?` placeholders
    pub param_count: usize,
    /// Result columns the statement will produce
    pub fields: Vec<Field>,
}

/// Opens native sessions.
pub trait Driver: Send + Sync + 'static {
    /// Establish a session. Blocking.
    fn connect(&self, opts: &Opts) -> NativeResult<Box<dyn NativeConnection>>;
}

/// One native session. All methods may block.
///
/// A session processes one command at a time. While a streaming result is
/// pending, only [`fetch_row`](Self::fetch_row) and
/// [`discard_pending`](Self::discard_pending) are valid.
pub trait NativeConnection: Send + 'static {
    /// Server version string, e.g. `8.0.36-log`.
    fn server_version(&self) -> &str;

    /// Server-side thread id of this session.
    fn thread_id(&self) -> u64;

    /// Run SQL text.
    fn query(&mut self, sql: &str, mode: ResultMode) -> NativeResult<NativeOutcome>;

    /// Prepare a statement.
    fn prepare(&mut self, sql: &str) -> NativeResult<PreparedInfo>;

    /// Execute a prepared statement with bound parameters.
    fn execute(&mut self, stmt: u32, params: &[Value], mode: ResultMode)
    -> NativeResult<NativeOutcome>;

    /// Fetch the next pending row; `None` once the result is exhausted.
    fn fetch_row(&mut self) -> NativeResult<Option<Vec<Value>>>;

    /// Throw away any pending rows. Returns how many were discarded.
    fn discard_pending(&mut self) -> NativeResult<u64>;

    /// Release a prepared statement.
    fn close_statement(&mut self, stmt: u32) -> NativeResult<()>;

    /// Check that the session is alive.
    fn ping(&mut self) -> NativeResult<()>;

    /// Say goodbye to the server and release the session.
    fn close(self: Box<Self>);

    /// Release local resources without notifying the server.
    fn abandon(self: Box<Self>) {}
}

/// Server identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Full version string as reported by the server
    pub version: String,
    /// Numeric version, `major * 10000 + minor * 100 + patch`
    pub id: u64,
}

impl ServerInfo {
    /// Build from a version string such as `8.0.36-0ubuntu0.22.04.1`.
    pub fn parse(version: &str) -> Self {
        let numeric = version
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .next()
            .unwrap_or_default();
        let mut parts = numeric
            .split('.')
            .map(|p| p.parse::<u64>().unwrap_or_default());
        let major = parts.next().unwrap_or_default();
        let minor = parts.next().unwrap_or_default();
        let patch = parts.next().unwrap_or_default();
        Self {
            version: version.to_string(),
            id: major
                .saturating_mul(10000)
                .saturating_add(minor.saturating_mul(100))
                .saturating_add(patch),
        }
    }
}
