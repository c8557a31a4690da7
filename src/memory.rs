//! In-process scripted engine.
//!
//! [`MemoryDriver`] implements the native boundary without a server. SQL text
//! is answered from registered responses, so applications and tests can drive
//! the full connection/statement/cursor lifecycle deterministically:
//!
//! ```
//! use zero_dbcore::memory::{Canned, MemoryDriver};
//! use zero_dbcore::{ColumnType, Field, Value};
//!
//! let driver = MemoryDriver::new();
//! driver.on(
//!     "SELECT id FROM t",
//!     Canned::rows(
//!         vec![Field::new("id", ColumnType::LongLong)],
//!         vec![vec![Value::Int(1)], vec![Value::Int(2)]],
//!     ),
//! );
//! ```
//!
//! Besides registered SQL, `SELECT <integer>` is answered with a single row.
//! The engine behaves like a MySQL session where it matters for lifecycle
//! handling: a pending streaming result makes every other command fail with
//! "commands out of sync", and a lost-connection error poisons the session.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{NativeError, NativeResult, code};
use crate::handler::Summary;
use crate::native::{Driver, NativeConnection, NativeOutcome, PreparedInfo, ResultMode};
use crate::opts::Opts;
use crate::row::{ColumnType, Field};
use crate::value::Value;

type Responder = Arc<dyn Fn(&[Value]) -> NativeResult<Canned> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A scripted response.
#[derive(Debug, Clone, Default)]
pub struct Canned {
    fields: Vec<Field>,
    rows: Vec<Vec<Value>>,
    summary: Summary,
    delay: Option<Duration>,
    stall: Option<(usize, Duration)>,
    stream_error: Option<NativeError>,
}

impl Canned {
    /// A result set.
    pub fn rows(fields: Vec<Field>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            fields,
            rows,
            ..Self::default()
        }
    }

    /// A command without result set that changed `affected_rows` rows.
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            summary: Summary {
                affected_rows,
                ..Summary::default()
            },
            ..Self::default()
        }
    }

    pub fn with_insert_id(mut self, id: u64) -> Self {
        self.summary.last_insert_id = id;
        self
    }

    pub fn with_warnings(mut self, count: u32) -> Self {
        self.summary.warning_count = count;
        self
    }

    /// Fail with `error` after the last row instead of reporting the end of
    /// rows. Buffered execution fails up front.
    pub fn with_stream_error(mut self, error: NativeError) -> Self {
        self.stream_error = Some(error);
        self
    }

    /// Block the native call for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Block the streaming fetch with index `fetch` (zero-based, the fetch
    /// after the last row included) for `delay`.
    pub fn with_fetch_stall(mut self, fetch: usize, delay: Duration) -> Self {
        self.stall = Some((fetch, delay));
        self
    }
}

/// Counters describing what the engine was asked to do.
#[derive(Debug, Default)]
pub struct MemoryStats {
    connects: AtomicU64,
    closes: AtomicU64,
    abandons: AtomicU64,
    commands: AtomicU64,
    statements_prepared: AtomicU64,
    statements_closed: AtomicU64,
    rows_discarded: AtomicU64,
}

impl MemoryStats {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::SeqCst);
    }

    /// Sessions established.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Sessions closed gracefully.
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Sessions released without notifying the server.
    pub fn abandons(&self) -> u64 {
        self.abandons.load(Ordering::SeqCst)
    }

    /// Sessions released either way.
    pub fn released(&self) -> u64 {
        self.closes() + self.abandons()
    }

    /// Queries and statement executions accepted.
    pub fn commands(&self) -> u64 {
        self.commands.load(Ordering::SeqCst)
    }

    pub fn statements_prepared(&self) -> u64 {
        self.statements_prepared.load(Ordering::SeqCst)
    }

    pub fn statements_closed(&self) -> u64 {
        self.statements_closed.load(Ordering::SeqCst)
    }

    /// Pending streaming rows thrown away by drains.
    pub fn rows_discarded(&self) -> u64 {
        self.rows_discarded.load(Ordering::SeqCst)
    }
}

struct Engine {
    responders: Mutex<HashMap<String, Responder>>,
    refuse: Mutex<Option<NativeError>>,
    connect_delay: Mutex<Option<Duration>>,
    server_version: Mutex<String>,
    next_thread_id: AtomicU64,
    stats: Arc<MemoryStats>,
}

/// Scripted in-process [`Driver`].
///
/// Cloning shares the script and the statistics.
#[derive(Clone)]
pub struct MemoryDriver {
    engine: Arc<Engine>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("stats", &self.engine.stats)
            .finish_non_exhaustive()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(Engine {
                responders: Mutex::new(HashMap::new()),
                refuse: Mutex::new(None),
                connect_delay: Mutex::new(None),
                server_version: Mutex::new("8.0.36-memory".to_string()),
                next_thread_id: AtomicU64::new(1),
                stats: Arc::new(MemoryStats::default()),
            }),
        }
    }

    /// Answer `sql` with a fixed response.
    pub fn on(&self, sql: &str, canned: Canned) -> &Self {
        self.on_fn(sql, move |_| Ok(canned.clone()))
    }

    /// Answer `sql` with a response computed from the bound parameters.
    pub fn on_fn<F>(&self, sql: &str, f: F) -> &Self
    where
        F: Fn(&[Value]) -> NativeResult<Canned> + Send + Sync + 'static,
    {
        lock(&self.engine.responders).insert(sql.to_string(), Arc::new(f));
        self
    }

    /// Answer `sql` with an error.
    pub fn fail(&self, sql: &str, error: NativeError) -> &Self {
        self.on_fn(sql, move |_| Err(error.clone()))
    }

    /// Refuse new sessions with `error` (or accept them again with `None`).
    pub fn refuse_connections(&self, error: Option<NativeError>) -> &Self {
        *lock(&self.engine.refuse) = error;
        self
    }

    /// Block every connection attempt for `delay`.
    pub fn set_connect_delay(&self, delay: Option<Duration>) -> &Self {
        *lock(&self.engine.connect_delay) = delay;
        self
    }

    pub fn set_server_version(&self, version: &str) -> &Self {
        *lock(&self.engine.server_version) = version.to_string();
        self
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        Arc::clone(&self.engine.stats)
    }
}

impl Driver for MemoryDriver {
    fn connect(&self, _opts: &Opts) -> NativeResult<Box<dyn NativeConnection>> {
        let delay = *lock(&self.engine.connect_delay);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(error) = lock(&self.engine.refuse).clone() {
            return Err(error);
        }
        MemoryStats::bump(&self.engine.stats.connects, 1);
        Ok(Box::new(MemorySession {
            engine: Arc::clone(&self.engine),
            thread_id: self.engine.next_thread_id.fetch_add(1, Ordering::SeqCst),
            server_version: lock(&self.engine.server_version).clone(),
            statements: HashMap::new(),
            next_stmt: 0,
            pending: None,
            lost: false,
        }))
    }
}

struct MemorySession {
    engine: Arc<Engine>,
    thread_id: u64,
    server_version: String,
    statements: HashMap<u32, (String, usize)>,
    next_stmt: u32,
    pending: Option<Pending>,
    lost: bool,
}

struct Pending {
    rows: VecDeque<Vec<Value>>,
    error: Option<NativeError>,
    fetches: usize,
    stall: Option<(usize, Duration)>,
}

fn literal_select(sql: &str) -> Option<Canned> {
    let sql = sql.trim().trim_end_matches(';').trim_end();
    let head = sql.get(..7)?;
    if !head.eq_ignore_ascii_case("select ") {
        return None;
    }
    let literal = sql.get(7..)?.trim();
    let n: i64 = literal.parse().ok()?;
    Some(Canned::rows(
        vec![Field::new(literal, ColumnType::LongLong).not_null()],
        vec![vec![Value::Int(n)]],
    ))
}

impl MemorySession {
    fn check_ready(&self) -> NativeResult<()> {
        if self.lost {
            return Err(NativeError::server_gone());
        }
        if self.pending.is_some() {
            return Err(NativeError::new(
                code::CR_COMMANDS_OUT_OF_SYNC,
                "Commands out of sync; you can't run this command now",
            ));
        }
        Ok(())
    }

    fn responder(&self, sql: &str) -> Option<Responder> {
        lock(&self.engine.responders).get(sql).cloned()
    }

    fn respond(&mut self, sql: &str, params: &[Value]) -> NativeResult<Canned> {
        let result = match self.responder(sql) {
            Some(responder) => responder(params),
            None => literal_select(sql).ok_or_else(|| {
                NativeError::new(
                    code::ER_PARSE_ERROR,
                    format!("You have an error in your SQL syntax near '{}'", sql),
                )
                .with_sqlstate("42000")
            }),
        };
        if let Err(error) = &result
            && error.is_connection_lost()
        {
            self.lost = true;
        }
        result
    }

    fn run(&mut self, sql: &str, params: &[Value], mode: ResultMode) -> NativeResult<NativeOutcome> {
        self.check_ready()?;
        let mut canned = self.respond(sql, params)?;
        if let Some(delay) = canned.delay {
            std::thread::sleep(delay);
        }
        MemoryStats::bump(&self.engine.stats.commands, 1);

        let streaming = mode == ResultMode::Streaming && !canned.fields.is_empty();
        if !streaming && let Some(error) = canned.stream_error.take() {
            if error.is_connection_lost() {
                self.lost = true;
            }
            return Err(error);
        }
        if streaming {
            self.pending = Some(Pending {
                rows: canned.rows.into(),
                error: canned.stream_error,
                fetches: 0,
                stall: canned.stall,
            });
            return Ok(NativeOutcome {
                fields: canned.fields,
                rows: Vec::new(),
                pending: true,
                summary: canned.summary,
            });
        }
        Ok(NativeOutcome {
            fields: canned.fields,
            rows: canned.rows,
            pending: false,
            summary: canned.summary,
        })
    }
}

impl NativeConnection for MemorySession {
    fn server_version(&self) -> &str {
        &self.server_version
    }

    fn thread_id(&self) -> u64 {
        self.thread_id
    }

    fn query(&mut self, sql: &str, mode: ResultMode) -> NativeResult<NativeOutcome> {
        self.run(sql, &[], mode)
    }

    fn prepare(&mut self, sql: &str) -> NativeResult<PreparedInfo> {
        self.check_ready()?;
        let param_count = sql.matches('?').count();
        let fields = match self.responder(sql) {
            Some(responder) => responder(&vec![Value::Null; param_count])
                .map(|canned| canned.fields)
                .unwrap_or_default(),
            None => match literal_select(sql) {
                Some(canned) => canned.fields,
                None => {
                    return Err(NativeError::new(
                        code::ER_PARSE_ERROR,
                        format!("You have an error in your SQL syntax near '{}'", sql),
                    )
                    .with_sqlstate("42000"));
                }
            },
        };
        self.next_stmt += 1;
        let id = self.next_stmt;
        self.statements.insert(id, (sql.to_string(), param_count));
        MemoryStats::bump(&self.engine.stats.statements_prepared, 1);
        Ok(PreparedInfo {
            id,
            param_count,
            fields,
        })
    }

    fn execute(
        &mut self,
        stmt: u32,
        params: &[Value],
        mode: ResultMode,
    ) -> NativeResult<NativeOutcome> {
        self.check_ready()?;
        let (sql, param_count) = self.statements.get(&stmt).cloned().ok_or_else(|| {
            NativeError::new(
                code::ER_UNKNOWN_STMT_HANDLER,
                format!("Unknown prepared statement handler ({}) given to execute", stmt),
            )
            .with_sqlstate("HY000")
        })?;
        if params.len() != param_count {
            return Err(NativeError::new(
                2031,
                "No data supplied for parameters in prepared statement",
            ));
        }
        self.run(&sql, params, mode)
    }

    fn fetch_row(&mut self) -> NativeResult<Option<Vec<Value>>> {
        if self.lost {
            return Err(NativeError::server_gone());
        }
        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };
        if let Some((fetch, delay)) = pending.stall
            && fetch == pending.fetches
        {
            std::thread::sleep(delay);
        }
        pending.fetches += 1;
        if let Some(row) = pending.rows.pop_front() {
            return Ok(Some(row));
        }
        let error = pending.error.take();
        self.pending = None;
        match error {
            Some(error) => {
                if error.is_connection_lost() {
                    self.lost = true;
                }
                Err(error)
            }
            None => Ok(None),
        }
    }

    fn discard_pending(&mut self) -> NativeResult<u64> {
        if self.lost {
            return Err(NativeError::server_gone());
        }
        let discarded = self
            .pending
            .take()
            .map_or(0, |pending| pending.rows.len() as u64);
        MemoryStats::bump(&self.engine.stats.rows_discarded, discarded);
        Ok(discarded)
    }

    fn close_statement(&mut self, stmt: u32) -> NativeResult<()> {
        if self.statements.remove(&stmt).is_some() {
            MemoryStats::bump(&self.engine.stats.statements_closed, 1);
        }
        Ok(())
    }

    fn ping(&mut self) -> NativeResult<()> {
        if self.lost {
            return Err(NativeError::server_gone());
        }
        Ok(())
    }

    fn close(self: Box<Self>) {
        MemoryStats::bump(&self.engine.stats.closes, 1);
    }

    fn abandon(self: Box<Self>) {
        MemoryStats::bump(&self.engine.stats.abandons, 1);
    }
}
