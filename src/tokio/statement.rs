//! Prepared statements.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::{Error, HandleKind, NativeError, Result, code};
use crate::handler::DropHandler;
use crate::native::{PreparedInfo, ResultMode};
use crate::row::{Field, FromRow};
use crate::value::ToParams;

use super::cursor::{Cursor, Origin};
use super::shared::{ConnShared, discard_orphaned};

pub(crate) struct StmtShared {
    conn: Arc<ConnShared>,
    id: u32,
    /// Session generation the statement was prepared on
    generation: u64,
    sql: String,
    param_count: usize,
    fields: Arc<[Field]>,
    closed: AtomicBool,
}

impl Drop for StmtShared {
    fn drop(&mut self) {
        debug!(stmt = self.id, "statement released");
        self.conn.queue_statement_close(self.generation, self.id);
    }
}

/// A prepared statement.
///
/// The statement keeps its connection alive. Cloning (or [`retain`](Self::retain))
/// adds an owner; the native statement is closed once every owner, including
/// cursors produced by [`execute`](Self::execute), has gone away.
pub struct Statement {
    shared: Arc<StmtShared>,
}

impl Statement {
    pub(crate) fn new(conn: Arc<ConnShared>, sql: &str, info: PreparedInfo, generation: u64) -> Self {
        Self {
            shared: Arc::new(StmtShared {
                conn,
                id: info.id,
                generation,
                sql: sql.to_string(),
                param_count: info.param_count,
                fields: info.fields.into(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Native statement id.
    pub fn id(&self) -> u32 {
        self.shared.id
    }

    pub fn sql(&self) -> &str {
        &self.shared.sql
    }

    /// Number of `?` placeholders.
    pub fn param_count(&self) -> usize {
        self.shared.param_count
    }

    /// Result columns the statement produces.
    pub fn fields(&self) -> &[Field] {
        &self.shared.fields
    }

    /// Add an owner.
    pub fn retain(&self) -> Statement {
        Statement {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Give up this owner.
    pub fn release(self) {}

    /// Live owners of the statement (handles and cursors).
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Explicitly close the statement.
    ///
    /// Every other owner sees the statement as closed from now on. The
    /// connection is unaffected.
    pub fn close(self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            debug!(stmt = self.shared.id, "statement closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::UseAfterFree(HandleKind::Statement));
        }
        self.shared.conn.lifecycle.ensure_open()
    }

    /// Execute with `params`, buffering every row.
    pub async fn execute<P: ToParams>(&self, params: P) -> Result<Cursor> {
        self.execute_with_mode(params, ResultMode::Buffered).await
    }

    /// Execute with `params`, streaming rows.
    pub async fn execute_stream<P: ToParams>(&self, params: P) -> Result<Cursor> {
        self.execute_with_mode(params, ResultMode::Streaming).await
    }

    pub async fn execute_with_mode<P: ToParams>(&self, params: P, mode: ResultMode) -> Result<Cursor> {
        self.ensure_open()?;
        let params = params.to_params();
        if params.len() != self.shared.param_count {
            return Err(Error::InvalidUsage(format!(
                "statement expects {} parameters, got {}",
                self.shared.param_count,
                params.len()
            )));
        }

        let conn = &self.shared.conn;
        let permit = conn.begin("execute")?;
        let stmt = Arc::clone(&self.shared);
        let (outcome, permit) = conn
            .call(
                "execute",
                Some(permit),
                move |shared, slot| {
                    shared.command(slot, Error::Query, |native| {
                        if stmt.generation != shared.generation() {
                            return Err(NativeError::new(
                                code::ER_UNKNOWN_STMT_HANDLER,
                                "prepared statement was invalidated by a reconnect",
                            ));
                        }
                        native.execute(stmt.id, &params, mode)
                    })
                },
                discard_orphaned,
            )
            .await?;
        conn.record(&outcome.summary);
        Ok(Cursor::from_outcome(
            outcome,
            permit,
            Origin::new(Arc::clone(conn), Some(Arc::clone(&self.shared))),
        ))
    }

    /// Execute and discard any rows. Returns the affected row count.
    pub async fn execute_drop<P: ToParams>(&self, params: P) -> Result<u64> {
        let mut handler = DropHandler::new();
        self.execute(params).await?.drive(&mut handler).await?;
        Ok(handler.rows_affected())
    }

    /// Execute and decode every row.
    pub async fn execute_collect<T: FromRow, P: ToParams>(&self, params: P) -> Result<Vec<T>> {
        self.execute(params).await?.collect().await
    }

    /// Execute and decode the first row, if any.
    pub async fn execute_first<T: FromRow, P: ToParams>(&self, params: P) -> Result<Option<T>> {
        let mut cursor = self.execute(params).await?;
        let row = cursor.next_row().await?;
        cursor.free().await?;
        row.map(|row| T::from_row(&row)).transpose()
    }
}

impl Clone for Statement {
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("id", &self.shared.id)
            .field("sql", &self.shared.sql)
            .field("param_count", &self.shared.param_count)
            .field("closed", &self.is_closed())
            .finish()
    }
}
