//! Result cursors.
//!
//! A buffered cursor owns every row up front and never touches the session
//! again. A streaming cursor pulls rows one at a time and keeps the
//! connection's gate until it reaches the end of rows or is freed.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, HandleKind, Result};
use crate::gate::GatePermit;
use crate::handler::{CollectHandler, RowHandler, Summary};
use crate::native::NativeOutcome;
use crate::row::{Field, FromRow, Row};
use crate::state::{FreeAction, StreamAction, StreamStateMachine};
use crate::value::Value;

use super::shared::{ConnShared, drain};
use super::statement::StmtShared;

/// Handles a cursor keeps alive until it is freed.
pub(crate) struct Origin {
    conn: Arc<ConnShared>,
    _stmt: Option<Arc<StmtShared>>,
}

impl Origin {
    pub(crate) fn new(conn: Arc<ConnShared>, stmt: Option<Arc<StmtShared>>) -> Self {
        Self { conn, _stmt: stmt }
    }
}

/// Result of a query or statement execution.
pub enum Cursor {
    /// Every row was materialized by the engine.
    Buffered(BufferedCursor),
    /// Rows are fetched on demand.
    Streaming(StreamingCursor),
}

impl Cursor {
    pub(crate) fn from_outcome(
        outcome: NativeOutcome,
        permit: Option<GatePermit>,
        origin: Origin,
    ) -> Self {
        let fields: Arc<[Field]> = outcome.fields.into();
        if outcome.pending {
            if let Some(permit) = &permit {
                permit.relabel("streaming result");
            }
            Cursor::Streaming(StreamingCursor {
                fields,
                machine: StreamStateMachine::new(),
                summary: outcome.summary,
                permit,
                origin: Some(origin),
            })
        } else {
            drop(permit);
            Cursor::Buffered(BufferedCursor {
                fields,
                total: outcome.rows.len(),
                rows: outcome.rows.into_iter(),
                processed: 0,
                summary: outcome.summary,
                origin: Some(origin),
            })
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Cursor::Streaming(_))
    }

    /// Column metadata. Fails once the cursor is freed.
    pub fn fields(&self) -> Result<&[Field]> {
        match self {
            Cursor::Buffered(c) => c.fields(),
            Cursor::Streaming(c) => c.fields(),
        }
    }

    /// Next row, or `None` at the end of results (repeatedly).
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        match self {
            Cursor::Buffered(c) => c.next_row(),
            Cursor::Streaming(c) => c.next_row().await,
        }
    }

    /// Release the cursor. Pending streaming rows are drained first.
    ///
    /// Freeing twice is a no-op.
    pub async fn free(&mut self) -> Result<()> {
        match self {
            Cursor::Buffered(c) => {
                c.free();
                Ok(())
            }
            Cursor::Streaming(c) => c.free().await,
        }
    }

    /// Total rows; unknown for streaming results.
    pub fn row_count(&self) -> Option<usize> {
        match self {
            Cursor::Buffered(c) => Some(c.row_count()),
            Cursor::Streaming(_) => None,
        }
    }

    /// Rows handed out so far.
    pub fn rows_processed(&self) -> u64 {
        match self {
            Cursor::Buffered(c) => c.rows_processed(),
            Cursor::Streaming(c) => c.rows_processed(),
        }
    }

    pub fn summary(&self) -> Summary {
        match self {
            Cursor::Buffered(c) => c.summary,
            Cursor::Streaming(c) => c.summary,
        }
    }

    /// True once no row is left to hand out.
    pub fn is_complete(&self) -> bool {
        match self {
            Cursor::Buffered(c) => c.is_complete(),
            Cursor::Streaming(c) => c.machine.is_complete(),
        }
    }

    pub fn is_freed(&self) -> bool {
        match self {
            Cursor::Buffered(c) => c.is_freed(),
            Cursor::Streaming(c) => c.machine.is_freed(),
        }
    }

    /// Feed the remaining rows to `handler`, then free the cursor.
    pub async fn drive<H: RowHandler>(&mut self, handler: &mut H) -> Result<()> {
        let fields = self.fields()?;
        if !fields.is_empty() {
            handler.result_start(fields)?;
        }
        while let Some(row) = self.next_row().await? {
            handler.row(&row)?;
        }
        handler.result_end(&self.summary())?;
        self.free().await
    }

    /// Decode the remaining rows and free the cursor.
    pub async fn collect<T: FromRow>(&mut self) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.drive(&mut handler).await?;
        Ok(handler.into_rows())
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("streaming", &self.is_streaming())
            .field("rows_processed", &self.rows_processed())
            .field("complete", &self.is_complete())
            .field("freed", &self.is_freed())
            .finish()
    }
}

/// Fully materialized result.
pub struct BufferedCursor {
    fields: Arc<[Field]>,
    rows: std::vec::IntoIter<Vec<Value>>,
    total: usize,
    processed: usize,
    summary: Summary,
    origin: Option<Origin>,
}

impl BufferedCursor {
    fn check(&self) -> Result<()> {
        if self.origin.is_none() {
            return Err(Error::UseAfterFree(HandleKind::Result));
        }
        Ok(())
    }

    pub fn fields(&self) -> Result<&[Field]> {
        self.check()?;
        Ok(&self.fields)
    }

    pub fn next_row(&mut self) -> Result<Option<Row>> {
        self.check()?;
        Ok(self.rows.next().map(|values| {
            self.processed += 1;
            Row::new(Arc::clone(&self.fields), values)
        }))
    }

    pub fn row_count(&self) -> usize {
        self.total
    }

    pub fn rows_processed(&self) -> u64 {
        self.processed as u64
    }

    /// True once every row was handed out or the cursor was freed.
    pub fn is_complete(&self) -> bool {
        self.is_freed() || self.rows.as_slice().is_empty()
    }

    pub fn is_freed(&self) -> bool {
        self.origin.is_none()
    }

    /// Drop the rows and the references to the owning handles.
    pub fn free(&mut self) {
        self.rows = Vec::new().into_iter();
        self.origin = None;
    }
}

/// Result whose rows stay on the native side until fetched.
pub struct StreamingCursor {
    fields: Arc<[Field]>,
    machine: StreamStateMachine,
    summary: Summary,
    /// Held while rows are pending
    permit: Option<GatePermit>,
    origin: Option<Origin>,
}

impl StreamingCursor {
    pub fn fields(&self) -> Result<&[Field]> {
        self.machine.check_fields()?;
        Ok(&self.fields)
    }

    pub fn rows_processed(&self) -> u64 {
        self.machine.rows_fetched()
    }

    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.machine.next()? == StreamAction::EndOfRows {
            return Ok(None);
        }
        let Some(origin) = self.origin.as_ref() else {
            return Err(Error::UseAfterFree(HandleKind::Result));
        };

        // the job always succeeds so that a fetch error reaches the orphan
        // handler and is carried to the next call like a row
        let fetched = origin
            .conn
            .call(
                "fetch",
                None,
                |shared, slot| {
                    if let Some(carried) = slot.carry.take() {
                        return Ok(carried);
                    }
                    let result = shared.with_native(slot, Error::Stream, |native| native.fetch_row());
                    if result.is_err() {
                        // leave the session ready for the next command
                        if let Err(e) = drain(shared, slot) {
                            debug!(error = %e, "draining failed stream");
                        }
                    }
                    Ok(result)
                },
                |_, slot, fetched| slot.carry = Some(fetched),
            )
            .await
            .and_then(|(fetched, _)| fetched);

        match fetched {
            Ok(Some(values)) => {
                self.machine.on_row();
                Ok(Some(Row::new(Arc::clone(&self.fields), values)))
            }
            Ok(None) => {
                self.machine.on_end();
                self.permit = None;
                debug!(rows = self.machine.rows_fetched(), "streaming result complete");
                Ok(None)
            }
            Err(Error::Stream(native)) => {
                self.machine.on_error(native.clone());
                self.permit = None;
                Err(Error::Stream(native))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn free(&mut self) -> Result<()> {
        match self.machine.free() {
            FreeAction::Nothing => {
                self.permit = None;
                self.origin = None;
                Ok(())
            }
            FreeAction::Drain => {
                let permit = self.permit.take();
                let Some(origin) = self.origin.take() else {
                    return Ok(());
                };
                let (discarded, permit) = origin
                    .conn
                    .call("drain", permit, drain, |_, _, _| {})
                    .await?;
                drop(permit);
                debug!(discarded, "streaming result freed before completion");
                Ok(())
            }
        }
    }
}

impl Drop for StreamingCursor {
    fn drop(&mut self) {
        if !self.machine.is_pending() {
            return;
        }
        self.machine.free();
        if let Some(origin) = self.origin.take() {
            debug!("streaming result dropped with rows pending; draining in background");
            origin.conn.detach("drain", self.permit.take(), drain);
        }
    }
}
