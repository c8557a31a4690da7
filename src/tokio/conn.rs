//! Asynchronous connection handle.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::handler::{DropHandler, FirstRowHandler};
use crate::native::{Driver, ResultMode, ServerInfo};
use crate::offload::{Offload, default_offload};
use crate::opts::Opts;
use crate::row::FromRow;
use crate::state::ConnectionFlags;

use super::cursor::{Cursor, Origin};
use super::shared::{ConnShared, discard_orphaned};
use super::statement::Statement;

/// Asynchronous connection.
///
/// Every method that talks to the engine runs the native call on a
/// background worker. Only one such operation may be in flight per
/// connection; a second one fails with [`Error::Busy`] instead of waiting.
///
/// The handle is a counted reference. [`retain`](Self::retain) (or `clone`)
/// adds an owner, dropping or [`release`](Self::release) removes one, and
/// the native session is released when the last owner (including
/// statements and cursors) goes away.
pub struct Connection {
    shared: Arc<ConnShared>,
}

impl Connection {
    /// Connect using the tokio blocking pool for native calls.
    pub async fn open<O: TryInto<Opts>>(opts: O, driver: Arc<dyn Driver>) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        Self::open_with_offload(opts, driver, default_offload()).await
    }

    /// Connect using a custom executor for native calls.
    pub async fn open_with_offload<O: TryInto<Opts>>(
        opts: O,
        driver: Arc<dyn Driver>,
        offload: Arc<dyn Offload>,
    ) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        let shared = ConnShared::open(opts, driver, offload).await?;
        Ok(Self { shared })
    }

    /// Run a query, buffering every row.
    pub async fn query(&self, sql: &str) -> Result<Cursor> {
        self.query_with_mode(sql, ResultMode::Buffered).await
    }

    /// Run a query, streaming rows.
    ///
    /// The connection stays busy until the cursor reaches the end of rows or
    /// is freed.
    pub async fn query_stream(&self, sql: &str) -> Result<Cursor> {
        self.query_with_mode(sql, ResultMode::Streaming).await
    }

    pub async fn query_with_mode(&self, sql: &str, mode: ResultMode) -> Result<Cursor> {
        let permit = self.shared.begin("query")?;
        let sql = sql.to_string();
        let (outcome, permit) = self
            .shared
            .call(
                "query",
                Some(permit),
                move |shared, slot| shared.command(slot, Error::Query, |native| native.query(&sql, mode)),
                discard_orphaned,
            )
            .await?;
        self.shared.record(&outcome.summary);
        Ok(Cursor::from_outcome(
            outcome,
            permit,
            Origin::new(Arc::clone(&self.shared), None),
        ))
    }

    /// Run a query and discard any rows. Returns the affected row count.
    pub async fn query_drop(&self, sql: &str) -> Result<u64> {
        let mut handler = DropHandler::new();
        self.query(sql).await?.drive(&mut handler).await?;
        Ok(handler.rows_affected())
    }

    /// Run a query and decode every row.
    pub async fn query_collect<T: FromRow>(&self, sql: &str) -> Result<Vec<T>> {
        self.query(sql).await?.collect().await
    }

    /// Run a query and decode the first row, if any.
    pub async fn query_first<T: FromRow>(&self, sql: &str) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.query(sql).await?.drive(&mut handler).await?;
        Ok(handler.into_row())
    }

    /// Prepare a statement.
    pub async fn prepare(&self, sql: &str) -> Result<Statement> {
        let permit = self.shared.begin("prepare")?;
        let text = sql.to_string();
        let (prepared, permit) = self
            .shared
            .call(
                "prepare",
                Some(permit),
                move |shared, slot| {
                    let info = shared.command(slot, Error::Query, |native| native.prepare(&text))?;
                    Ok((info, shared.generation()))
                },
                |shared, slot, (info, generation)| {
                    shared.queue_statement_close(generation, info.id);
                    if let Err(e) = shared.command(slot, Error::Query, |_| Ok(())) {
                        debug!(stmt = info.id, error = %e, "closing orphaned statement failed");
                    }
                },
            )
            .await?;
        drop(permit);
        let (info, generation) = prepared;
        debug!(stmt = info.id, params = info.param_count, "statement prepared");
        Ok(Statement::new(Arc::clone(&self.shared), sql, info, generation))
    }

    /// Check the session is alive, reconnecting first when enabled.
    pub async fn ping(&self) -> Result<()> {
        let permit = self.shared.begin("ping")?;
        let ((), permit) = self
            .shared
            .call(
                "ping",
                Some(permit),
                |shared, slot| shared.command(slot, Error::Connection, |native| native.ping()),
                |_, _, ()| {},
            )
            .await?;
        drop(permit);
        Ok(())
    }

    /// Close the connection.
    ///
    /// Every other owner sees the connection as closed from now on. The
    /// native session is closed when the last owner goes away. Closing
    /// twice is a no-op.
    pub fn close(self) {
        if self.shared.lifecycle.mark_closed() {
            debug!(thread_id = self.shared.thread_id(), "connection closed");
        }
    }

    /// Add an owner.
    pub fn retain(&self) -> Connection {
        Connection {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Give up this owner.
    pub fn release(self) {}

    /// Live owners of the connection (handles, statements and cursors).
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lifecycle.is_closed()
    }

    /// True while an operation or streaming result holds the connection.
    pub fn is_busy(&self) -> bool {
        self.shared.gate.is_held()
    }

    /// True after the session was lost and before it is re-established.
    pub fn is_broken(&self) -> bool {
        self.shared.is_broken()
    }

    pub fn flags(&self) -> ConnectionFlags {
        self.shared.lifecycle.snapshot(self.is_busy())
    }

    /// Whether dropping the last owner closes the session gracefully.
    ///
    /// When disabled, a session that was never explicitly closed is
    /// abandoned instead, leaving it to whoever shares it (e.g. a forked
    /// process).
    pub fn set_automatic_close(&self, value: bool) {
        self.shared.lifecycle.set_automatic_close(value);
    }

    pub fn server_info(&self) -> ServerInfo {
        self.shared.server_info()
    }

    /// Server-side id of the current session.
    pub fn thread_id(&self) -> u64 {
        self.shared.thread_id()
    }

    pub fn encoding(&self) -> &str {
        &self.shared.opts.encoding
    }

    pub fn opts(&self) -> &Opts {
        &self.shared.opts
    }

    /// Rows changed by the last command.
    pub fn affected_rows(&self) -> u64 {
        self.shared.summary().affected_rows
    }

    /// Id generated by the last INSERT.
    pub fn last_insert_id(&self) -> u64 {
        self.shared.summary().last_insert_id
    }

    pub fn warning_count(&self) -> u32 {
        self.shared.summary().warning_count
    }

    /// Escape `s` for inclusion in a quoted SQL string literal.
    pub fn escape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '\0' => out.push_str("\\0"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\\' => out.push_str("\\\\"),
                '\'' => out.push_str("\\'"),
                '"' => out.push_str("\\\""),
                '\x1a' => out.push_str("\\Z"),
                c => out.push(c),
            }
        }
        out
    }
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("thread_id", &self.thread_id())
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(Connection::escape("plain"), "plain");
        assert_eq!(Connection::escape("it's"), "it\\'s");
        assert_eq!(Connection::escape("a\"b"), "a\\\"b");
        assert_eq!(Connection::escape("back\\slash"), "back\\\\slash");
        assert_eq!(Connection::escape("nul\0"), "nul\\0");
        assert_eq!(Connection::escape("line\r\nbreak"), "line\\r\\nbreak");
        assert_eq!(Connection::escape("\x1a"), "\\Z");
    }
}
