//! Typed result handlers.

use crate::error::Result;
use crate::row::{Field, FromRow, Row};

/// Completion summary of a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Rows changed by INSERT/UPDATE/DELETE
    pub affected_rows: u64,
    /// Id generated by the last INSERT
    pub last_insert_id: u64,
    /// Number of warnings raised
    pub warning_count: u32,
}

/// Handler for result rows.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only (with affected row count)
pub trait RowHandler {
    /// Called when a result set begins.
    fn result_start(&mut self, fields: &[Field]) -> Result<()> {
        let _ = fields;
        Ok(())
    }

    /// Called for each data row.
    fn row(&mut self, row: &Row) -> Result<()>;

    /// Called when a result set ends.
    fn result_end(&mut self, summary: &Summary) -> Result<()> {
        let _ = summary;
        Ok(())
    }
}

/// A handler that discards all results.
#[derive(Debug, Default)]
pub struct DropHandler {
    rows_affected: u64,
}

impl DropHandler {
    /// Create a new drop handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of rows affected.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }
}

impl RowHandler for DropHandler {
    fn row(&mut self, _row: &Row) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, summary: &Summary) -> Result<()> {
        self.rows_affected = summary.affected_rows;
        Ok(())
    }
}

/// Handler that collects typed rows.
///
/// # Example
///
/// ```ignore
/// let mut handler: CollectHandler<(i64, String)> = CollectHandler::new();
/// cursor.drive(&mut handler).await?;
/// for (id, name) in handler.into_rows() {
///     println!("{}: {}", id, name);
/// }
/// ```
pub struct CollectHandler<T> {
    rows: Vec<T>,
}

impl<T> Default for CollectHandler<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T> CollectHandler<T> {
    /// Create a new collect handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get collected rows.
    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    /// Take collected rows.
    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }

    /// Get the number of collected rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if no rows were collected.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<T: FromRow> RowHandler for CollectHandler<T> {
    fn row(&mut self, row: &Row) -> Result<()> {
        self.rows.push(T::from_row(row)?);
        Ok(())
    }
}

/// Handler that collects only the first row.
pub struct FirstRowHandler<T> {
    row: Option<T>,
}

impl<T> Default for FirstRowHandler<T> {
    fn default() -> Self {
        Self { row: None }
    }
}

impl<T> FirstRowHandler<T> {
    /// Create a new first row handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the first row if present.
    pub fn get(&self) -> Option<&T> {
        self.row.as_ref()
    }

    /// Take the first row.
    pub fn into_row(self) -> Option<T> {
        self.row
    }
}

impl<T: FromRow> RowHandler for FirstRowHandler<T> {
    fn row(&mut self, row: &Row) -> Result<()> {
        if self.row.is_none() {
            self.row = Some(T::from_row(row)?);
        }
        Ok(())
    }
}
