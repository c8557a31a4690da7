//! Lifecycle core for native database clients.
//!
//! The core sits between an async application and a blocking native client
//! library. It owns the rules the native library leaves to its caller:
//!
//! - **Counted handles**: connections, statements and cursors keep each other
//!   alive, and the native session is released exactly once, by the last owner
//! - **One operation at a time**: every connection has a gate; a second
//!   operation fails fast with [`Error::Busy`]
//! - **Off-thread native calls**: blocking calls run on a background worker,
//!   bounded by the configured timeouts
//! - **Streaming results**: rows are fetched on demand and pending rows are
//!   drained before the connection is reused
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use zero_dbcore::memory::MemoryDriver;
//! use zero_dbcore::tokio::Connection;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> zero_dbcore::Result<()> {
//! let driver = MemoryDriver::new();
//! let conn = Connection::open("mysql://localhost", Arc::new(driver)).await?;
//!
//! let rows: Vec<(i64,)> = conn.query_collect("SELECT 1").await?;
//! assert_eq!(rows, vec![(1,)]);
//!
//! let mut cursor = conn.query_stream("SELECT 2").await?;
//! while let Some(row) = cursor.next_row().await? {
//!     let n: i64 = row.try_get(0)?;
//!     assert_eq!(n, 2);
//! }
//!
//! conn.close();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod gate;
pub mod handler;
pub mod memory;
pub mod native;
pub mod offload;
pub mod opts;
pub mod row;
pub mod state;
pub mod tokio;
pub mod value;

pub use error::{Error, HandleKind, NativeError, NativeResult, Result};
pub use handler::{CollectHandler, DropHandler, FirstRowHandler, RowHandler, Summary};
pub use native::{Driver, NativeConnection, NativeOutcome, PreparedInfo, ResultMode, ServerInfo};
pub use offload::{InlineOffload, Offload, TokioOffload};
pub use opts::Opts;
pub use row::{ColumnType, Field, FromRow, Row};
pub use state::ConnectionFlags;
pub use value::{FromValue, ToParams, Value};
