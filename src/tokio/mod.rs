//! Asynchronous client handles using Tokio.

mod conn;
mod cursor;
mod pool;
mod shared;
mod statement;

pub use conn::Connection;
pub use cursor::{BufferedCursor, Cursor, StreamingCursor};
pub use pool::{Pool, PooledConn};
pub use statement::Statement;
