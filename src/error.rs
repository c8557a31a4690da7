//! Error types for zero-dbcore.

use std::time::Duration;

use thiserror::Error;

/// Result type for zero-dbcore operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Result type returned across the native engine boundary.
pub type NativeResult<T> = core::result::Result<T, NativeError>;

/// Client-side error codes used when the failure did not come from the server.
pub mod code {
    /// Unknown client error.
    pub const CR_UNKNOWN_ERROR: u32 = 2000;
    /// Can't connect to the server.
    pub const CR_CONNECTION_ERROR: u32 = 2002;
    /// The server has gone away.
    pub const CR_SERVER_GONE_ERROR: u32 = 2006;
    /// Lost connection during query.
    pub const CR_SERVER_LOST: u32 = 2013;
    /// Commands out of sync; a result is still pending.
    pub const CR_COMMANDS_OUT_OF_SYNC: u32 = 2014;
    /// Lost connection during connection setup.
    pub const CR_SERVER_LOST_EXTENDED: u32 = 2055;
    /// Unknown statement handler.
    pub const ER_UNKNOWN_STMT_HANDLER: u32 = 1243;
    /// SQL syntax error.
    pub const ER_PARSE_ERROR: u32 = 1064;
}

/// Error reported by the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    /// Native error number
    pub code: u32,
    /// Five character SQLSTATE, when the engine provides one
    pub sqlstate: Option<String>,
    /// Human readable message
    pub message: String,
}

impl NativeError {
    /// Create an error without SQLSTATE.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            sqlstate: None,
            message: message.into(),
        }
    }

    /// Attach a SQLSTATE.
    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    /// Returns true if the native session is gone and must be re-established.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self.code,
            code::CR_SERVER_GONE_ERROR | code::CR_SERVER_LOST | code::CR_SERVER_LOST_EXTENDED
        )
    }

    pub(crate) fn server_gone() -> Self {
        Self::new(code::CR_SERVER_GONE_ERROR, "server has gone away")
    }
}

impl std::fmt::Display for NativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {}", self.message, self.code)?;
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, ", SQLSTATE {}", sqlstate)?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for NativeError {}

/// Kind of handle an operation was attempted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// A connection handle
    Connection,
    /// A prepared statement handle
    Statement,
    /// A result cursor
    Result,
}

impl std::fmt::Display for HandleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandleKind::Connection => "connection",
            HandleKind::Statement => "statement",
            HandleKind::Result => "result",
        };
        f.write_str(name)
    }
}

/// Error type for zero-dbcore.
#[derive(Debug, Error)]
pub enum Error {
    /// The session could not be established or maintained
    #[error("Connection error: {0}")]
    Connection(NativeError),

    /// The engine rejected the SQL text or its parameters
    #[error("Query error: {0}")]
    Query(NativeError),

    /// A gated call exceeded its configured timeout
    #[error("Timeout: {op} did not complete within {after:?}")]
    Timeout {
        /// Operation that timed out
        op: &'static str,
        /// Configured limit
        after: Duration,
    },

    /// Another operation currently holds the connection
    #[error("Connection busy: {0}")]
    Busy(String),

    /// Fetching from a streaming result failed
    #[error("Stream error: {0}")]
    Stream(NativeError),

    /// Operation on a closed or freed handle
    #[error("Use after free: {0} is already closed")]
    UseAfterFree(HandleKind),

    /// Value could not be decoded into the requested type
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid usage (e.g., parameter count mismatch)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),
}

impl From<std::convert::Infallible> for Error {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl Error {
    /// Returns true for failures worth retrying later (timeouts and busy connections).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Busy(_))
    }

    /// Returns true if the error indicates the native session was lost.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Query(native) | Error::Stream(native) => native.is_connection_lost(),
            _ => false,
        }
    }

    /// The native error this error was derived from, if any.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Error::Connection(native) | Error::Query(native) | Error::Stream(native) => {
                Some(native)
            }
            _ => None,
        }
    }

    /// Native error code, if any.
    pub fn native_code(&self) -> Option<u32> {
        self.native().map(|n| n.code)
    }

    /// SQLSTATE, if the engine reported one.
    pub fn sqlstate(&self) -> Option<&str> {
        self.native().and_then(|n| n.sqlstate.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_error_display() {
        let err = NativeError::new(1146, "Table 'db.t' doesn't exist").with_sqlstate("42S02");
        assert_eq!(
            err.to_string(),
            "Table 'db.t' doesn't exist (code 1146, SQLSTATE 42S02)"
        );
        assert_eq!(NativeError::new(2000, "oops").to_string(), "oops (code 2000)");
    }

    #[test]
    fn test_classification() {
        let lost = Error::Query(NativeError::new(code::CR_SERVER_LOST, "lost"));
        assert!(lost.is_connection_broken());
        assert!(!lost.is_transient());

        let busy = Error::Busy("query".into());
        assert!(busy.is_transient());
        assert_eq!(busy.native_code(), None);

        let syntax = Error::Query(NativeError::new(code::ER_PARSE_ERROR, "syntax").with_sqlstate("42000"));
        assert!(!syntax.is_connection_broken());
        assert_eq!(syntax.native_code(), Some(1064));
        assert_eq!(syntax.sqlstate(), Some("42000"));
    }
}
