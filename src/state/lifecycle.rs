//! Connection lifecycle flags.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, HandleKind, Result};

/// Snapshot of a connection's lifecycle flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionFlags {
    /// Lost sessions are re-established on the next call
    pub reconnect_enabled: bool,
    /// Dropping the last owner closes the session gracefully
    pub automatic_close: bool,
    /// The session was established
    pub initialized: bool,
    /// An operation currently holds the gate
    pub active: bool,
    /// The connection was closed
    pub closed: bool,
}

/// Shared lifecycle flags of one connection.
#[derive(Debug)]
pub struct Lifecycle {
    reconnect: bool,
    automatic_close: AtomicBool,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl Lifecycle {
    /// Flags for a connection that is about to be established.
    pub fn new(reconnect: bool, automatic_close: bool) -> Self {
        Self {
            reconnect,
            automatic_close: AtomicBool::new(automatic_close),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Record that the session is up.
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Mark closed. Returns true only for the call that performed the transition.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Fail with [`Error::UseAfterFree`] once closed.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::UseAfterFree(HandleKind::Connection));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn reconnect(&self) -> bool {
        self.reconnect
    }

    pub fn automatic_close(&self) -> bool {
        self.automatic_close.load(Ordering::Acquire)
    }

    pub fn set_automatic_close(&self, value: bool) {
        self.automatic_close.store(value, Ordering::Release);
    }

    /// Whether releasing the last owner should close the session gracefully.
    pub fn close_gracefully(&self) -> bool {
        self.is_closed() || self.automatic_close()
    }

    /// Take a snapshot, with `active` supplied by the gate.
    pub fn snapshot(&self, active: bool) -> ConnectionFlags {
        ConnectionFlags {
            reconnect_enabled: self.reconnect,
            automatic_close: self.automatic_close(),
            initialized: self.initialized.load(Ordering::Acquire),
            active,
            closed: self.is_closed(),
        }
    }
}
