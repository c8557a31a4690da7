//! Cooperative execution gate.
//!
//! A native session can only process one command at a time. Every operation
//! that touches it must hold the connection's [`Gate`] for its whole
//! duration. Acquisition never waits: if the gate is held, the caller gets
//! [`Error::Busy`] immediately.
//!
//! The gate is released when the [`GatePermit`] is dropped, which covers
//! every exit path including errors and cancelled tasks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

/// Who holds a gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    /// Operation label, e.g. `query` or `stream`
    pub op: &'static str,
    /// Tokio task that acquired the gate, when acquired from inside a task
    pub task: Option<tokio::task::Id>,
}

impl Owner {
    /// Owner for `op` on the current task.
    pub fn current(op: &'static str) -> Self {
        Self {
            op,
            task: tokio::task::try_id(),
        }
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.task {
            Some(task) => write!(f, "{} (task {})", self.op, task),
            None => f.write_str(self.op),
        }
    }
}

/// Single-flight gate scoped to one connection.
#[derive(Debug, Default)]
pub struct Gate {
    holder: Mutex<Option<Owner>>,
}

impl Gate {
    /// Create an open gate.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Owner>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the gate, or fail with [`Error::Busy`] if someone holds it.
    pub fn acquire(self: &Arc<Self>, owner: Owner) -> Result<GatePermit> {
        let mut holder = self.lock();
        if let Some(current) = holder.as_ref() {
            return Err(Error::Busy(format!("{} in progress", current)));
        }
        *holder = Some(owner);
        Ok(GatePermit {
            gate: Arc::clone(self),
        })
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<Owner> {
        self.lock().clone()
    }

    /// Returns true while a permit is alive.
    pub fn is_held(&self) -> bool {
        self.lock().is_some()
    }
}

/// Proof of holding a [`Gate`]. Dropping it opens the gate.
#[derive(Debug)]
#[must_use = "the gate is released as soon as the permit is dropped"]
pub struct GatePermit {
    gate: Arc<Gate>,
}

impl GatePermit {
    /// Change the label reported to callers that find the gate busy.
    pub fn relabel(&self, op: &'static str) {
        if let Some(owner) = self.gate.lock().as_mut() {
            owner.op = op;
        }
    }

    /// Release the gate now.
    pub fn release(self) {}
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        *self.gate.lock() = None;
    }
}
