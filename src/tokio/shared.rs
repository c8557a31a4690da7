//! State shared by a connection and every handle derived from it.
//!
//! `Connection`, `Statement` and cursors all hold an `Arc<ConnShared>`. The
//! native session lives inside and is released by `Drop` when the last of
//! them goes away, so it is freed exactly once no matter which handle dies
//! last.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_queue::SegQueue;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, NativeError, NativeResult, Result, code};
use crate::gate::{Gate, GatePermit, Owner};
use crate::handler::Summary;
use crate::native::{Driver, NativeConnection, NativeOutcome, ServerInfo};
use crate::offload::Offload;
use crate::opts::Opts;
use crate::state::Lifecycle;
use crate::value::Value;

/// The native session plus per-session scratch state.
///
/// Only ever locked from background jobs.
pub(crate) struct NativeSlot {
    conn: Option<Box<dyn NativeConnection>>,
    /// Fetch result, row or error, produced for a caller that stopped waiting.
    pub(crate) carry: Option<Result<Option<Vec<Value>>>>,
}

pub(crate) struct ConnShared {
    pub(crate) opts: Opts,
    driver: Arc<dyn Driver>,
    offload: Arc<dyn Offload>,
    native: Mutex<NativeSlot>,
    pub(crate) gate: Arc<Gate>,
    pub(crate) lifecycle: Lifecycle,
    broken: AtomicBool,
    /// Bumped on every reconnect; statements from older sessions are stale.
    generation: AtomicU64,
    server_info: Mutex<ServerInfo>,
    thread_id: AtomicU64,
    affected_rows: AtomicU64,
    last_insert_id: AtomicU64,
    warning_count: AtomicU32,
    /// Statements released by their last owner, closed at the next command.
    stmt_closes: SegQueue<(u64, u32)>,
}

fn aborted(op: &'static str) -> Error {
    Error::Connection(NativeError::new(
        code::CR_UNKNOWN_ERROR,
        format!("{} was aborted by the background worker", op),
    ))
}

impl ConnShared {
    /// Establish a session on a background worker, bounded by `connect_timeout`.
    pub(crate) async fn open(
        opts: Opts,
        driver: Arc<dyn Driver>,
        offload: Arc<dyn Offload>,
    ) -> Result<Arc<Self>> {
        opts.validate()?;

        let (tx, rx) = oneshot::channel::<NativeResult<Box<dyn NativeConnection>>>();
        let job_driver = Arc::clone(&driver);
        let job_opts = opts.clone();
        offload.spawn_blocking(Box::new(move || {
            let result = job_driver.connect(&job_opts);
            if let Err(Ok(native)) = tx.send(result) {
                debug!("connect finished after the caller gave up; closing session");
                native.close();
            }
        }));

        let received = match opts.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_elapsed| Error::Timeout {
                    op: "connect",
                    after: limit,
                })?,
            None => rx.await,
        };
        let native = received
            .map_err(|_recv| aborted("connect"))?
            .map_err(Error::Connection)?;

        let shared = Arc::new(Self {
            server_info: Mutex::new(ServerInfo::parse(native.server_version())),
            thread_id: AtomicU64::new(native.thread_id()),
            lifecycle: Lifecycle::new(opts.reconnect, opts.automatic_close),
            opts,
            driver,
            offload,
            native: Mutex::new(NativeSlot {
                conn: Some(native),
                carry: None,
            }),
            gate: Gate::new(),
            broken: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            affected_rows: AtomicU64::new(0),
            last_insert_id: AtomicU64::new(0),
            warning_count: AtomicU32::new(0),
            stmt_closes: SegQueue::new(),
        });
        shared.lifecycle.mark_initialized();
        debug!(
            thread_id = shared.thread_id(),
            host = %shared.opts.host,
            "connection established"
        );
        Ok(shared)
    }

    fn lock_native(&self) -> MutexGuard<'_, NativeSlot> {
        self.native.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check the connection is open and take its gate for `op`.
    pub(crate) fn begin(&self, op: &'static str) -> Result<GatePermit> {
        self.lifecycle.ensure_open()?;
        self.gate.acquire(Owner::current(op))
    }

    /// Run `job` against the native session on a background worker and wait
    /// for it, bounded by `read_timeout`.
    ///
    /// `permit` travels with the job and is handed back with the result. If
    /// the caller stops waiting (timeout, cancellation), the job passes its
    /// value to `orphan` for clean-up and releases the permit itself.
    pub(crate) async fn call<T, F, O>(
        self: &Arc<Self>,
        op: &'static str,
        permit: Option<GatePermit>,
        job: F,
        orphan: O,
    ) -> Result<(T, Option<GatePermit>)>
    where
        T: Send + 'static,
        F: FnOnce(&ConnShared, &mut NativeSlot) -> Result<T> + Send + 'static,
        O: FnOnce(&ConnShared, &mut NativeSlot, T) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<(Result<T>, Option<GatePermit>)>();
        let shared = Arc::clone(self);
        self.offload.spawn_blocking(Box::new(move || {
            let mut slot = shared.lock_native();
            let result = job(&shared, &mut slot);
            // the slot stays locked until the orphan is handled so that no
            // other job observes the session in between
            if let Err((result, permit)) = tx.send((result, permit)) {
                if let Ok(value) = result {
                    debug!(op, "caller went away; cleaning up");
                    orphan(&shared, &mut slot, value);
                }
                drop(slot);
                drop(permit);
            }
        }));

        let received = match self.opts.read_timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_elapsed| Error::Timeout { op, after: limit })?,
            None => rx.await,
        };
        let (result, permit) = received.map_err(|_recv| aborted(op))?;
        result.map(|value| (value, permit))
    }

    /// Fire-and-forget variant of [`call`](Self::call) for destructors.
    pub(crate) fn detach<T, F>(self: &Arc<Self>, op: &'static str, permit: Option<GatePermit>, job: F)
    where
        F: FnOnce(&ConnShared, &mut NativeSlot) -> Result<T> + Send + 'static,
    {
        let shared = Arc::clone(self);
        self.offload.spawn_blocking(Box::new(move || {
            let mut slot = shared.lock_native();
            if let Err(e) = job(&shared, &mut slot) {
                debug!(op, error = %e, "background job failed");
            }
            drop(slot);
            drop(permit);
        }));
    }

    /// Run `f` on the current session without reviving it.
    ///
    /// Lost-connection errors mark the connection broken.
    pub(crate) fn with_native<T>(
        &self,
        slot: &mut NativeSlot,
        wrap: fn(NativeError) -> Error,
        f: impl FnOnce(&mut dyn NativeConnection) -> NativeResult<T>,
    ) -> Result<T> {
        if self.is_broken() {
            return Err(wrap(NativeError::server_gone()));
        }
        let native = slot
            .conn
            .as_deref_mut()
            .ok_or_else(|| wrap(NativeError::server_gone()))?;
        f(native).map_err(|e| {
            if e.is_connection_lost() {
                warn!(thread_id = self.thread_id(), code = e.code, "native session lost");
                self.broken.store(true, Ordering::Release);
            }
            wrap(e)
        })
    }

    /// Start a new command: revive a lost session when allowed, close
    /// statements released since the last command, then run `f`.
    pub(crate) fn command<T>(
        &self,
        slot: &mut NativeSlot,
        wrap: fn(NativeError) -> Error,
        f: impl FnOnce(&mut dyn NativeConnection) -> NativeResult<T>,
    ) -> Result<T> {
        self.revive(slot)?;
        // a new command supersedes whatever stream an orphaned fetch served
        slot.carry = None;
        self.with_native(slot, wrap, |native| {
            self.flush_statement_closes(native);
            f(native)
        })
    }

    fn revive(&self, slot: &mut NativeSlot) -> Result<()> {
        if !self.is_broken() {
            return Ok(());
        }
        if !self.lifecycle.reconnect() {
            return Err(Error::Connection(NativeError::server_gone()));
        }
        if let Some(old) = slot.conn.take() {
            old.abandon();
        }
        let fresh = self.driver.connect(&self.opts).map_err(Error::Connection)?;
        *self
            .server_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = ServerInfo::parse(fresh.server_version());
        self.thread_id.store(fresh.thread_id(), Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        slot.conn = Some(fresh);
        slot.carry = None;
        self.broken.store(false, Ordering::Release);
        debug!(thread_id = self.thread_id(), "reconnected");
        Ok(())
    }

    fn flush_statement_closes(&self, native: &mut dyn NativeConnection) {
        let generation = self.generation();
        while let Some((stmt_generation, id)) = self.stmt_closes.pop() {
            if stmt_generation != generation {
                continue;
            }
            if let Err(e) = native.close_statement(id) {
                debug!(stmt = id, error = %e, "closing released statement failed");
            }
        }
    }

    pub(crate) fn queue_statement_close(&self, generation: u64, id: u32) {
        self.stmt_closes.push((generation, id));
    }

    pub(crate) fn record(&self, summary: &Summary) {
        self.affected_rows
            .store(summary.affected_rows, Ordering::Release);
        self.last_insert_id
            .store(summary.last_insert_id, Ordering::Release);
        self.warning_count
            .store(summary.warning_count, Ordering::Release);
    }

    pub(crate) fn summary(&self) -> Summary {
        Summary {
            affected_rows: self.affected_rows.load(Ordering::Acquire),
            last_insert_id: self.last_insert_id.load(Ordering::Acquire),
            warning_count: self.warning_count.load(Ordering::Acquire),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub(crate) fn thread_id(&self) -> u64 {
        self.thread_id.load(Ordering::Acquire)
    }

    pub(crate) fn server_info(&self) -> ServerInfo {
        self.server_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Orphan handler for commands that may leave a streaming result pending.
pub(crate) fn discard_orphaned(shared: &ConnShared, slot: &mut NativeSlot, outcome: NativeOutcome) {
    if outcome.pending {
        if let Err(e) = drain(shared, slot) {
            debug!(error = %e, "discarding orphaned result failed");
        }
    }
}

/// Throw away everything a streaming result still has pending.
pub(crate) fn drain(shared: &ConnShared, slot: &mut NativeSlot) -> Result<u64> {
    let carried = slot
        .carry
        .take()
        .map_or(0, |fetched| u64::from(matches!(fetched, Ok(Some(_)))));
    let discarded = shared.with_native(slot, Error::Stream, |native| native.discard_pending())?;
    Ok(carried + discarded)
}

impl Drop for ConnShared {
    fn drop(&mut self) {
        let slot = self.native.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Some(native) = slot.conn.take() else {
            return;
        };
        let graceful = self.lifecycle.close_gracefully() && !self.broken.load(Ordering::Acquire);
        debug!(
            thread_id = self.thread_id.load(Ordering::Acquire),
            graceful, "releasing native session"
        );
        self.offload.spawn_blocking(Box::new(move || {
            if graceful {
                native.close();
            } else {
                native.abandon();
            }
        }));
    }
}
