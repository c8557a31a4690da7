//! Host scheduler boundary.
//!
//! Blocking native calls never run on an async task. They are handed to an
//! [`Offload`] implementation which runs them somewhere that may block; the
//! calling task waits on a one-shot channel and resumes exactly once.

use std::sync::Arc;

/// A unit of blocking work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs blocking jobs off the cooperative scheduler.
pub trait Offload: Send + Sync + 'static {
    /// Run `job` somewhere it may block. Must run it exactly once.
    fn spawn_blocking(&self, job: Job);
}

/// Runs jobs on tokio's blocking pool, or inline when no runtime is active
/// (e.g. during process teardown).
///
/// A runtime that is shutting down drops blocking tasks without running
/// them; such a job runs inline on the thread that drops it instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioOffload;

/// Runs its job when dropped unless it already ran.
struct RunOnDrop(Option<Job>);

impl RunOnDrop {
    fn run(mut self) {
        if let Some(job) = self.0.take() {
            job();
        }
    }
}

impl Drop for RunOnDrop {
    fn drop(&mut self) {
        if let Some(job) = self.0.take() {
            job();
        }
    }
}

impl Offload for TokioOffload {
    fn spawn_blocking(&self, job: Job) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let guard = RunOnDrop(Some(job));
                handle.spawn_blocking(move || guard.run());
            }
            Err(_) => job(),
        }
    }
}

/// Runs jobs in place on the calling thread.
///
/// Useful when the native engine never actually blocks (in-memory engines,
/// tests) and deterministic teardown matters more than scheduler fairness.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineOffload;

impl Offload for InlineOffload {
    fn spawn_blocking(&self, job: Job) {
        job();
    }
}

pub(crate) fn default_offload() -> Arc<dyn Offload> {
    Arc::new(TokioOffload)
}
