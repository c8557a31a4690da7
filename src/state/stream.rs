//! Streaming result state machine.
//!
//! ```text
//! CREATED ──next──▶ STREAMING ──end of rows──▶ COMPLETE ──free──▶ FREED
//!    │                  │   └──fetch error──▶ FAILED ───free──▶ FREED
//!    └──────free────────┴──(drain first)─────────────────────▶ FREED
//! ```

use crate::error::{Error, HandleKind, NativeError, Result};

/// Streaming result state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// Header received, no row requested yet
    Created,
    /// At least one fetch issued, rows may remain on the native side
    Streaming,
    /// The native side reported end of rows
    Complete,
    /// A fetch failed; the stream is terminated
    Failed(NativeError),
    /// Freed by the caller
    Freed,
}

/// What the caller must do to produce the next row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    /// Fetch one row from the native side.
    FetchRow,
    /// No more rows; report end of results.
    EndOfRows,
}

/// What the caller must do to free the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeAction {
    /// Rows may still be pending natively; drain them before releasing the gate.
    Drain,
    /// Nothing is pending.
    Nothing,
}

/// Streaming result state machine.
#[derive(Debug)]
pub struct StreamStateMachine {
    state: StreamState,
    rows_fetched: u64,
}

impl Default for StreamStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamStateMachine {
    /// A stream whose header was just received.
    pub fn new() -> Self {
        Self {
            state: StreamState::Created,
            rows_fetched: 0,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Rows handed out so far.
    pub fn rows_fetched(&self) -> u64 {
        self.rows_fetched
    }

    /// Decide how to serve a `next_row` call.
    pub fn next(&mut self) -> Result<StreamAction> {
        match &self.state {
            StreamState::Created | StreamState::Streaming => {
                self.state = StreamState::Streaming;
                Ok(StreamAction::FetchRow)
            }
            StreamState::Complete => Ok(StreamAction::EndOfRows),
            StreamState::Failed(native) => Err(Error::Stream(native.clone())),
            StreamState::Freed => Err(Error::UseAfterFree(HandleKind::Result)),
        }
    }

    /// A fetched row was delivered.
    pub fn on_row(&mut self) {
        self.rows_fetched += 1;
    }

    /// The native side reported end of rows.
    pub fn on_end(&mut self) {
        if self.is_pending() {
            self.state = StreamState::Complete;
        }
    }

    /// A fetch failed.
    pub fn on_error(&mut self, error: NativeError) {
        if self.is_pending() {
            self.state = StreamState::Failed(error);
        }
    }

    /// Transition to FREED, telling the caller whether a drain is needed first.
    pub fn free(&mut self) -> FreeAction {
        let action = if self.is_pending() {
            FreeAction::Drain
        } else {
            FreeAction::Nothing
        };
        self.state = StreamState::Freed;
        action
    }

    /// Field metadata stays readable until the stream is freed.
    pub fn check_fields(&self) -> Result<()> {
        if self.is_freed() {
            return Err(Error::UseAfterFree(HandleKind::Result));
        }
        Ok(())
    }

    /// True while rows may remain on the native side.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, StreamState::Created | StreamState::Streaming)
    }

    pub fn is_complete(&self) -> bool {
        self.state == StreamState::Complete
    }

    pub fn is_freed(&self) -> bool {
        self.state == StreamState::Freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_to_completion() {
        let mut sm = StreamStateMachine::new();
        assert_eq!(sm.next().unwrap(), StreamAction::FetchRow);
        assert_eq!(sm.state(), &StreamState::Streaming);
        sm.on_row();
        assert_eq!(sm.next().unwrap(), StreamAction::FetchRow);
        sm.on_end();
        assert!(sm.is_complete());
        assert_eq!(sm.next().unwrap(), StreamAction::EndOfRows);
        assert_eq!(sm.next().unwrap(), StreamAction::EndOfRows);
        assert_eq!(sm.free(), FreeAction::Nothing);
        assert_eq!(sm.rows_fetched(), 1);
    }

    #[test]
    fn test_free_while_streaming_requires_drain() {
        let mut sm = StreamStateMachine::new();
        assert_eq!(sm.free(), FreeAction::Drain);
        assert!(sm.is_freed());
        assert_eq!(sm.free(), FreeAction::Nothing);
        assert!(matches!(
            sm.next(),
            Err(Error::UseAfterFree(HandleKind::Result))
        ));
        assert!(sm.check_fields().is_err());
    }

    #[test]
    fn test_failure_is_sticky() {
        let mut sm = StreamStateMachine::new();
        sm.next().unwrap();
        sm.on_error(NativeError::new(2013, "lost"));
        for _ in 0..2 {
            match sm.next() {
                Err(Error::Stream(native)) => assert_eq!(native.code, 2013),
                other => panic!("unexpected {:?}", other),
            }
        }
        sm.on_end();
        assert!(matches!(sm.state(), StreamState::Failed(_)));
        assert_eq!(sm.free(), FreeAction::Nothing);
    }
}
