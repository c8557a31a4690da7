//! Sans-I/O state for connections and result streams.
//!
//! These types decide *what* has to happen next without performing any
//! native calls themselves. Callers act on the returned actions.

pub mod lifecycle;
pub mod stream;

pub use lifecycle::{ConnectionFlags, Lifecycle};
pub use stream::{FreeAction, StreamAction, StreamState, StreamStateMachine};
