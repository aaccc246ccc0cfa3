//! Structured error types for the conversation engine.
//!
//! `ColloquyError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`. Only configuration problems and caller-imposed deadlines
//! surface here.
//!
//! # The Containment Rule
//!
//! > **State and interceptor failures never cross the runner boundary.**
//!
//! - `anyhow` is internal transport (ergonomic for states and interceptors)
//! - A failed `execute` ends the turn; it is logged with the last-executed
//!   state and the contact stays able to receive future events
//! - `ColloquyError` is the only error type a caller ever sees
//!
//! # Example
//!
//! ```ignore
//! use colloquy::ColloquyError;
//!
//! match runner.run_next_state(&event).await {
//!     Ok(()) => {}
//!     Err(ColloquyError::InitialStateUnset) => {
//!         // fatal wiring problem - fix configuration and restart
//!     }
//!     Err(ColloquyError::Timeout { duration }) => {
//!         eprintln!("turn abandoned after {duration:?}");
//!     }
//!     Err(e) => eprintln!("configuration error: {e}"),
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

/// Structured error type for engine operations.
///
/// Configuration variants are fatal at configuration time or at first
/// resolution and are never silently ignored. `Timeout` is the only
/// runtime variant, produced by the `_timeout` wrappers.
#[derive(Debug, Error)]
pub enum ColloquyError {
    /// A contact with no history and no pending state resolved, but no
    /// initial state was configured.
    #[error("initial state must be defined")]
    InitialStateUnset,

    /// A postback key missed the registry and no error-postback state was
    /// configured to absorb it.
    #[error("error postback state must be defined to absorb unmapped postback keys")]
    ErrorPostbackStateUnset,

    /// A postback registration used an empty key.
    #[error("postback key must be non-empty")]
    EmptyPostbackKey,

    /// The turn did not finish within the caller-imposed deadline.
    #[error("turn timed out after {duration:?}")]
    Timeout {
        /// How long we waited.
        duration: Duration,
    },
}

impl ColloquyError {
    /// Returns true for errors that indicate broken wiring rather than a
    /// runtime condition.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, ColloquyError::Timeout { .. })
    }
}
