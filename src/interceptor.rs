//! Interceptors - ordered before/after hooks wrapping an entire turn.
//!
//! Interceptors carry cross-cutting concerns (auth, logging, rate limiting)
//! without touching conversation logic. The chain guarantees the cleanup
//! phase: every registered `after` hook runs once per turn, in registration
//! order, on every exit path.
//!
//! # Execution Order
//!
//! ```text
//! before[0] → before[1] → ... → wrapped work → after[0] → after[1] → ...
//!      │
//!      └─ first false/Err short-circuits: remaining before hooks and the
//!         work are skipped, but ALL after hooks still run
//! ```
//!
//! `before` hooks run sequentially, never concurrently - order is a
//! correctness requirement (auth must run before logging).
//!
//! # Veto Is Not An Error
//!
//! A `before` hook returning `false` is a normal "do not process this
//! event" outcome, reported as [`TurnDisposition::Vetoed`]. A failing
//! `before` hook is contained: logged, then treated as a veto.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use crate::core::{ChannelId, ContactId};

// =============================================================================
// Interceptor Trait
// =============================================================================

/// A before/after hook pair wrapping one turn.
///
/// Interceptors are constructed once at configuration time and are
/// read-only afterwards; registration order is significant and preserved.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Called before the turn's work. Return `false` to veto the turn.
    ///
    /// Vetoing skips the remaining `before` hooks and the wrapped work;
    /// it does not skip the cleanup phase.
    async fn before(
        &self,
        channel_id: &ChannelId,
        contact_id: &ContactId,
        event_data: &Value,
    ) -> Result<bool>;

    /// Called after the turn, whether the work ran, was vetoed, or failed.
    ///
    /// A failure here is a reportable defect of the interceptor itself: it
    /// is logged and the remaining `after` hooks still run.
    async fn after(
        &self,
        channel_id: &ChannelId,
        contact_id: &ContactId,
        event_data: &Value,
    ) -> Result<()>;

    /// Human-readable name for diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

// =============================================================================
// Turn Disposition
// =============================================================================

/// How a wrapped turn concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDisposition {
    /// All `before` hooks passed and the wrapped work ran to completion.
    Ran,
    /// A `before` hook vetoed (or failed); the wrapped work never ran.
    Vetoed,
}

// =============================================================================
// Interceptor Chain
// =============================================================================

/// Ordered list of interceptors wrapping a unit of work.
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor to the chain.
    pub fn push(&mut self, interceptor: impl Interceptor) {
        self.interceptors.push(Arc::new(interceptor));
    }

    /// Append an already-shared interceptor to the chain.
    pub fn push_arc(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Replace the whole chain atomically.
    ///
    /// No partially-replaced chain is ever observable: the swap happens in
    /// one assignment.
    pub fn replace(&mut self, interceptors: Vec<Arc<dyn Interceptor>>) {
        self.interceptors = interceptors;
    }

    /// Number of registered interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// True when no interceptors are registered.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Wrap `work` with the chain's before/after hooks.
    ///
    /// The wrapped work's original error, if any, is preserved and returned
    /// only after the cleanup phase has run every `after` hook.
    pub(crate) async fn run<F, Fut>(
        &self,
        channel_id: &ChannelId,
        contact_id: &ContactId,
        event_data: &Value,
        work: F,
    ) -> Result<TurnDisposition>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut vetoed = false;
        for interceptor in &self.interceptors {
            match interceptor.before(channel_id, contact_id, event_data).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        interceptor = interceptor.name(),
                        %contact_id,
                        "before hook vetoed turn"
                    );
                    vetoed = true;
                    break;
                }
                Err(err) => {
                    error!(
                        interceptor = interceptor.name(),
                        %contact_id,
                        error = %err,
                        "before hook failed; treating as veto"
                    );
                    vetoed = true;
                    break;
                }
            }
        }

        let work_result = if vetoed { None } else { Some(work().await) };

        // Cleanup phase: every after hook runs, in registration order, no
        // matter how the turn went. A failing after hook must not abort the
        // phase for the hooks behind it.
        for interceptor in &self.interceptors {
            if let Err(err) = interceptor.after(channel_id, contact_id, event_data).await {
                error!(
                    interceptor = interceptor.name(),
                    %contact_id,
                    error = %err,
                    "after hook failed"
                );
            }
        }

        match work_result {
            None => Ok(TurnDisposition::Vetoed),
            Some(Ok(())) => Ok(TurnDisposition::Ran),
            Some(Err(err)) => Err(err),
        }
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}
