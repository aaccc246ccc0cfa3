//! # Colloquy
//!
//! A conversation run-loop where states execute, interceptors wrap, and
//! turns drain.
//!
//! ## Core Concepts
//!
//! Colloquy separates **conversation logic** from **conversation plumbing**:
//! - [`ConversationState`] = Logic (what to say, what comes next)
//! - [`ConversationRunner`] = Plumbing (resolve, drain, contain failures)
//!
//! The key principle: **One Event = One Turn = One Drain**. An inbound
//! event resolves exactly one pending state and drains the resulting chain
//! to completion before the next event for that contact is admitted.
//!
//! ## Architecture
//!
//! ```text
//! Transport (webhook/poller)
//!     │
//!     ▼ run_next_state() / run_postback()
//! ConversationRunner
//!     │
//!     ▼ per-contact turn lock
//! resolve pending state
//!     │   StateStore.next_state()
//!     │     └─ else last_state.find_next_state()
//!     │          └─ else StateRegistry.initial_state
//!     ▼
//! InterceptorChain ─── before[0] → before[1] → ...
//!     │                     │
//!     │                     └─ false/Err vetoes the drain
//!     ▼
//! drain loop ──► take pending ─► push history ─► execute() ─► next pending
//!     │              (repeats until no pending state remains)
//!     ▼
//! InterceptorChain ─── after[0] → after[1] → ...   (always runs)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Pending drains to empty** - Every turn, including vetoed ones,
//!    leaves the contact's pending slot empty
//! 2. **History is append-only** - Past states are never removed or
//!    reordered; most recent is last
//! 3. **Empty history resolves to the initial state** - Its absence is a
//!    configuration error, not a silent no-op
//! 4. **Postbacks never vanish** - An unmapped postback key routes to the
//!    error-postback state
//! 5. **Failures are contained** - A failing state or interceptor ends the
//!    turn, never crashes the caller, never wedges the contact
//! 6. **Contacts are serialized** - Concurrent events for one contact take
//!    turns; different contacts proceed in parallel
//!
//! ## Example
//!
//! ```ignore
//! use colloquy::{
//!     async_trait, ChannelId, ContactId, ConversationRunner, ConversationState,
//!     InMemoryStateStore, InboundEvent, StateRef,
//! };
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! struct Greeting {
//!     menu: StateRef,
//! }
//!
//! #[async_trait]
//! impl ConversationState for Greeting {
//!     async fn execute(
//!         &self,
//!         channel_id: &ChannelId,
//!         contact_id: &ContactId,
//!         _event_data: &Value,
//!     ) -> anyhow::Result<Option<StateRef>> {
//!         send_message(channel_id, contact_id, "Welcome!").await?;
//!         Ok(Some(self.menu.clone()))
//!     }
//! }
//!
//! let menu: StateRef = Arc::new(Menu::default());
//! let runner = ConversationRunner::builder(InMemoryStateStore::new())
//!     .with_initial_state(Arc::new(Greeting { menu: menu.clone() }))
//!     .with_postback("MENU", menu)
//!     .build()?;
//!
//! // one call per inbound webhook event
//! runner.run_next_state(&event).await?;
//! ```
//!
//! ## What This Is Not
//!
//! Colloquy is **not**:
//! - A channel adapter (it never talks to a messaging API)
//! - An NLP layer (event payloads are opaque JSON)
//! - A persistence framework (bring a [`StateStore`])
//!
//! Colloquy **is**:
//! > A conversation run-loop where states execute, interceptors wrap, and
//! > turns drain.

// Core modules
mod core;
mod error;
mod interceptor;
mod registry;
mod runner;
mod state;
mod store;

// Testing utilities (in-crate tests and feature-gated externally)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export core identifier and event types
pub use crate::core::{ChannelId, ContactId, InboundEvent, TurnId};

// Re-export error types
pub use crate::error::ColloquyError;

// Re-export the state contract
pub use state::{ConversationState, StateRef};

// Re-export interceptor types
pub use interceptor::{Interceptor, InterceptorChain, TurnDisposition};

// Re-export registry types
pub use registry::{PostbackKeyExtractor, StateRegistry};

// Re-export store types
pub use store::{ContactLocks, InMemoryStateStore, StateStore};

// Re-export runner types (primary entry point)
pub use runner::{ConversationRunner, RunnerBuilder};

// Re-export commonly used external types
pub use async_trait::async_trait;
