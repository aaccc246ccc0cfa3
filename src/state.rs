//! The `ConversationState` contract - the polymorphic unit of work.
//!
//! A state performs its side effects (send a message, write a record) in
//! `execute` and tells the runner what should run next. The runner depends
//! only on this trait, never on concrete state identity.
//!
//! # Key Properties
//!
//! - **Constructed once**: states are built at configuration time and are
//!   read-only for the life of the process
//! - **Referenced by identity**: states are shared as [`StateRef`]
//!   (`Arc<dyn ConversationState>`) wherever stored; business data lives
//!   outside the state
//! - **Chaining**: `execute` returning `Some(next)` keeps the turn's drain
//!   loop going; `None` ends the turn
//!
//! # Example
//!
//! ```ignore
//! use colloquy::{async_trait, ChannelId, ContactId, ConversationState, StateRef};
//! use serde_json::Value;
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
//! ```
//!
//! # Non-Termination
//!
//! A state whose `execute` returns itself is legal and produces an infinite
//! drain loop by design contract. The engine performs no cycle detection;
//! bounding a turn is the caller's responsibility (see the `_timeout`
//! wrappers on the runner).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::core::{ChannelId, ContactId};

/// Shared handle to a conversation state.
///
/// States are compared and stored by identity, not by value.
pub type StateRef = Arc<dyn ConversationState>;

/// A single state in a contact's conversation.
#[async_trait]
pub trait ConversationState: Send + Sync + 'static {
    /// Perform this state's side effects and return the state that should
    /// run next, or `None` to end the turn.
    ///
    /// Errors are contained at the runner's drain-loop boundary: the turn
    /// ends, the failure is logged, and the contact remains able to receive
    /// future events.
    async fn execute(
        &self,
        channel_id: &ChannelId,
        contact_id: &ContactId,
        event_data: &Value,
    ) -> Result<Option<StateRef>>;

    /// Pure routing decision used when a conversation resumes with no state
    /// explicitly queued: given that this state was the last one executed,
    /// which state should handle the new event?
    ///
    /// Returning `None` elects to end the conversation at resume time.
    /// The default implementation never resumes.
    async fn find_next_state(
        &self,
        channel_id: &ChannelId,
        contact_id: &ContactId,
        event_data: &Value,
        current: &StateRef,
    ) -> Result<Option<StateRef>> {
        let _ = (channel_id, contact_id, event_data, current);
        Ok(None)
    }

    /// Human-readable name for diagnostics.
    ///
    /// Defaults to the implementing type's name. Never used for routing.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Diagnostic name for an optional state slot.
pub(crate) fn state_name(state: Option<&StateRef>) -> &str {
    state.map(|s| s.name()).unwrap_or("<none>")
}
