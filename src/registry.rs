//! State registry - postback routing table plus the two well-known states.
//!
//! The registry maps postback keys to target states and holds the
//! `initial_state` (used when a contact has no history) and the
//! `error_postback_state` (fallback for unmapped postback keys). The key is
//! derived from the raw postback payload by an injectable extractor
//! function; the default treats the payload itself as the key when it is a
//! JSON string.
//!
//! Postback resolution never silently drops an event: a miss deterministically
//! routes to the error-postback state, and only an unset error-postback state
//! is a configuration error.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::ColloquyError;
use crate::state::StateRef;

/// Derives a postback key from the raw postback payload.
///
/// Returning `None` means the payload carries no usable key; resolution
/// then falls through to the error-postback state.
pub type PostbackKeyExtractor = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Default extractor: identity on the payload when it is a JSON string.
fn default_key_extractor(payload: &Value) -> Option<String> {
    payload.as_str().map(str::to_owned)
}

/// Outcome of looking a postback payload up in the registry.
pub(crate) enum PostbackResolution {
    /// The extracted key had a registered target state.
    Mapped(StateRef),
    /// No mapping for the key (or no key at all); route to the fallback.
    Miss {
        key: Option<String>,
        fallback: StateRef,
    },
}

/// Maps postback keys to target states; holds the initial and
/// error-postback states.
///
/// Configured once at startup and read-only afterwards. The absence of the
/// initial or error-postback state is validated at resolution time, not at
/// set time.
#[derive(Clone)]
pub struct StateRegistry {
    postbacks: HashMap<String, StateRef>,
    initial_state: Option<StateRef>,
    error_postback_state: Option<StateRef>,
    key_extractor: PostbackKeyExtractor,
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self {
            postbacks: HashMap::new(),
            initial_state: None,
            error_postback_state: None,
            key_extractor: Arc::new(default_key_extractor),
        }
    }
}

impl StateRegistry {
    /// Create an empty registry with the default key extractor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a postback key to a target state.
    ///
    /// Later registrations for the same key silently overwrite earlier ones
    /// (last-write-wins). An empty key is a configuration error.
    pub fn register_postback(
        &mut self,
        key: impl Into<String>,
        state: StateRef,
    ) -> Result<(), ColloquyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ColloquyError::EmptyPostbackKey);
        }
        if self.postbacks.insert(key.clone(), state).is_some() {
            debug!(key, "postback key remapped (last write wins)");
        }
        Ok(())
    }

    /// Set the state that runs for a contact with no history.
    pub fn set_initial_state(&mut self, state: StateRef) {
        self.initial_state = Some(state);
    }

    /// Set the fallback state for unmapped postback keys.
    ///
    /// The error state is expected to communicate failure to the end user;
    /// routing to it is an error-signaling pathway, not a crash.
    pub fn set_error_postback_state(&mut self, state: StateRef) {
        self.error_postback_state = Some(state);
    }

    /// Replace the function used to derive a postback key from the raw
    /// payload.
    pub fn set_postback_key_extractor(
        &mut self,
        extractor: impl Fn(&Value) -> Option<String> + Send + Sync + 'static,
    ) {
        self.key_extractor = Arc::new(extractor);
    }

    /// The configured initial state, if any.
    pub fn initial_state(&self) -> Option<&StateRef> {
        self.initial_state.as_ref()
    }

    /// The configured error-postback state, if any.
    pub fn error_postback_state(&self) -> Option<&StateRef> {
        self.error_postback_state.as_ref()
    }

    /// Number of registered postback mappings.
    pub fn postback_count(&self) -> usize {
        self.postbacks.len()
    }

    /// Resolve a raw postback payload to a target state.
    ///
    /// Fails only when the key misses and no error-postback state is
    /// configured to absorb it.
    pub(crate) fn resolve_postback(
        &self,
        payload: &Value,
    ) -> Result<PostbackResolution, ColloquyError> {
        let key = (self.key_extractor)(payload);

        if let Some(state) = key.as_deref().and_then(|k| self.postbacks.get(k)) {
            return Ok(PostbackResolution::Mapped(state.clone()));
        }

        match &self.error_postback_state {
            Some(fallback) => Ok(PostbackResolution::Miss {
                key,
                fallback: fallback.clone(),
            }),
            None => Err(ColloquyError::ErrorPostbackStateUnset),
        }
    }
}

impl std::fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRegistry")
            .field("postback_count", &self.postbacks.len())
            .field("initial_state", &self.initial_state.is_some())
            .field("error_postback_state", &self.error_postback_state.is_some())
            .finish_non_exhaustive()
    }
}
