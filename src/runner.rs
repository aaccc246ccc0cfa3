//! Conversation runner - the resolve-and-drain loop.
//!
//! The runner is the engine's entry point. For each inbound event it:
//!
//! ```text
//! run_next_state() / run_postback()
//!     │
//!     ▼ per-contact turn lock
//! resolve pending state
//!     │  (store → last state's find_next_state → initial state)
//!     ▼
//! InterceptorChain.before ──veto──► pending cleared, after hooks, done
//!     │
//!     ▼
//! drain loop: take pending → append to history → execute() → new pending
//!     │  (repeats until no pending state remains)
//!     ▼
//! InterceptorChain.after (always)
//! ```
//!
//! # Failure Containment
//!
//! A state failing mid-turn ends that turn: the failure is logged with the
//! last-executed state's name, the `after` hooks still run, and the call
//! returns `Ok(())`. One bad turn neither crashes the caller nor wedges the
//! contact - the next inbound event resolves fresh. Only configuration
//! errors ([`ColloquyError`]) surface to the caller.
//!
//! # Per-Contact Serialization
//!
//! Two concurrent inbound events for the same contact must not interleave
//! their drain loops - pending state would be lost or duplicated. The
//! runner holds a [`ContactLocks`] guard for the whole turn, including
//! pending-state resolution and the interceptor cleanup phase. Events for
//! different contacts proceed concurrently.
//!
//! # Non-Termination
//!
//! A state whose `execute` returns itself drains forever by design
//! contract; the engine does not detect cycles. Bound turns with
//! [`ConversationRunner::run_next_state_timeout`] when states are not
//! trusted to terminate.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::core::{postback_payload, ChannelId, ContactId, InboundEvent, TurnId};
use crate::error::ColloquyError;
use crate::interceptor::{Interceptor, InterceptorChain, TurnDisposition};
use crate::registry::{PostbackResolution, StateRegistry};
use crate::state::{state_name, StateRef};
use crate::store::{ContactLocks, StateStore};

// =============================================================================
// Conversation Runner
// =============================================================================

/// Drives one contact's conversation forward per inbound event.
///
/// Constructed once at startup via [`RunnerBuilder`] (or directly from a
/// configured [`StateRegistry`] and [`InterceptorChain`]) and shared across
/// the transport layer; all operations take `&self`. Cloning is cheap and
/// shares the same engine.
pub struct ConversationRunner<S> {
    core: Arc<RunnerCore<S>>,
}

impl<S> Clone for ConversationRunner<S> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

struct RunnerCore<S> {
    registry: StateRegistry,
    interceptors: InterceptorChain,
    store: Arc<S>,
    locks: ContactLocks,
}

impl<S: StateStore> ConversationRunner<S> {
    /// Create a runner from already-configured parts.
    pub fn new(registry: StateRegistry, interceptors: InterceptorChain, store: Arc<S>) -> Self {
        Self {
            core: Arc::new(RunnerCore {
                registry,
                interceptors,
                store,
                locks: ContactLocks::new(),
            }),
        }
    }

    /// Create a builder around the given store.
    pub fn builder(store: S) -> RunnerBuilder<S> {
        RunnerBuilder::new(store)
    }

    /// The state store backing this runner.
    pub fn store(&self) -> &Arc<S> {
        &self.core.store
    }

    /// The postback registry.
    pub fn registry(&self) -> &StateRegistry {
        &self.core.registry
    }

    /// Number of registered interceptors.
    pub fn interceptor_count(&self) -> usize {
        self.core.interceptors.len()
    }

    /// Process one inbound event for one contact.
    ///
    /// Resolves the pending state (from the store, the last executed
    /// state's `find_next_state`, or the initial state), then drains states
    /// until none remain, wrapped by the interceptor chain.
    ///
    /// # Errors
    ///
    /// [`ColloquyError::InitialStateUnset`] when the contact has no history
    /// and no initial state is configured. State and interceptor failures
    /// are contained and logged, never returned.
    pub async fn run_next_state(&self, event: &InboundEvent) -> Result<(), ColloquyError> {
        self.core.run_next_state(event).await
    }

    /// Like [`run_next_state`](Self::run_next_state), bounding the caller's
    /// wait.
    ///
    /// The turn is spawned onto the runtime and always runs to completion -
    /// interceptor cleanup and the pending-slot drain included - even when
    /// the deadline expires first. Expiry ends only the caller's await,
    /// with [`ColloquyError::Timeout`]; the contact's turn lock is released
    /// by the background turn when it finishes.
    pub async fn run_next_state_timeout(
        &self,
        event: &InboundEvent,
        timeout: Duration,
    ) -> Result<(), ColloquyError> {
        let core = self.core.clone();
        let event = event.clone();
        let turn = tokio::spawn(async move { core.run_next_state(&event).await });
        bound_turn(turn, timeout).await
    }

    /// Route a postback event directly to its target state, then drain.
    ///
    /// The postback payload is read from the fixed `postback.payload` path
    /// of `event_data`, turned into a key by the configured extractor, and
    /// looked up in the registry. An unmapped key routes to the
    /// error-postback state - a postback is never silently dropped.
    ///
    /// # Errors
    ///
    /// [`ColloquyError::ErrorPostbackStateUnset`] when the key misses and
    /// no error-postback state is configured.
    pub async fn run_postback(
        &self,
        channel_id: &ChannelId,
        contact_id: &ContactId,
        event_data: &Value,
    ) -> Result<(), ColloquyError> {
        self.core.run_postback(channel_id, contact_id, event_data).await
    }

    /// Like [`run_postback`](Self::run_postback), bounding the caller's
    /// wait. The turn runs to completion in the background on expiry.
    pub async fn run_postback_timeout(
        &self,
        channel_id: &ChannelId,
        contact_id: &ContactId,
        event_data: &Value,
        timeout: Duration,
    ) -> Result<(), ColloquyError> {
        let core = self.core.clone();
        let channel_id = channel_id.clone();
        let contact_id = contact_id.clone();
        let event_data = event_data.clone();
        let turn = tokio::spawn(async move {
            core.run_postback(&channel_id, &contact_id, &event_data).await
        });
        bound_turn(turn, timeout).await
    }
}

/// Await a spawned turn up to a deadline. The turn keeps running after
/// expiry; only the caller's wait ends.
async fn bound_turn(
    turn: tokio::task::JoinHandle<Result<(), ColloquyError>>,
    timeout: Duration,
) -> Result<(), ColloquyError> {
    match tokio::time::timeout(timeout, turn).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            error!(error = %join_err, "turn task aborted");
            Ok(())
        }
        Err(_) => Err(ColloquyError::Timeout { duration: timeout }),
    }
}

impl<S: StateStore> RunnerCore<S> {
    async fn run_next_state(&self, event: &InboundEvent) -> Result<(), ColloquyError> {
        let turn_id = TurnId::new();
        let span = info_span!(
            "turn",
            %turn_id,
            contact_id = %event.contact_id,
            channel_id = %event.channel_id,
        );
        async {
            let _turn_lock = self.locks.acquire(&event.contact_id).await;
            self.run_turn(&event.channel_id, &event.contact_id, &event.data)
                .await
        }
        .instrument(span)
        .await
    }

    async fn run_postback(
        &self,
        channel_id: &ChannelId,
        contact_id: &ContactId,
        event_data: &Value,
    ) -> Result<(), ColloquyError> {
        let turn_id = TurnId::new();
        let span = info_span!(
            "postback_turn",
            %turn_id,
            %contact_id,
            %channel_id,
        );
        async {
            let payload = postback_payload(event_data).cloned().unwrap_or(Value::Null);
            let next = match self.registry.resolve_postback(&payload)? {
                PostbackResolution::Mapped(state) => {
                    debug!(state = state.name(), "postback mapped");
                    state
                }
                PostbackResolution::Miss { key, fallback } => {
                    warn!(
                        key = key.as_deref().unwrap_or("<none>"),
                        "unmapped postback key; routing to error postback state"
                    );
                    fallback
                }
            };

            // The pending slot must be written under the same lock the
            // drain loop runs under, or a concurrent turn could steal it.
            let _turn_lock = self.locks.acquire(contact_id).await;
            self.store.set_next_state(contact_id, Some(next)).await;
            self.run_turn(channel_id, contact_id, event_data).await
        }
        .instrument(span)
        .await
    }

    /// One turn: resolve the pending state if needed, then drain, wrapped
    /// by the interceptor chain. Caller holds the contact's turn lock.
    async fn run_turn(
        &self,
        channel_id: &ChannelId,
        contact_id: &ContactId,
        event_data: &Value,
    ) -> Result<(), ColloquyError> {
        if self.store.next_state(contact_id).await.is_none() {
            let resolved = self
                .resolve_from_last_state(channel_id, contact_id, event_data)
                .await?;
            // A None resolution is still stored: "nothing to do" is a valid
            // outcome, observed by the drain loop as an immediately-over turn.
            self.store.set_next_state(contact_id, resolved).await;
        }

        let disposition = self
            .interceptors
            .run(channel_id, contact_id, event_data, || {
                self.drain(channel_id, contact_id, event_data)
            })
            .await;

        match disposition {
            Ok(TurnDisposition::Ran) => Ok(()),
            Ok(TurnDisposition::Vetoed) => {
                // A vetoed turn still drains the pending slot to None.
                self.store.set_next_state(contact_id, None).await;
                Ok(())
            }
            Err(err) => {
                // The drain loop contains state failures itself; anything
                // reaching this branch still must not crash the turn.
                error!(error = %err, "turn failed after interceptor cleanup");
                self.store.set_next_state(contact_id, None).await;
                Ok(())
            }
        }
    }

    /// Resolve which state should run when none is queued.
    ///
    /// Order: the last executed state's routing decision, else the initial
    /// state, else a configuration error. A failing `find_next_state` is
    /// contained: the turn resolves to "nothing to do".
    async fn resolve_from_last_state(
        &self,
        channel_id: &ChannelId,
        contact_id: &ContactId,
        event_data: &Value,
    ) -> Result<Option<StateRef>, ColloquyError> {
        if let Some(last) = self.store.last_state(contact_id).await {
            debug!(last_state = last.name(), "resuming from last executed state");
            return match last
                .find_next_state(channel_id, contact_id, event_data, &last)
                .await
            {
                Ok(next) => Ok(next),
                Err(err) => {
                    error!(
                        last_state = last.name(),
                        error = %err,
                        "find_next_state failed; ending turn"
                    );
                    Ok(None)
                }
            };
        }

        match self.registry.initial_state() {
            Some(initial) => Ok(Some(initial.clone())),
            None => Err(ColloquyError::InitialStateUnset),
        }
    }

    /// Execute pending states until none remain.
    ///
    /// Each iteration atomically takes the pending slot (cleared before
    /// executing, so a failure leaves nothing queued), appends the state to
    /// history, runs it, and queues whatever it returns. Errors are caught
    /// here at the loop boundary and logged with the last-executed state.
    async fn drain(
        &self,
        channel_id: &ChannelId,
        contact_id: &ContactId,
        event_data: &Value,
    ) -> anyhow::Result<()> {
        while let Some(state) = self.store.next_state(contact_id).await {
            self.store.set_next_state(contact_id, None).await;
            self.store.push_past_state(contact_id, state.clone()).await;
            debug!(state = state.name(), "executing state");

            match state.execute(channel_id, contact_id, event_data).await {
                Ok(next) => self.store.set_next_state(contact_id, next).await,
                Err(err) => {
                    let last = self.store.last_state(contact_id).await;
                    error!(
                        last_state = state_name(last.as_ref()),
                        error = %err,
                        "state execution failed; ending turn"
                    );
                    break;
                }
            }
        }
        Ok(())
    }
}

impl<S> std::fmt::Debug for ConversationRunner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationRunner")
            .field("registry", &self.core.registry)
            .field("interceptors", &self.core.interceptors)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Runner Builder
// =============================================================================

/// Builder for assembling a [`ConversationRunner`].
///
/// Postback keys are validated at [`build`](Self::build) so configuration
/// errors fail fast at startup, before any event arrives.
///
/// # Example
///
/// ```ignore
/// let runner = ConversationRunner::builder(InMemoryStateStore::new())
///     .with_initial_state(greeting.clone())
///     .with_error_postback_state(fallback.clone())
///     .with_postback("BUY", checkout.clone())
///     .with_interceptor(AuthInterceptor::new(keys))
///     .with_interceptor(AuditInterceptor::default())
///     .build()?;
/// ```
pub struct RunnerBuilder<S> {
    store: Arc<S>,
    registry: StateRegistry,
    interceptors: InterceptorChain,
    postbacks: Vec<(String, StateRef)>,
}

impl<S: StateStore> RunnerBuilder<S> {
    /// Create a builder owning the given store.
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    /// Create a builder around an already-shared store.
    pub fn from_arc(store: Arc<S>) -> Self {
        Self {
            store,
            registry: StateRegistry::new(),
            interceptors: InterceptorChain::new(),
            postbacks: Vec::new(),
        }
    }

    /// Set the state that runs for contacts with no history.
    pub fn with_initial_state(mut self, state: StateRef) -> Self {
        self.registry.set_initial_state(state);
        self
    }

    /// Set the fallback state for unmapped postback keys.
    pub fn with_error_postback_state(mut self, state: StateRef) -> Self {
        self.registry.set_error_postback_state(state);
        self
    }

    /// Map a postback key to a target state (last write wins; validated at
    /// build time).
    pub fn with_postback(mut self, key: impl Into<String>, state: StateRef) -> Self {
        self.postbacks.push((key.into(), state));
        self
    }

    /// Replace the postback key extractor.
    pub fn with_postback_key_extractor(
        mut self,
        extractor: impl Fn(&Value) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.registry.set_postback_key_extractor(extractor);
        self
    }

    /// Append an interceptor to the chain. Registration order is execution
    /// order.
    pub fn with_interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Replace the whole interceptor chain atomically.
    pub fn with_interceptors(mut self, interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        self.interceptors.replace(interceptors);
        self
    }

    /// Validate the configuration and build the runner.
    pub fn build(self) -> Result<ConversationRunner<S>, ColloquyError> {
        let Self {
            store,
            mut registry,
            interceptors,
            postbacks,
        } = self;

        for (key, state) in postbacks {
            registry.register_postback(key, state)?;
        }

        Ok(ConversationRunner::new(registry, interceptors, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStateStore;
    use crate::testing::{ProbeInterceptor, ScriptedState, TurnJournal};
    use serde_json::json;

    fn event(contact: &str) -> InboundEvent {
        InboundEvent::new("sms", contact, Value::Null)
    }

    fn contact(id: &str) -> ContactId {
        ContactId::new(id)
    }

    fn names(states: &[StateRef]) -> Vec<&str> {
        states.iter().map(|s| s.name()).collect()
    }

    #[tokio::test]
    async fn test_empty_history_resolves_to_initial_state() {
        let initial = Arc::new(ScriptedState::new("initial"));
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_initial_state(initial.clone())
            .build()
            .unwrap();

        runner.run_next_state(&event("c1")).await.unwrap();

        assert_eq!(initial.executions(), 1);
        assert_eq!(names(&runner.store().past_states(&contact("c1"))), ["initial"]);
        assert!(runner.store().next_state(&contact("c1")).await.is_none());
    }

    #[tokio::test]
    async fn test_initial_state_unset_is_a_configuration_error() {
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .build()
            .unwrap();

        let err = runner.run_next_state(&event("c1")).await.unwrap_err();
        assert!(matches!(err, ColloquyError::InitialStateUnset));
        assert_eq!(err.to_string(), "initial state must be defined");
    }

    #[tokio::test]
    async fn test_drain_follows_the_chain_and_ends_on_none() {
        let s2: StateRef = Arc::new(ScriptedState::new("s2"));
        let s1 = Arc::new(ScriptedState::new("s1").with_next(s2.clone()));
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_initial_state(s1)
            .build()
            .unwrap();

        runner.run_next_state(&event("c1")).await.unwrap();

        // exactly [s1, s2], pending left empty
        assert_eq!(names(&runner.store().past_states(&contact("c1"))), ["s1", "s2"]);
        assert!(runner.store().next_state(&contact("c1")).await.is_none());
    }

    #[tokio::test]
    async fn test_resume_uses_last_states_routing_decision() {
        let m = Arc::new(ScriptedState::new("m"));
        let l = Arc::new(ScriptedState::new("l").with_resume(m.clone()));
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_initial_state(l)
            .build()
            .unwrap();

        // first turn executes l; second turn resumes via l.find_next_state → m
        runner.run_next_state(&event("c1")).await.unwrap();
        runner.run_next_state(&event("c1")).await.unwrap();

        assert_eq!(m.executions(), 1);
        assert_eq!(names(&runner.store().past_states(&contact("c1"))), ["l", "m"]);
    }

    #[tokio::test]
    async fn test_resume_returning_none_ends_the_turn() {
        // terminal state: default find_next_state is None
        let only = Arc::new(ScriptedState::new("only"));
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_initial_state(only.clone())
            .build()
            .unwrap();

        runner.run_next_state(&event("c1")).await.unwrap();
        runner.run_next_state(&event("c1")).await.unwrap();

        assert_eq!(only.executions(), 1);
        assert_eq!(runner.store().past_states(&contact("c1")).len(), 1);
    }

    #[tokio::test]
    async fn test_execute_failure_is_contained() {
        let bad = Arc::new(ScriptedState::new("bad").failing());
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_initial_state(bad.clone())
            .build()
            .unwrap();

        // the turn ends cleanly: no error to the caller, pending drained
        runner.run_next_state(&event("c1")).await.unwrap();
        assert_eq!(names(&runner.store().past_states(&contact("c1"))), ["bad"]);
        assert!(runner.store().next_state(&contact("c1")).await.is_none());

        // the contact is still serviceable afterwards
        runner.run_next_state(&event("c1")).await.unwrap();
        assert_eq!(bad.executions(), 1, "default resume ends the second turn");
    }

    #[tokio::test]
    async fn test_failure_mid_chain_keeps_earlier_history() {
        let bad: StateRef = Arc::new(ScriptedState::new("bad").failing());
        let good = Arc::new(ScriptedState::new("good").with_next(bad));
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_initial_state(good)
            .build()
            .unwrap();

        runner.run_next_state(&event("c1")).await.unwrap();

        assert_eq!(
            names(&runner.store().past_states(&contact("c1"))),
            ["good", "bad"]
        );
        assert!(runner.store().next_state(&contact("c1")).await.is_none());
    }

    #[tokio::test]
    async fn test_failing_resume_is_contained() {
        struct BrokenResume;

        #[async_trait::async_trait]
        impl crate::ConversationState for BrokenResume {
            async fn execute(
                &self,
                _channel_id: &ChannelId,
                _contact_id: &ContactId,
                _event_data: &Value,
            ) -> anyhow::Result<Option<StateRef>> {
                Ok(None)
            }

            async fn find_next_state(
                &self,
                _channel_id: &ChannelId,
                _contact_id: &ContactId,
                _event_data: &Value,
                _current: &StateRef,
            ) -> anyhow::Result<Option<StateRef>> {
                anyhow::bail!("routing broke")
            }
        }

        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_initial_state(Arc::new(BrokenResume))
            .build()
            .unwrap();

        runner.run_next_state(&event("c1")).await.unwrap();
        // resume fails → contained, turn is a no-op
        runner.run_next_state(&event("c1")).await.unwrap();
        assert_eq!(runner.store().past_states(&contact("c1")).len(), 1);
    }

    #[tokio::test]
    async fn test_veto_drains_a_queued_pending_state() {
        let journal = TurnJournal::new();
        let queued: StateRef = Arc::new(ScriptedState::new("queued"));
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_interceptor(ProbeInterceptor::new("gate", journal.clone()).vetoing())
            .build()
            .unwrap();

        runner
            .store()
            .set_next_state(&contact("c1"), Some(queued))
            .await;

        runner.run_next_state(&event("c1")).await.unwrap();

        // nothing executed, nothing left pending
        assert!(runner.store().past_states(&contact("c1")).is_empty());
        assert!(runner.store().next_state(&contact("c1")).await.is_none());
        assert_eq!(journal.entries(), vec!["gate.before", "gate.after"]);
    }

    #[tokio::test]
    async fn test_postback_routes_to_mapped_state_first() {
        let journal = TurnJournal::new();
        let buy = Arc::new(ScriptedState::new("buy").with_journal(journal.clone()));
        let initial = Arc::new(ScriptedState::new("initial").with_journal(journal.clone()));
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_initial_state(initial)
            .with_postback("BUY", buy.clone())
            .build()
            .unwrap();

        let data = json!({"postback": {"payload": "BUY"}});
        runner
            .run_postback(&ChannelId::new("sms"), &contact("c1"), &data)
            .await
            .unwrap();

        // the mapped state runs first in the turn, bypassing the initial state
        assert_eq!(names(&runner.store().past_states(&contact("c1")))[0], "buy");
        assert_eq!(buy.executions(), 1);
        assert_eq!(journal.entries(), vec!["buy.execute"]);
    }

    #[tokio::test]
    async fn test_unmapped_postback_runs_the_error_state() {
        let error_state = Arc::new(ScriptedState::new("error"));
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_error_postback_state(error_state.clone())
            .build()
            .unwrap();

        let data = json!({"postback": {"payload": "NOPE"}});
        runner
            .run_postback(&ChannelId::new("sms"), &contact("c1"), &data)
            .await
            .unwrap();

        assert_eq!(error_state.executions(), 1);
        assert_eq!(names(&runner.store().past_states(&contact("c1"))), ["error"]);
    }

    #[tokio::test]
    async fn test_unmapped_postback_without_error_state_fails() {
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .build()
            .unwrap();

        let data = json!({"postback": {"payload": "NOPE"}});
        let err = runner
            .run_postback(&ChannelId::new("sms"), &contact("c1"), &data)
            .await
            .unwrap_err();
        assert!(matches!(err, ColloquyError::ErrorPostbackStateUnset));
    }

    #[tokio::test]
    async fn test_postback_with_custom_extractor() {
        let buy = Arc::new(ScriptedState::new("buy"));
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_postback("BUY", buy.clone())
            .with_postback_key_extractor(|payload| {
                payload
                    .get("action")
                    .and_then(Value::as_str)
                    .map(str::to_uppercase)
            })
            .build()
            .unwrap();

        let data = json!({"postback": {"payload": {"action": "buy"}}});
        runner
            .run_postback(&ChannelId::new("sms"), &contact("c1"), &data)
            .await
            .unwrap();

        assert_eq!(buy.executions(), 1);
    }

    #[tokio::test]
    async fn test_builder_rejects_empty_postback_key() {
        let err = ConversationRunner::builder(InMemoryStateStore::new())
            .with_postback("", Arc::new(ScriptedState::new("x")))
            .build()
            .unwrap_err();
        assert!(matches!(err, ColloquyError::EmptyPostbackKey));
    }

    #[tokio::test]
    async fn test_timeout_bounds_the_callers_wait() {
        let slow = Arc::new(
            ScriptedState::new("slow").with_delay(Duration::from_millis(500)),
        );
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_initial_state(slow)
            .build()
            .unwrap();

        let err = runner
            .run_next_state_timeout(&event("c1"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ColloquyError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_timed_out_turn_completes_cleanup_in_background() {
        let journal = TurnJournal::new();
        let slow = Arc::new(
            ScriptedState::new("slow").with_delay(Duration::from_millis(100)),
        );
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_initial_state(slow.clone())
            .with_interceptor(ProbeInterceptor::new("probe", journal.clone()))
            .build()
            .unwrap();

        let err = runner
            .run_next_state_timeout(&event("c1"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ColloquyError::Timeout { .. }));
        assert_eq!(journal.entries(), vec!["probe.before"]);

        // the turn keeps running after the caller gave up: the state
        // finishes, the after hook fires, and the pending slot drains
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(journal.entries(), vec!["probe.before", "probe.after"]);
        assert_eq!(slow.executions(), 1);
        assert!(runner.store().next_state(&contact("c1")).await.is_none());
        assert_eq!(names(&runner.store().past_states(&contact("c1"))), ["slow"]);
    }

    #[tokio::test]
    async fn test_timed_out_turn_holds_the_contact_lock_until_done() {
        let slow = Arc::new(
            ScriptedState::new("slow").with_delay(Duration::from_millis(100)),
        );
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .with_initial_state(slow.clone())
            .build()
            .unwrap();

        runner
            .run_next_state_timeout(&event("c1"), Duration::from_millis(20))
            .await
            .unwrap_err();

        // a follow-up event waits behind the background turn rather than
        // interleaving with its drain
        runner.run_next_state(&event("c1")).await.unwrap();
        assert_eq!(slow.executions(), 1);
        assert_eq!(runner.store().past_states(&contact("c1")).len(), 1);
    }

    #[test]
    fn test_runner_debug_output() {
        let runner = ConversationRunner::builder(InMemoryStateStore::new())
            .build()
            .unwrap();
        let debug = format!("{runner:?}");
        assert!(debug.contains("ConversationRunner"));
    }
}
