//! Testing utilities for conversation states and interceptor chains.
//!
//! # Feature Flag
//!
//! This module is available in-crate for unit tests and externally with the
//! `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! colloquy = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use colloquy::testing::{ProbeInterceptor, ScriptedState, TurnJournal};
//! use std::sync::Arc;
//!
//! let journal = TurnJournal::new();
//! let done = Arc::new(ScriptedState::new("done").with_journal(journal.clone()));
//! let greet = Arc::new(ScriptedState::new("greet").with_next(done).with_journal(journal.clone()));
//!
//! let runner = ConversationRunner::builder(InMemoryStateStore::new())
//!     .with_initial_state(greet)
//!     .with_interceptor(ProbeInterceptor::new("auth", journal.clone()))
//!     .build()?;
//!
//! runner.run_next_state(&event).await?;
//! assert_eq!(journal.entries(), vec!["auth.before", "greet.execute", "done.execute", "auth.after"]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::core::{ChannelId, ContactId};
use crate::interceptor::Interceptor;
use crate::state::{ConversationState, StateRef};

// =============================================================================
// Turn Journal
// =============================================================================

/// Shared, ordered record of what ran during a turn.
///
/// Cloning is cheap; all clones append to the same journal. Use it to
/// assert hook and state ordering across a whole turn.
#[derive(Clone, Default)]
pub struct TurnJournal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl TurnJournal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .expect("journal mutex not poisoned")
            .push(entry.into());
    }

    /// Snapshot of all entries, in recording order.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("journal mutex not poisoned")
            .clone()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("journal mutex not poisoned")
            .len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Scripted State
// =============================================================================

/// A [`ConversationState`] with pre-programmed behavior.
///
/// Configure what `execute` returns (`with_next`), what `find_next_state`
/// returns (`with_resume` / `set_resume`), whether `execute` fails
/// (`failing`), and an optional execution delay for timeout and
/// concurrency tests.
pub struct ScriptedState {
    label: &'static str,
    next: Option<StateRef>,
    resume: OnceLock<StateRef>,
    fail_execute: bool,
    delay: Option<Duration>,
    executions: AtomicUsize,
    journal: Option<TurnJournal>,
}

impl ScriptedState {
    /// Create a terminal state: `execute` returns `Ok(None)`.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            next: None,
            resume: OnceLock::new(),
            fail_execute: false,
            delay: None,
            executions: AtomicUsize::new(0),
            journal: None,
        }
    }

    /// `execute` returns this state as the next pending state.
    pub fn with_next(mut self, next: StateRef) -> Self {
        self.next = Some(next);
        self
    }

    /// `find_next_state` returns this state when the conversation resumes.
    pub fn with_resume(self, resume: StateRef) -> Self {
        self.resume
            .set(resume)
            .unwrap_or_else(|_| panic!("resume already set for {}", self.label));
        self
    }

    /// `execute` fails with an error naming the state.
    pub fn failing(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    /// `execute` sleeps before doing anything else.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Record `"<label>.execute"` in the journal on every execution.
    pub fn with_journal(mut self, journal: TurnJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Set the resume target after construction.
    ///
    /// This is the only way to script a state that resumes to itself:
    /// `Arc` the state first, then pass a clone back in. No-op if a resume
    /// target was already set.
    pub fn set_resume(&self, resume: StateRef) {
        let _ = self.resume.set(resume);
    }

    /// How many times `execute` has run.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationState for ScriptedState {
    async fn execute(
        &self,
        _channel_id: &ChannelId,
        _contact_id: &ContactId,
        _event_data: &Value,
    ) -> Result<Option<StateRef>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(journal) = &self.journal {
            journal.record(format!("{}.execute", self.label));
        }
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.fail_execute {
            anyhow::bail!("state {} failed", self.label);
        }
        Ok(self.next.clone())
    }

    async fn find_next_state(
        &self,
        _channel_id: &ChannelId,
        _contact_id: &ContactId,
        _event_data: &Value,
        _current: &StateRef,
    ) -> Result<Option<StateRef>> {
        Ok(self.resume.get().cloned())
    }

    fn name(&self) -> &str {
        self.label
    }
}

// =============================================================================
// Probe Interceptor
// =============================================================================

/// An [`Interceptor`] that journals its hook calls.
///
/// Records `"<label>.before"` and `"<label>.after"`. Can be configured to
/// veto, to fail in `before`, or to fail in `after` (failing hooks record
/// nothing, so the journal shows exactly what completed).
pub struct ProbeInterceptor {
    label: &'static str,
    journal: TurnJournal,
    veto: bool,
    fail_before: bool,
    fail_after: bool,
}

impl ProbeInterceptor {
    /// Create a pass-through probe.
    pub fn new(label: &'static str, journal: TurnJournal) -> Self {
        Self {
            label,
            journal,
            veto: false,
            fail_before: false,
            fail_after: false,
        }
    }

    /// `before` records its call, then vetoes the turn.
    pub fn vetoing(mut self) -> Self {
        self.veto = true;
        self
    }

    /// `before` fails without recording.
    pub fn failing_before(mut self) -> Self {
        self.fail_before = true;
        self
    }

    /// `after` fails without recording.
    pub fn failing_after(mut self) -> Self {
        self.fail_after = true;
        self
    }
}

#[async_trait]
impl Interceptor for ProbeInterceptor {
    async fn before(
        &self,
        _channel_id: &ChannelId,
        _contact_id: &ContactId,
        _event_data: &Value,
    ) -> Result<bool> {
        if self.fail_before {
            anyhow::bail!("interceptor {} failed in before", self.label);
        }
        self.journal.record(format!("{}.before", self.label));
        Ok(!self.veto)
    }

    async fn after(
        &self,
        _channel_id: &ChannelId,
        _contact_id: &ContactId,
        _event_data: &Value,
    ) -> Result<()> {
        if self.fail_after {
            anyhow::bail!("interceptor {} failed in after", self.label);
        }
        self.journal.record(format!("{}.after", self.label));
        Ok(())
    }

    fn name(&self) -> &str {
        self.label
    }
}
