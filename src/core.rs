//! Core identifier and event types shared across the engine.
//!
//! `ChannelId` and `ContactId` are opaque newtypes: the engine never parses
//! them, it only partitions state by them. `TurnId` correlates all log
//! records produced while one inbound event is processed.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifies the messaging channel an event arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Create a channel id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Stable, opaque key identifying one conversation participant.
///
/// All engine state (pending next state, history, turn lock) is partitioned
/// by this key. There is no cross-contact sharing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(String);

impl ContactId {
    /// Create a contact id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContactId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ContactId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Turn Id
// =============================================================================

/// Correlates all log records emitted while processing one inbound event.
///
/// A fresh id is generated per turn and attached to the turn's tracing span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(Uuid);

impl TurnId {
    /// Generate a fresh turn id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Inbound Event
// =============================================================================

/// One inbound event for one contact, as delivered by the transport layer.
///
/// The `data` payload is channel-specific and opaque to the engine; it is
/// passed through to states and interceptors untouched. The only path the
/// engine itself reads is `postback.payload` during postback routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// The channel the event arrived on.
    pub channel_id: ChannelId,
    /// The participant the event belongs to.
    pub contact_id: ContactId,
    /// Channel-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl InboundEvent {
    /// Create an inbound event.
    pub fn new(
        channel_id: impl Into<ChannelId>,
        contact_id: impl Into<ContactId>,
        data: Value,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            contact_id: contact_id.into(),
            data,
        }
    }
}

/// Fixed, documented path into the event payload where postback data lives.
///
/// Returns `None` when the payload has no `postback.payload` field.
pub(crate) fn postback_payload(data: &Value) -> Option<&Value> {
    data.get("postback").and_then(|p| p.get("payload"))
}
