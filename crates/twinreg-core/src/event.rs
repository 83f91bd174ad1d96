//! Registry lifecycle events and the operation context attached to them.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Who performed an operation, when, and the signal to cancel it.
///
/// The cancellation token is process-local and never serialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationContext {
    /// Identity of the caller, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_id: Option<String>,
    /// Operation time (ms).
    pub time: i64,
    #[serde(skip)]
    cancellation: CancellationToken,
}

impl OperationContext {
    /// Create a context stamped with the current time.
    pub fn new() -> Self {
        Self {
            authority_id: None,
            time: now_millis(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Create a context on behalf of the given authority.
    pub fn for_authority(authority_id: impl Into<String>) -> Self {
        Self {
            authority_id: Some(authority_id.into()),
            ..Self::new()
        }
    }

    /// Attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Override the operation time.
    pub fn at(mut self, time: i64) -> Self {
        self.time = time;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl PartialEq for OperationContext {
    fn eq(&self, other: &Self) -> bool {
        self.authority_id == other.authority_id && self.time == other.time
    }
}

/// Kind of lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    New,
    Updated,
    Found,
    Lost,
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::New => "new",
            EventKind::Updated => "updated",
            EventKind::Found => "found",
            EventKind::Lost => "lost",
            EventKind::Deleted => "deleted",
        }
    }
}

/// A committed lifecycle transition of one entity.
#[derive(Debug, Clone)]
pub struct RegistryEvent<T> {
    pub kind: EventKind,
    /// The entity after the transition.
    pub entity: T,
    pub context: OperationContext,
}

impl<T> RegistryEvent<T> {
    pub fn new(kind: EventKind, entity: T, context: OperationContext) -> Self {
        Self {
            kind,
            entity,
            context,
        }
    }
}

/// Serialized event for propagation outside the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Entity type discriminator (the collection name).
    pub entity_type: String,
    pub kind: EventKind,
    pub entity_id: String,
    pub entity: serde_json::Value,
    pub context: OperationContext,
    /// Publish time (ms).
    pub timestamp: i64,
}

impl EventEnvelope {
    /// Build an envelope from a typed event.
    pub fn from_event<T: Serialize>(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        event: &RegistryEvent<T>,
    ) -> crate::Result<Self> {
        Ok(Self {
            entity_type: entity_type.into(),
            kind: event.kind,
            entity_id: entity_id.into(),
            entity: serde_json::to_value(&event.entity)?,
            context: event.context.clone(),
            timestamp: now_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_roundtrip_skips_token() {
        let ctx = OperationContext::for_authority("operator").at(42);
        ctx.cancellation().cancel();

        let json = serde_json::to_string(&ctx).unwrap();
        assert!(!json.contains("cancellation"));

        let back: OperationContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
        assert!(!back.is_cancelled());
    }

    #[test]
    fn test_envelope_from_event() {
        let event = RegistryEvent::new(
            EventKind::Found,
            serde_json::json!({"id": "app-1"}),
            OperationContext::new(),
        );
        let envelope = EventEnvelope::from_event("applications", "app-1", &event).unwrap();
        assert_eq!(envelope.kind, EventKind::Found);
        assert_eq!(envelope.entity["id"], "app-1");
        assert_eq!(
            serde_json::to_value(envelope.kind).unwrap(),
            serde_json::json!("found")
        );
    }
}
