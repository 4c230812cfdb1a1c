//! Core types for the event log. Domain-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An envelope as stored in Postgres. Returned by all read methods.
/// `event_id` is the dedup key every downstream consumer relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq: i64,
    pub event_id: Uuid,
    pub topic: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub payload: serde_json::Value,
    pub context: serde_json::Value,
}

/// An envelope to be published. The writer assigns `event_id` and
/// `occurred_at` at commit time so outbox retries republish the same fact.
#[derive(Debug, Clone)]
pub struct PublishEvent {
    pub event_id: Uuid,
    pub topic: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub payload: serde_json::Value,
    pub context: serde_json::Value,
}

impl PublishEvent {
    pub fn new(
        topic: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            topic: topic.into(),
            event_type: event_type.into(),
            occurred_at: Utc::now(),
            actor_id: None,
            correlation_id: None,
            idempotency_key: None,
            payload,
            context: serde_json::Value::Null,
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}
