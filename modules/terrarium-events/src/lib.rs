//! Append-only event log with outbox-backed publication.
//!
//! Domain-agnostic: payloads are opaque JSON. Domain crates build
//! envelopes from their own event enums.

pub mod outbox;
pub mod store;
pub mod types;

pub use outbox::{OutboxDispatcher, OutboxRow};
pub use store::{ensure_schema, EventStore};
pub use types::{EventEnvelope, PublishEvent};
