//! Action Gate — admission control for agent actions.
//!
//! Owns agents, capacity balances, the action catalog, idempotency, and
//! per-minute throughput buckets. Every decision persists an attempt row
//! and enqueues an envelope for the outbox dispatcher in one transaction.

pub mod catalog;
pub mod gate;
pub mod schema;

pub use catalog::{load_catalog_entry, seed_catalog};
pub use gate::{ActionGate, AttemptRequest, AttemptResponse};
pub use schema::ensure_schema;
