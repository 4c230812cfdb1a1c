//! Projection materializer — disposable read views derived solely from the
//! event log, plus the replay harness that proves it.

pub mod chronicle;
pub mod materializer;
pub mod replay;
pub mod schema;

pub use chronicle::render;
pub use materializer::{ApplyResult, Materializer, CONSUMER_GROUP};
pub use replay::{run_replay, snapshot, ReplayOptions, ReplayReport, Snapshot};
pub use schema::ensure_schema;
