//! Physics engine — deterministic, reaction-blind environment simulator.
//!
//! Its only inputs are its own prior state and a seeded PRNG. It never
//! reads projections, sessions, artifacts, or sponsor state. Ticks are
//! triggered externally; every draw is reproducible from the recorded
//! seed and sequence.

pub mod engine;
pub mod regimes;
pub mod schema;

pub use engine::{draw_weather, weather_profile, PhysicsEngine};
pub use regimes::{delete_regime, list_regimes, seed_default_regimes, upsert_regime};
pub use schema::ensure_schema;
