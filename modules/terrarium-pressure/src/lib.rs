//! Pressure & credit ledger.
//!
//! Sponsors purchase credits (append-only ledger; balance = signed sum) and
//! spend them on exponentially decaying pressures over a deployment's
//! environment parameters. Sponsors never trigger agent actions — pressures
//! only ever shape environment-shaped parameters.

pub mod braid;
pub mod decay;
pub mod ledger;
pub mod schema;

pub use braid::{braid, cost_multiplier, Braid, BraidView};
pub use decay::current_magnitude;
pub use ledger::{CreatePressure, PressureLedger};
pub use schema::ensure_schema;
