pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::Config;
pub use error::TerrariumError;
pub use events::Event;
pub use types::*;
