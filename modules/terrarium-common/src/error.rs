use thiserror::Error;

use crate::types::RejectReason;

#[derive(Error, Debug)]
pub enum TerrariumError {
    #[error("{0}")]
    Rejected(RejectReason),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("insufficient_role")]
    InsufficientRole,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Replay divergence: {0}")]
    ReplayDivergence(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
