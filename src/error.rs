//! Error taxonomy shared by every service in the engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller-correctable input problem, with the offending field named.
    #[error("validation failed on '{field}': {message}")]
    Validation { field: &'static str, message: String },

    /// A reference or id did not resolve. Terminal for the request.
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    /// The adjustment would drive an inventory quantity negative.
    #[error("invalid adjustment: current quantity {current}, requested change {requested}")]
    InvalidAdjustment { current: i64, requested: i64 },

    /// Storage-layer failure mid-operation. Multi-row writes roll back.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// The external payment gateway call failed or timed out.
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
}

impl CoreError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str) -> Self {
        CoreError::NotFound { entity }
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
