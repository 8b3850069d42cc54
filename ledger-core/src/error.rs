use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Error taxonomy for the AR ledger engine.
///
/// Every variant carries enough structured detail for a transport layer to
/// render a precise message without re-deriving it. Errors are raised before
/// any write in a transaction commits; the engine never retries.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} {id} is {current}; cannot {attempted}")]
    InvalidState {
        entity: &'static str,
        id: Uuid,
        current: String,
        attempted: &'static str,
    },

    #[error("{context}: requested {requested} exceeds allowed maximum {max_allowed}")]
    OverAllocation {
        context: &'static str,
        requested: Decimal,
        max_allowed: Decimal,
    },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        LedgerError::NotFound { entity, id }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: Uuid,
        current: impl Into<String>,
        attempted: &'static str,
    ) -> Self {
        LedgerError::InvalidState {
            entity,
            id,
            current: current.into(),
            attempted,
        }
    }

    pub fn over_allocation(
        context: &'static str,
        requested: Decimal,
        max_allowed: Decimal,
    ) -> Self {
        LedgerError::OverAllocation {
            context,
            requested,
            max_allowed,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
