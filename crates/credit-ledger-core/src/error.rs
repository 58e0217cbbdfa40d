//! Error types for the credit ledger.

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A prerequisite entity is missing (agent, workspace, subscription, plan, settings).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity that was not found.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The model has no entry in the cost table.
    #[error("unknown model: {model}")]
    UnknownModel {
        /// The model identifier that could not be priced.
        model: String,
    },

    /// Missing or inconsistent configuration (payment customer, recharge settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Both pools are exhausted and the debit policy rejects the charge.
    #[error("insufficient credits: available={available}, required={required}")]
    InsufficientCredits {
        /// Extra credits still available.
        available: i64,
        /// Extra credits the charge would need.
        required: i64,
    },

    /// External service error (payment provider).
    #[error("external service error: {service} - {message}")]
    ExternalService {
        /// The service that failed.
        service: String,
        /// Error message.
        message: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Invalid date range for a history query.
    #[error("invalid range: {0}")]
    InvalidRange(String),
}

impl LedgerError {
    /// Shorthand for a [`LedgerError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
