//! Error types for the FleetGrid state store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state store: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    /// A record could not be encoded for storage.
    #[error("cannot encode record '{key}': {reason}")]
    Encode { key: String, reason: String },

    /// A stored record no longer decodes into its type.
    #[error("stored record '{key}' is unreadable: {reason}")]
    Corrupt { key: String, reason: String },

    /// A DNS record handed to another deployment's replace call.
    #[error("DNS record '{record}' belongs to deployment '{owner}', not '{deployment}'")]
    ForeignRecord {
        record: String,
        owner: String,
        deployment: String,
    },
}
