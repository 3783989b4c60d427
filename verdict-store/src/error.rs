//! Store error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The addressed document does not exist.
    #[error("document does not exist: {0}")]
    NotFound(String),

    /// The addressed policy module does not exist.
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// A patch is structurally invalid for the target document.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// A write was attempted through a read transaction.
    #[error("write on read-only transaction")]
    ReadOnly,

    /// A persisted policy file failed to parse at startup.
    #[error("bad persisted policy {id}: {message}")]
    BadPolicy { id: String, message: String },

    /// Policy persistence I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(path: impl ToString) -> Self {
        StoreError::NotFound(path.to_string())
    }

    pub fn invalid_patch(msg: impl Into<String>) -> Self {
        StoreError::InvalidPatch(msg.into())
    }

    /// True for the error kinds that mean "the target is absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::PolicyNotFound(_))
    }
}
