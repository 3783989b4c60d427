//! Evaluation errors.

use thiserror::Error;

use verdict_store::StoreError;

pub type Result<T> = std::result::Result<T, EvalError>;

#[derive(Error, Debug)]
pub enum EvalError {
    /// Rules defining the same document produced disagreeing outputs.
    #[error("conflicting rule output for data.{0}")]
    Conflict(String),

    /// An expression required a ground value that was not available.
    #[error("unbound value in expression: {0}")]
    NonGround(String),

    /// Storage failure other than absence (absence is "undefined").
    #[error(transparent)]
    Store(#[from] StoreError),
}
