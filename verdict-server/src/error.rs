//! Server error taxonomy and HTTP status mapping.
//!
//! Error kinds translate to status + JSON at the response boundary; the
//! wire shape is `{"Code": <status>, "Message": <text>}`, with compile
//! failures additionally carrying an `"Errors"` array of located
//! sub-errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use verdict_ast::{AstError, AstErrors};
use verdict_store::{Path, StoreError};
use verdict_topdown::EvalError;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    /// The addressed resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A write would touch a rule-computed document.
    #[error("write conflict: {0}")]
    WriteConflict(Path),

    /// Malformed input: bad request parameter, unknown patch op, bad path.
    #[error("{0}")]
    BadRequest(String),

    /// Policy or query failed to parse or compile.
    #[error("{message}")]
    Compile {
        message: String,
        errors: AstErrors,
    },

    /// Storage failure; status derives from the underlying kind.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Evaluation failure.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ServerError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ServerError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ServerError::Internal(msg.into())
    }

    /// Map to an HTTP status, following the underlying error's kind where
    /// this error wraps one.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::WriteConflict(_) => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Compile { .. } => StatusCode::BAD_REQUEST,
            ServerError::Store(e) => store_status(e),
            ServerError::Eval(EvalError::Store(e)) => store_status(e),
            ServerError::Eval(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn store_status(e: &StoreError) -> StatusCode {
    if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        match e {
            StoreError::InvalidPatch(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// V1 error body.
#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "Code")]
    code: u16,
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "Errors", skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<AstError>>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let errors = match &self {
            ServerError::Compile { errors, .. } => Some(errors.0.clone()),
            _ => None,
        };
        let body = ErrorBody {
            code: status.as_u16(),
            message: self.to_string(),
            errors,
        };
        let json = serde_json::to_string_pretty(&body).unwrap_or_else(|_| {
            format!(
                "{{\"Code\": {}, \"Message\": {:?}}}",
                status.as_u16(),
                self.to_string()
            )
        });
        (
            status,
            [("content-type", "application/json")],
            json,
        )
            .into_response()
    }
}
