//! Structured parse and compile errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::module::Location;

/// One parse or compile error with its source position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AstError {
    pub message: String,
    pub location: Location,
}

impl AstError {
    pub fn new(message: impl Into<String>, location: Location) -> Self {
        AstError {
            message: message.into(),
            location,
        }
    }
}

impl fmt::Display for AstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// A non-empty list of [`AstError`]s, as produced by the parser and the
/// whole-set compiler.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub struct AstErrors(pub Vec<AstError>);

impl AstErrors {
    pub fn one(message: impl Into<String>, location: Location) -> Self {
        AstErrors(vec![AstError::new(message, location)])
    }
}

impl fmt::Display for AstErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [only] => write!(f, "{}", only),
            errs => {
                write!(f, "{} errors occurred:", errs.len())?;
                for e in errs {
                    write!(f, "\n{}", e)?;
                }
                Ok(())
            }
        }
    }
}
