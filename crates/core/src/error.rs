// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use thiserror::Error;

/// Engine-level error kinds surfaced to callers. The integer codes are
/// part of the wire protocol and must stay stable.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Error {
    #[error("database connection error: {0}")]
    DatabaseConnection(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("missing object: {0}")]
    MissingObject(String),
    #[error("missing type: {0}")]
    MissingType(String),
    #[error("operation failure: {0}")]
    OperationFailure(String),
}

impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Error::DatabaseConnection(_) => 1,
            Error::InvalidRequest(_) => 2,
            Error::QuotaExceeded(_) => 3,
            Error::InvalidSchema(_) => 4,
            Error::Conflict(_) => 5,
            Error::MissingObject(_) => 6,
            Error::MissingType(_) => 7,
            Error::OperationFailure(_) => 100,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::DatabaseConnection(m)
            | Error::InvalidRequest(m)
            | Error::QuotaExceeded(m)
            | Error::InvalidSchema(m)
            | Error::Conflict(m)
            | Error::MissingObject(m)
            | Error::MissingType(m)
            | Error::OperationFailure(m) => m,
        }
    }

    /// Reconstructs an error from its wire form. Unknown codes collapse
    /// into `OperationFailure`.
    pub fn from_code(code: i32, message: String) -> Self {
        match code {
            1 => Error::DatabaseConnection(message),
            2 => Error::InvalidRequest(message),
            3 => Error::QuotaExceeded(message),
            4 => Error::InvalidSchema(message),
            5 => Error::Conflict(message),
            6 => Error::MissingObject(message),
            7 => Error::MissingType(message),
            _ => Error::OperationFailure(message),
        }
    }
}
