//! The error taxonomy from spec §7. Every failure in the station or gateway
//! maps to exactly one of these kinds; HTTP layers translate the kind to a
//! status code, never the other way around.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("certificate has expired")]
    CertExpired,
    #[error("{0}")]
    CertInvalid(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl CoreError {
    /// HTTP status per spec §7's surface column.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::BadRequest(_) => 400,
            CoreError::Unauthenticated(_) => 401,
            CoreError::CertExpired => 401,
            CoreError::CertInvalid(_) => 401,
            CoreError::Forbidden(_) => 403,
            CoreError::NotFound(_) => 404,
            CoreError::Conflict(_) => 409,
            CoreError::Upstream(_) => 500,
            CoreError::Internal(_) => 500,
        }
    }

    /// The human-readable message that reaches the wire. No stack traces
    /// ever reach the caller.
    pub fn message(&self) -> String {
        self.to_string()
    }
}
