//! Error types for Sitecraft

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SharedError {
    #[error("Unknown payment status: {0}")]
    UnknownPaymentStatus(String),

    #[error("Unknown platform role: {0}")]
    UnknownRole(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
