//! Error types for the circulation core

use thiserror::Error;

/// Main application error type.
///
/// The first group are expected, user-facing circulation outcomes; callers map
/// them to whatever transport they serve. `Invariant` is different: it means a
/// consistency rule of the allocation path has been violated and must be
/// surfaced loudly, never corrected in place.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No copy available: {0}")]
    NoCopyAvailable(String),

    #[error("User account is blocked: {0}")]
    UserBlocked(String),

    #[error("Loan limit exceeded ({current}/{limit})")]
    LoanLimitExceeded { current: i64, limit: i64 },

    #[error("Loan already returned")]
    AlreadyReturned,

    #[error("Loan with id {0} not found")]
    LoanNotFound(i32),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Reservation not usable: {0}")]
    ReservationNotUsable(String),

    #[error("Extension denied: {0}")]
    ExtensionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Business rule violation: {0}")]
    BusinessRule(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Invariant faults and storage failures indicate a bug or an outage;
    /// everything else is a normal circulation outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Invariant(_) | AppError::Database(_) | AppError::Internal(_))
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
