//! Ledger Error Types
//!
//! One taxonomy shared by the store, the atomic unit and the transfer
//! coordinator. Error codes are stable strings for the HTTP layer.

use std::time::Duration;

use thiserror::Error;

use crate::ledger::AccountId;
use crate::transfer::ValidationError;

/// SQLSTATE `lock_not_available` (raised when `lock_timeout` elapses)
const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";
/// SQLSTATE `deadlock_detected`
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Rejected before any storage access ===
    #[error("Invalid transfer request: {0}")]
    Validation(#[from] ValidationError),

    // === Aborted inside the atomic unit ===
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Lock contention: {0}")]
    LockContention(String),

    #[error("Atomic unit timed out after {0:?}")]
    Timeout(Duration),

    #[error("Atomic unit cancelled")]
    Cancelled,

    // === Persistence ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal system error: {0}")]
    SystemError(String),

    #[error("Rollback failed: {rollback} (original error: {cause})")]
    RollbackFailed {
        cause: Box<LedgerError>,
        rollback: Box<LedgerError>,
    },
}

impl LedgerError {
    /// Error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(e) => e.code(),
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::LockContention(_) => "LOCK_CONTENTION",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::Cancelled => "CANCELLED",
            LedgerError::Database(_) => "DATABASE_ERROR",
            LedgerError::SystemError(_) => "SYSTEM_ERROR",
            LedgerError::RollbackFailed { .. } => "ROLLBACK_FAILED",
        }
    }

    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::Validation(_) => 400,
            LedgerError::AccountNotFound(_) => 404,
            LedgerError::LockContention(_) => 409,
            LedgerError::Cancelled => 499,
            LedgerError::Timeout(_) => 504,
            LedgerError::Database(_)
            | LedgerError::SystemError(_)
            | LedgerError::RollbackFailed { .. } => 500,
        }
    }

    /// Whether re-issuing the whole transfer from scratch may succeed.
    ///
    /// The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockContention(_))
    }

    /// Unexpected store failure, always fatal to the request
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            LedgerError::Database(_)
                | LedgerError::SystemError(_)
                | LedgerError::RollbackFailed { .. }
        )
    }

    /// The error that aborted the unit, looking through a failed rollback
    pub fn root_cause(&self) -> &LedgerError {
        match self {
            LedgerError::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e
            && let Some(code) = db.code()
            && (code == SQLSTATE_LOCK_NOT_AVAILABLE || code == SQLSTATE_DEADLOCK_DETECTED)
        {
            return LedgerError::LockContention(db.message().to_string());
        }
        LedgerError::Database(e.to_string())
    }
}
