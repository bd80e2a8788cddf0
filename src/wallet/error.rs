//! Transfer Error Types
//!
//! One error enum for the whole wallet engine. Callers branch on the kind
//! (business, transient, fatal); the request layer maps `code()` and
//! `http_status()` into its responses.

use thiserror::Error;

/// Wallet engine error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    // === Business Errors (never retried) ===
    #[error("invalid amount")]
    InvalidAmount,

    #[error("invalid currency")]
    InvalidCurrency,

    #[error("invalid source account")]
    InvalidSourceAccount,

    #[error("invalid destination account")]
    InvalidDestinationAccount,

    #[error("insufficient balance")]
    InsufficientBalance,

    /// The store refused a balance below zero on a non-system account
    #[error("balance would go negative on account {0}")]
    BalanceCheckViolated(String),

    // === Transient Errors (retried) ===
    #[error("concurrent balance update on account {0}")]
    ConcurrentUpdate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TransferError>,
    },

    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded {
        attempts: u32,
        last: Option<Box<TransferError>>,
    },

    // === Idempotency ===
    #[error("reference id already used: {0}")]
    DuplicateReference(String),

    // === Query Errors ===
    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("invalid page size {0}, must be between 1 and 100")]
    InvalidPageSize(u32),

    #[error("invalid next token: {0}")]
    InvalidCursor(String),

    // === Fatal Errors ===
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("Internal system error: {0}")]
    System(String),
}

impl TransferError {
    /// Deterministic rule violations. Retrying cannot change the outcome.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            TransferError::InvalidAmount
                | TransferError::InvalidCurrency
                | TransferError::InvalidSourceAccount
                | TransferError::InvalidDestinationAccount
                | TransferError::InsufficientBalance
                | TransferError::BalanceCheckViolated(_)
        )
    }

    /// Whether the engine's retry loop may re-run the attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::ConcurrentUpdate(_) | TransferError::Database(_)
        )
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::InvalidCurrency => "INVALID_CURRENCY",
            TransferError::InvalidSourceAccount => "INVALID_SOURCE_ACCOUNT",
            TransferError::InvalidDestinationAccount => "INVALID_DESTINATION_ACCOUNT",
            TransferError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            TransferError::BalanceCheckViolated(_) => "BALANCE_CHECK_VIOLATED",
            TransferError::ConcurrentUpdate(_) => "CONCURRENT_UPDATE",
            TransferError::Database(_) => "DATABASE_ERROR",
            TransferError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            TransferError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            TransferError::DuplicateReference(_) => "DUPLICATE_REFERENCE",
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::InvalidPageSize(_) => "INVALID_PAGE_SIZE",
            TransferError::InvalidCursor(_) => "INVALID_CURSOR",
            TransferError::Configuration(_) => "CONFIGURATION_ERROR",
            TransferError::System(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::InvalidAmount
            | TransferError::InvalidCurrency
            | TransferError::InvalidPageSize(_)
            | TransferError::InvalidCursor(_) => 400,
            TransferError::AccountNotFound(_) | TransferError::TransferNotFound(_) => 404,
            TransferError::DuplicateReference(_) => 409,
            TransferError::InvalidSourceAccount
            | TransferError::InvalidDestinationAccount
            | TransferError::InsufficientBalance
            | TransferError::BalanceCheckViolated(_) => 422,
            TransferError::ConcurrentUpdate(_) | TransferError::RetriesExhausted { .. } => 503,
            TransferError::DeadlineExceeded { .. } => 504,
            TransferError::Database(_)
            | TransferError::Configuration(_)
            | TransferError::System(_) => 500,
        }
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(e: serde_json::Error) -> Self {
        TransferError::System(e.to_string())
    }
}
