//! Error types for ledger operations.

use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Database operation failed.
    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Referenced user does not exist.
    #[error("user not found: {0}")]
    UserNotFound(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_not_found_display() {
        let error = LedgerError::UserNotFound(42);
        assert!(error.to_string().contains("42"));
    }
}
