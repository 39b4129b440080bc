//! Storage error types for the system-of-record abstraction.

/// Errors that can occur during system-of-record operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested row was not found.
    #[error("Not found: {entity}/{id}")]
    NotFound {
        /// Entity kind (table) that was looked up.
        entity: &'static str,
        /// Identifier that was not found.
        id: String,
    },

    /// A uniqueness guard rejected the write.
    #[error("Already exists: {entity}/{id}")]
    AlreadyExists {
        /// Entity kind (table) that was written.
        entity: &'static str,
        /// Identifier of the conflicting row.
        id: String,
    },

    /// An error occurred while beginning, committing or rolling back.
    #[error("Transaction error: {message}")]
    TransactionError {
        /// Description of the transaction error.
        message: String,
    },

    /// Failed to reach the storage backend.
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Description of the connection error.
        message: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a new `TransactionError` error.
    #[must_use]
    pub fn transaction_error(message: impl Into<String>) -> Self {
        Self::TransactionError {
            message: message.into(),
        }
    }

    /// Creates a new `ConnectionError` error.
    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error comes from a uniqueness guard.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::not_found("tb_seckill_voucher", 3);
        assert_eq!(err.to_string(), "Not found: tb_seckill_voucher/3");

        let err = StorageError::already_exists("tb_voucher_order", "7/3");
        assert!(err.is_conflict());
        assert!(!StorageError::internal("boom").is_conflict());
    }
}
