//! Error types for the KV substrate client.

/// Errors raised by the KV substrate.
///
/// These are infrastructure failures. Contention outcomes (a key already
/// present for set-if-absent, a script returning a rejection code) are
/// ordinary return values.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// Could not obtain a pooled connection.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Could not build the connection pool.
    #[error("Redis pool creation failed: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    /// A command failed on the server.
    #[error("Redis command error: {0}")]
    Command(#[from] redis::RedisError),

    /// The stored value has a different type than the operation expects.
    #[error("Wrong type at {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },

    /// An atomic script failed.
    #[error("Script {script} failed: {message}")]
    Script {
        script: &'static str,
        message: String,
    },
}

impl KvError {
    #[must_use]
    pub fn wrong_type(key: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType {
            key: key.into(),
            expected,
        }
    }

    #[must_use]
    pub fn script(script: &'static str, message: impl Into<String>) -> Self {
        Self::Script {
            script,
            message: message.into(),
        }
    }
}

/// Result type alias for KV operations.
pub type Result<T> = std::result::Result<T, KvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KvError::wrong_type("seckill:order:1", "set");
        assert_eq!(err.to_string(), "Wrong type at seckill:order:1: expected set");

        let err = KvError::script("unlock", "missing owner token");
        assert!(err.to_string().contains("Script unlock failed"));
    }
}
