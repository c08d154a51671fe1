use thiserror::Error;

/// Failures raised by the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store operation timed out after {0}s")]
    Timeout(u64),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            Self::Migration(_) | Self::Corrupt(_) => false,
        }
    }
}

/// Error taxonomy of the matching core.
///
/// Duplicates (edge or exchange) and operations on already-deleted rows are
/// reported through outcome types, never through this enum.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Initiation rule violated; user-correctable.
    #[error("{0}")]
    PolicyBlocked(String),

    /// Malformed input rejected before reaching the store.
    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Store unavailable after bounded retries.
    #[error("Temporarily unavailable: {0}")]
    Transient(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoreError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CoreError::Store(StoreError::Timeout(5)).is_transient());
        assert!(CoreError::Store(StoreError::Database(sqlx::Error::PoolTimedOut)).is_transient());
        assert!(!CoreError::Store(StoreError::Database(sqlx::Error::RowNotFound)).is_transient());
        assert!(!CoreError::Invalid("bad".to_string()).is_transient());
    }

    #[test]
    fn test_policy_message_is_user_facing() {
        let err = CoreError::PolicyBlocked("Wait for them to flick you first".to_string());
        assert_eq!(err.to_string(), "Wait for them to flick you first");
    }
}
