//! Error types for the document store

/// Errors returned by [`DocumentStore`](crate::DocumentStore) implementations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Referenced document does not exist
    #[error("document not found: {0}")]
    NotFound(String),

    /// Document exists but the write required it not to
    #[error("document already exists: {0}")]
    AlreadyExists(String),

    /// Version precondition failed (optimistic concurrency)
    #[error("version conflict on {path}: expected {expected}, found {actual:?}")]
    Conflict {
        /// Document path
        path: String,
        /// Version the writer read
        expected: u64,
        /// Version currently stored (`None` if the document is gone)
        actual: Option<u64>,
    },

    /// Transport failure or store offline
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Malformed document or collection path
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// Offending path
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// Document fields could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Create invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if a retry may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Conflict { .. })
    }

    /// Check if this is a version conflict
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::Conflict {
            path: "projects/p1".to_string(),
            expected: 3,
            actual: Some(4),
        };
        assert!(err.to_string().contains("version conflict on projects/p1"));
    }

    #[test]
    fn store_error_is_retryable() {
        assert!(StoreError::Unavailable("offline".to_string()).is_retryable());
        assert!(!StoreError::NotFound("projects/p1".to_string()).is_retryable());
        assert!(!StoreError::invalid_path("a", "odd").is_retryable());
    }
}
