//! Error types for DevFlow Core
//!
//! Every public operation resolves to either a value or one of the
//! [`DevflowError`] kinds:
//! - Validation failures (bad input, surfaced to the user)
//! - Permission failures (role check, never retried)
//! - Missing projects or tasks
//! - Status transitions out of a terminal state
//! - Exhausted optimistic-concurrency retries
//! - Store transport failures

use crate::identity::AuthError;
use crate::types::TaskStatus;
use devflow_store::StoreError;
use serde::Serialize;
use std::fmt;

/// Main DevFlow error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DevflowError {
    /// Input failed validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// Actor's role does not permit the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Project or task missing
    #[error("not found: {0}")]
    NotFound(String),

    /// Status change not allowed by the task state machine
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },

    /// Optimistic concurrency retries exhausted
    #[error("conflicting concurrent update on {path} after {attempts} attempts")]
    Conflict {
        /// Contended document
        path: String,
        /// Attempts made
        attempts: u32,
    },

    /// Store transport failure
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Sign-in failed
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Stored document could not be decoded or addressed
    #[error("corrupted data: {0}")]
    Corrupted(String),
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller-recoverable input error
    Validation,
    /// Role check failed
    PermissionDenied,
    /// Missing entity
    NotFound,
    /// Terminal status
    InvalidTransition,
    /// Retries exhausted
    Conflict,
    /// Transport failure
    StoreUnavailable,
    /// Sign-in failure
    Auth,
    /// Undecodable data
    Corrupted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::InvalidTransition => "invalid_transition",
            Self::Conflict => "conflict",
            Self::StoreUnavailable => "store_unavailable",
            Self::Auth => "auth",
            Self::Corrupted => "corrupted",
        };
        f.write_str(name)
    }
}

impl DevflowError {
    /// Create validation error
    #[inline]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create permission error
    #[inline]
    pub fn denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create not-found error
    #[inline]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Corrupted(_) => ErrorKind::Corrupted,
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::StoreUnavailable(_))
    }
}

impl From<StoreError> for DevflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(path) => Self::NotFound(path),
            StoreError::AlreadyExists(path) => Self::Conflict { path, attempts: 1 },
            StoreError::Conflict { path, .. } => Self::Conflict { path, attempts: 1 },
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            err @ (StoreError::InvalidPath { .. } | StoreError::Serialization(_)) => {
                Self::Corrupted(err.to_string())
            }
        }
    }
}

/// Result alias
pub type Result<T, E = DevflowError> = std::result::Result<T, E>;
