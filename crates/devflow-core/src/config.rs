//! Engine configuration
//!
//! All sections have defaults, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! [retry]
//! max_conflict_retries = 16
//!
//! [chat]
//! max_message_len = 500
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for [`DevflowConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// DevFlow configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevflowConfig {
    /// Retry policy
    pub retry: RetryConfig,
    /// Input limits
    pub validation: ValidationConfig,
    /// Chat limits
    pub chat: ChatConfig,
    /// User directory cache
    pub directory: DirectoryConfig,
}

impl DevflowConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// With conflict retry budget
    #[inline]
    #[must_use]
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.retry.max_conflict_retries = retries;
        self
    }

    /// With read attempt budget
    #[inline]
    #[must_use]
    pub fn with_max_read_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_read_attempts = attempts;
        self
    }

    /// With backoff bounds
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry.base_backoff_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        self.retry.max_backoff_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With maximum project title length
    #[inline]
    #[must_use]
    pub fn with_max_title_len(mut self, len: usize) -> Self {
        self.validation.max_title_len = len;
        self
    }

    /// Require a repository URL on project creation
    #[inline]
    #[must_use]
    pub fn with_required_repo_url(mut self, required: bool) -> Self {
        self.validation.require_repo_url = required;
        self
    }

    /// With maximum chat message length
    #[inline]
    #[must_use]
    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.chat.max_message_len = len;
        self
    }

    /// With user directory cache bounds
    #[inline]
    #[must_use]
    pub fn with_directory_cache(mut self, capacity: u64, ttl: Duration) -> Self {
        self.directory.cache_capacity = capacity;
        self.directory.cache_ttl_secs = ttl.as_secs();
        self
    }
}

/// Retry and backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after a version conflict before surfacing `Conflict`
    pub max_conflict_retries: u32,
    /// Total attempts for a read that hits `StoreUnavailable`
    pub max_read_attempts: u32,
    /// First backoff step in milliseconds
    pub base_backoff_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 10,
            max_read_attempts: 3,
            base_backoff_ms: 5,
            max_backoff_ms: 200,
        }
    }
}

impl RetryConfig {
    /// First backoff step
    #[inline]
    #[must_use]
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    /// Backoff ceiling
    #[inline]
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Input validation limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum project and task title length in characters
    pub max_title_len: usize,
    /// Maximum description length in characters
    pub max_description_len: usize,
    /// Reject projects without a repository URL
    pub require_repo_url: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_title_len: 120,
            max_description_len: 5000,
            require_repo_url: false,
        }
    }
}

/// Chat limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum message length in characters
    pub max_message_len: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_len: 2000,
        }
    }
}

/// User directory cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Maximum cached profiles
    pub cache_capacity: u64,
    /// Profile time-to-live in seconds
    pub cache_ttl_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            cache_ttl_secs: 300,
        }
    }
}

impl DirectoryConfig {
    /// Profile time-to-live
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
