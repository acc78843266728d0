//! Identity provider adapter and user directory
//!
//! The engine never performs a login handshake. It consumes the [`Identity`]
//! an [`IdentityProvider`] resolves, merges it into `users/{uid}` and keeps a
//! bounded, expiring cache of profiles for sender display info.

use crate::config::{DirectoryConfig, RetryConfig};
use crate::error::{DevflowError, Result};
use crate::retry::retry_read;
use crate::types::{Uid, UserProfile};
use async_trait::async_trait;
use devflow_store::{encode_fields, CollectionPath, DocPath, DocumentStore, FieldOp, Write};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Sign-in failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// User aborted the login
    #[error("sign-in cancelled")]
    Cancelled,

    /// Provider refused the credentials
    #[error("sign-in rejected: {0}")]
    Rejected(String),

    /// Provider could not be reached
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    /// Provider returned an unusable identity
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}

/// Authenticated identity as resolved by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable user id
    pub uid: Uid,
    /// Display name
    #[serde(default)]
    pub display_name: Option<String>,
    /// Email
    #[serde(default)]
    pub email: Option<String>,
    /// Avatar URL
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
    /// Username at the provider
    #[serde(default)]
    pub external_username: Option<String>,
}

impl Identity {
    /// Identity with only a uid
    #[must_use]
    pub fn new(uid: impl Into<Uid>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            email: None,
            photo_url: None,
            external_username: None,
        }
    }

    /// With display name
    #[inline]
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// With email
    #[inline]
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// With avatar URL
    #[inline]
    #[must_use]
    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    /// With provider username
    #[inline]
    #[must_use]
    pub fn with_external_username(mut self, username: impl Into<String>) -> Self {
        self.external_username = Some(username.into());
        self
    }
}

/// Resolves an external login into an [`Identity`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authenticate once per session
    async fn authenticate(&self) -> std::result::Result<Identity, AuthError>;
}

/// Provider that always returns the same identity
#[derive(Debug, Clone)]
pub struct StaticIdentityProvider {
    identity: Identity,
}

impl StaticIdentityProvider {
    /// Wrap an identity
    #[inline]
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self) -> std::result::Result<Identity, AuthError> {
        Ok(self.identity.clone())
    }
}

/// Profiles stored under `users/{uid}`
#[derive(Debug, Clone)]
pub struct UserDirectory {
    store: Arc<dyn DocumentStore>,
    cache: Cache<Uid, UserProfile>,
    retry: RetryConfig,
}

impl UserDirectory {
    /// Create a directory over `store`
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: &DirectoryConfig, retry: RetryConfig) -> Self {
        Self {
            store,
            cache: Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(config.ttl())
                .build(),
            retry,
        }
    }

    fn users() -> Result<CollectionPath> {
        Ok(CollectionPath::root("users")?)
    }

    fn user_path(uid: &Uid) -> Result<DocPath> {
        Ok(Self::users()?.doc(uid.as_str())?)
    }

    /// Create or merge the profile of a freshly signed-in user
    ///
    /// Fields the provider did not supply are left as stored.
    pub async fn upsert(&self, identity: &Identity) -> Result<UserProfile> {
        if identity.uid.is_blank() {
            return Err(AuthError::InvalidIdentity("empty uid".to_string()).into());
        }
        let path = Self::user_path(&identity.uid)?;

        let mut fields = encode_fields(identity)?;
        fields.retain(|_, value| !value.is_null());

        let result = self
            .store
            .commit(vec![
                Write::merge(path.clone(), fields),
                Write::update(path.clone(), vec![FieldOp::ServerTimestamp("lastLoginAt".into())]),
            ])
            .await?;
        let doc = result
            .documents
            .last()
            .cloned()
            .flatten()
            .ok_or_else(|| DevflowError::Corrupted(format!("{path} vanished during upsert")))?;
        let profile: UserProfile = doc.decode()?;

        self.cache.insert(profile.uid.clone(), profile.clone()).await;
        tracing::info!(uid = %profile.uid, "user signed in");
        Ok(profile)
    }

    /// Look up a profile, from cache when possible
    pub async fn profile(&self, uid: &Uid) -> Result<Option<UserProfile>> {
        if let Some(profile) = self.cache.get(uid).await {
            return Ok(Some(profile));
        }
        let path = Self::user_path(uid)?;
        let doc = retry_read(&self.retry, "user profile", || async {
            Ok(self.store.get(&path).await?)
        })
        .await?;
        let Some(doc) = doc else {
            return Ok(None);
        };
        let profile: UserProfile = doc.decode()?;
        self.cache.insert(uid.clone(), profile.clone()).await;
        Ok(Some(profile))
    }

    /// Drop a cached profile
    pub async fn invalidate(&self, uid: &Uid) {
        self.cache.invalidate(uid).await;
    }
}
