use crate::domain_model::*;
use crate::domain_port::StoreError;
use chrono::{DateTime, Utc};

/// Persistence for remember-me selectors and validator hashes.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Whether `insert` mints selectors itself when given none.
    fn mints_selectors(&self) -> bool {
        false
    }

    async fn get(&self, selector: &str) -> Result<Option<RememberMeRecord>, StoreError>;

    /// Insert a new token and return its selector. When `selector` is `None`
    /// the store must mint a unique one.
    async fn insert(
        &self,
        selector: Option<&str>,
        user: &UserId,
        validator_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StoreError>;

    /// Replace hash and expiry of an existing selector owned by `user`.
    /// Returns `false` when no such selector exists for that user.
    async fn update(
        &self,
        selector: &str,
        user: &UserId,
        validator_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn delete_selector(&self, selector: &str) -> Result<bool, StoreError>;

    /// Returns how many selectors were removed.
    async fn delete_user(&self, user: &UserId) -> Result<u64, StoreError>;
}
