use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use nanoid::nanoid;

/// Process-local remember-me store keyed by selector.
pub struct MemoryCredentialStore {
    records: DashMap<String, RememberMeRecord>,
    mints_selectors: bool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        MemoryCredentialStore {
            records: DashMap::new(),
            mints_selectors: false,
        }
    }

    /// A store that picks selectors itself instead of taking the caller's.
    pub fn minting() -> Self {
        MemoryCredentialStore {
            records: DashMap::new(),
            mints_selectors: true,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    fn mints_selectors(&self) -> bool {
        self.mints_selectors
    }

    async fn get(&self, selector: &str) -> Result<Option<RememberMeRecord>, StoreError> {
        Ok(self.records.get(selector).map(|r| r.value().clone()))
    }

    async fn insert(
        &self,
        selector: Option<&str>,
        user: &UserId,
        validator_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let selector = match selector {
            Some(s) => s.to_string(),
            None => nanoid!(24),
        };
        match self.records.entry(selector.clone()) {
            Entry::Occupied(_) => Err(StoreError::Backend(format!(
                "selector {} already exists",
                selector
            ))),
            Entry::Vacant(slot) => {
                slot.insert(RememberMeRecord {
                    selector: selector.clone(),
                    user: user.clone(),
                    validator_hash: validator_hash.to_string(),
                    expires_at,
                });
                Ok(selector)
            }
        }
    }

    async fn update(
        &self,
        selector: &str,
        user: &UserId,
        validator_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.records.get_mut(selector) {
            Some(mut record) if &record.user == user => {
                record.validator_hash = validator_hash.to_string();
                record.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_selector(&self, selector: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(selector).is_some())
    }

    async fn delete_user(&self, user: &UserId) -> Result<u64, StoreError> {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let keep = &record.user != user;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
