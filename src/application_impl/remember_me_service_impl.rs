use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use argon2::password_hash::rand_core::{OsRng, RngCore};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use hmac::{Hmac, KeyInit, Mac};
use nanoid::nanoid;
use sha2::Sha256;
use std::sync::Arc;

const VALIDATOR_BYTES: usize = 32;
const SELECTOR_LEN: usize = 24;

/// Selector/validator persistent login tokens.
///
/// Only an HMAC of the validator, keyed by a server-side pepper, reaches the
/// store. The plaintext validator lives in the cookie and nowhere else.
pub struct RealRememberMeService {
    store: Arc<dyn CredentialStore>,
    pepper: Vec<u8>,
    ttl: Duration,
}

impl RealRememberMeService {
    pub fn new(store: Arc<dyn CredentialStore>, pepper: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            store,
            pepper: pepper.into(),
            ttl,
        }
    }

    fn mac(&self) -> Result<Hmac<Sha256>, RememberMeError> {
        Hmac::<Sha256>::new_from_slice(&self.pepper)
            .map_err(|e| RememberMeError::InternalError(e.to_string()))
    }

    fn hash_validator(&self, validator: &str) -> Result<String, RememberMeError> {
        let mut mac = self.mac()?;
        mac.update(validator.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time comparison of the presented validator against the stored hash.
    fn validator_matches(&self, validator: &str, stored_hash: &str) -> Result<bool, RememberMeError> {
        let expected = hex::decode(stored_hash)
            .map_err(|e| StoreError::Corrupted(format!("validator hash: {}", e)))?;
        let mut mac = self.mac()?;
        mac.update(validator.as_bytes());
        Ok(mac.verify_slice(&expected).is_ok())
    }

    fn new_validator() -> String {
        let mut bytes = [0u8; VALIDATOR_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    async fn lookup(&self, cookie: &RememberMeCookie) -> Result<RememberMeRecord, RememberMeError> {
        let record = self
            .store
            .get(&cookie.selector)
            .await?
            .ok_or(RememberMeError::NoSession)?;

        if record.is_expired_at(Utc::now()) {
            debug!(selector = %cookie.selector, "remember-me token expired");
            self.store.delete_selector(&cookie.selector).await?;
            return Err(RememberMeError::SessionExpired);
        }

        if !self.validator_matches(&cookie.validator, &record.validator_hash)? {
            // A live selector with the wrong validator: the cookie was most
            // likely copied and the legitimate one has since been rotated.
            warn!(
                selector = %cookie.selector,
                user = %record.user,
                "remember-me validator mismatch, possible cookie theft"
            );
            return Err(RememberMeError::AuthenticationFailure);
        }
        Ok(record)
    }
}

#[async_trait::async_trait]
impl RememberMeService for RealRememberMeService {
    async fn issue(&self, user: &UserId) -> Result<RememberMeCookie, RememberMeError> {
        let validator = Self::new_validator();
        let hash = self.hash_validator(&validator)?;
        let expires_at = Utc::now() + self.ttl;

        let proposed = if self.store.mints_selectors() {
            None
        } else {
            Some(nanoid!(SELECTOR_LEN))
        };
        let selector = self
            .store
            .insert(proposed.as_deref(), user, &hash, expires_at)
            .await?;

        info!(user = %user, selector = %selector, "remember-me token issued");
        Ok(RememberMeCookie {
            selector,
            validator,
        })
    }

    async fn verify(&self, cookie_value: &str) -> Result<UserId, RememberMeError> {
        let cookie = RememberMeCookie::decode(cookie_value).ok_or(RememberMeError::BadCookie)?;
        let record = self.lookup(&cookie).await?;
        Ok(record.user)
    }

    async fn rotate(
        &self,
        selector: &str,
        user: &UserId,
    ) -> Result<RememberMeCookie, RememberMeError> {
        let validator = Self::new_validator();
        let hash = self.hash_validator(&validator)?;
        let expires_at = Utc::now() + self.ttl;

        if !self.store.update(selector, user, &hash, expires_at).await? {
            return Err(RememberMeError::NoSession);
        }

        debug!(user = %user, selector, "remember-me token rotated");
        Ok(RememberMeCookie {
            selector: selector.to_string(),
            validator,
        })
    }

    async fn authenticate(
        &self,
        cookie_value: &str,
    ) -> Result<(UserId, RememberMeCookie), RememberMeError> {
        let cookie = RememberMeCookie::decode(cookie_value).ok_or(RememberMeError::BadCookie)?;
        let record = self.lookup(&cookie).await?;
        let next = self.rotate(&cookie.selector, &record.user).await?;
        Ok((record.user, next))
    }

    async fn forget(&self, cookie_value: &str) -> Result<(), RememberMeError> {
        let cookie = RememberMeCookie::decode(cookie_value).ok_or(RememberMeError::BadCookie)?;
        // Only the owner of the validator may log the selector out.
        let record = self.lookup(&cookie).await?;
        self.store.delete_selector(&cookie.selector).await?;
        info!(user = %record.user, "remember-me token forgotten");
        Ok(())
    }

    async fn forget_user(&self, user: &UserId) -> Result<u64, RememberMeError> {
        let removed = self.store.delete_user(user).await?;
        info!(user = %user, removed, "remember-me tokens of user forgotten");
        Ok(removed)
    }
}
