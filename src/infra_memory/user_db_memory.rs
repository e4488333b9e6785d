use crate::application_impl::{hash_password, verify_password};
use crate::application_port::*;
use dashmap::DashMap;

/// Username to Argon2 PHC hash, held in memory.
pub struct MemoryUserDb {
    users: DashMap<String, String>,
}

impl MemoryUserDb {
    pub fn new() -> Self {
        MemoryUserDb {
            users: DashMap::new(),
        }
    }

    /// Register a user with a plaintext password.
    pub fn add_user(&self, user: &str, password: &str) -> Result<(), AuthError> {
        let hash = hash_password(password)?;
        self.users.insert(user.to_string(), hash);
        Ok(())
    }

    /// Register a user with an already computed PHC hash.
    pub fn add_hashed(&self, user: &str, password_hash: &str) {
        self.users
            .insert(user.to_string(), password_hash.to_string());
    }

    pub fn remove_user(&self, user: &str) -> bool {
        self.users.remove(user).is_some()
    }
}

impl Default for MemoryUserDb {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PasswordChecker for MemoryUserDb {
    async fn check(&self, user: &str, secret: &str) -> Result<(), AuthError> {
        let hash = self
            .users
            .get(user)
            .map(|h| h.value().clone())
            .ok_or(AuthError::NoSuchUser)?;

        if verify_password(secret, &hash)? {
            Ok(())
        } else {
            Err(AuthError::AuthenticationFailure)
        }
    }
}
