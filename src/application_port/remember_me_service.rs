use crate::domain_model::*;
use crate::domain_port::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RememberMeError {
    #[error("bad format of the remember-me cookie")]
    BadCookie,
    #[error("no remember-me session for this cookie")]
    NoSession,
    #[error("remember-me session expired")]
    SessionExpired,
    #[error("authentication failure")]
    AuthenticationFailure,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl RememberMeError {
    /// Soft failures mean "not remembered", the caller should ask for credentials.
    pub fn is_soft(&self) -> bool {
        !matches!(
            self,
            RememberMeError::Store(_) | RememberMeError::InternalError(_)
        )
    }
}

#[async_trait::async_trait]
pub trait RememberMeService: Send + Sync {
    async fn issue(&self, user: &UserId) -> Result<RememberMeCookie, RememberMeError>;

    async fn verify(&self, cookie_value: &str) -> Result<UserId, RememberMeError>;

    async fn rotate(&self, selector: &str, user: &UserId)
    -> Result<RememberMeCookie, RememberMeError>;

    /// Verify and rotate in one go; the returned cookie replaces the presented one.
    async fn authenticate(
        &self,
        cookie_value: &str,
    ) -> Result<(UserId, RememberMeCookie), RememberMeError>;

    /// Logout: drop the token behind this cookie.
    async fn forget(&self, cookie_value: &str) -> Result<(), RememberMeError>;

    /// Drop every token of a user, e.g. after a password change.
    async fn forget_user(&self, user: &UserId) -> Result<u64, RememberMeError>;
}
