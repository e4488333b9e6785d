use crate::application_port::RememberMeError;
use crate::domain_model::{RememberMeCookie, UserId};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication failure")]
    AuthenticationFailure,
    #[error("no such user")]
    NoSuchUser,
    #[error("bad request")]
    BadRequest,
    #[error("store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    /// Missing or wrong credentials, as opposed to a broken backend.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            AuthError::AuthenticationFailure | AuthError::NoSuchUser | AuthError::BadRequest
        )
    }
}

impl From<RememberMeError> for AuthError {
    fn from(err: RememberMeError) -> Self {
        match err {
            RememberMeError::BadCookie => AuthError::BadRequest,
            RememberMeError::NoSession
            | RememberMeError::SessionExpired
            | RememberMeError::AuthenticationFailure => AuthError::AuthenticationFailure,
            RememberMeError::Store(e) => AuthError::Store(e.to_string()),
            RememberMeError::InternalError(e) => AuthError::InternalError(e),
        }
    }
}

/// The parts of an inbound login request the providers look at.
/// Header names are stored lowercase.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    headers: HashMap<String, String>,
    form: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl AuthRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_form_value(mut self, name: &str, value: impl Into<String>) -> Self {
        self.form.insert(name.to_string(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: &str, value: impl Into<String>) -> Self {
        self.cookies.insert(name.to_string(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// Outcome of a successful login. A provider that consumed a remember-me
/// cookie hands back the cookie that replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub user: UserId,
    pub renewed_cookie: Option<RememberMeCookie>,
}

impl Authenticated {
    pub fn user(user: UserId) -> Self {
        Authenticated {
            user,
            renewed_cookie: None,
        }
    }
}

/// Checks a user's secret against whatever backend holds the passwords.
#[async_trait::async_trait]
pub trait PasswordChecker: Send + Sync {
    async fn check(&self, user: &str, secret: &str) -> Result<(), AuthError>;
}

/// One way of authenticating a login request.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, request: &AuthRequest) -> Result<Authenticated, AuthError>;
}
