use crate::application_port::*;
use crate::domain_model::UserId;
use crate::logger::*;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;

pub const USERNAME_FIELD: &str = "username";
pub const PASSWORD_FIELD: &str = "password";

/// `Authorization: Basic base64(user:password)`.
pub struct BasicAuthProvider {
    checker: Arc<dyn PasswordChecker>,
}

impl BasicAuthProvider {
    pub fn new(checker: Arc<dyn PasswordChecker>) -> Self {
        Self { checker }
    }

    fn credentials(header: &str) -> Result<(String, String), AuthError> {
        let (scheme, encoded) = header
            .trim()
            .split_once(' ')
            .ok_or(AuthError::BadRequest)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(AuthError::BadRequest);
        }
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::BadRequest)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::BadRequest)?;
        let (user, password) = decoded.split_once(':').ok_or(AuthError::BadRequest)?;
        Ok((user.to_string(), password.to_string()))
    }
}

#[async_trait::async_trait]
impl AuthProvider for BasicAuthProvider {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn check(&self, request: &AuthRequest) -> Result<Authenticated, AuthError> {
        let header = request
            .header("authorization")
            .ok_or(AuthError::BadRequest)?;
        let (user, password) = Self::credentials(header)?;
        self.checker.check(&user, &password).await?;
        Ok(Authenticated::user(UserId(user)))
    }
}

/// Login form with `username` and `password` fields.
pub struct FormAuthProvider {
    checker: Arc<dyn PasswordChecker>,
}

impl FormAuthProvider {
    pub fn new(checker: Arc<dyn PasswordChecker>) -> Self {
        Self { checker }
    }
}

#[async_trait::async_trait]
impl AuthProvider for FormAuthProvider {
    fn name(&self) -> &'static str {
        "form"
    }

    async fn check(&self, request: &AuthRequest) -> Result<Authenticated, AuthError> {
        let user = request
            .form_value(USERNAME_FIELD)
            .filter(|u| !u.is_empty())
            .ok_or(AuthError::BadRequest)?;
        let password = request
            .form_value(PASSWORD_FIELD)
            .ok_or(AuthError::BadRequest)?;
        self.checker.check(user, password).await?;
        Ok(Authenticated::user(UserId::from(user)))
    }
}

/// Remember-me cookie. Every successful login rotates the token, the new
/// cookie comes back in [`Authenticated::renewed_cookie`].
///
/// Never fails hard: a broken credential store must not keep users from
/// logging in with their password.
pub struct CookieAuthProvider {
    remember_me: Arc<dyn RememberMeService>,
    cookie_name: String,
}

impl CookieAuthProvider {
    pub fn new(remember_me: Arc<dyn RememberMeService>, cookie_name: impl Into<String>) -> Self {
        Self {
            remember_me,
            cookie_name: cookie_name.into(),
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for CookieAuthProvider {
    fn name(&self) -> &'static str {
        "cookie"
    }

    async fn check(&self, request: &AuthRequest) -> Result<Authenticated, AuthError> {
        let value = request
            .cookie(&self.cookie_name)
            .ok_or(AuthError::BadRequest)?;

        match self.remember_me.authenticate(value).await {
            Ok((user, renewed)) => Ok(Authenticated {
                user,
                renewed_cookie: Some(renewed),
            }),
            Err(e) if e.is_soft() => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "remember-me backend failure, falling back");
                Err(AuthError::AuthenticationFailure)
            }
        }
    }
}

/// Tries each provider in turn. A soft failure moves on to the next one,
/// anything else ends the chain.
pub struct ProviderChain {
    providers: Vec<Arc<dyn AuthProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn AuthProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait::async_trait]
impl AuthProvider for ProviderChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn check(&self, request: &AuthRequest) -> Result<Authenticated, AuthError> {
        let mut last = AuthError::BadRequest;
        for provider in &self.providers {
            match provider.check(request).await {
                Ok(outcome) => {
                    debug!(provider = provider.name(), user = %outcome.user, "authenticated");
                    return Ok(outcome);
                }
                Err(e) if e.is_soft() => {
                    trace!(provider = provider.name(), error = %e, "falling back");
                    // Keep the most telling soft error; a missing credential
                    // should not hide a rejected one.
                    if !matches!(e, AuthError::BadRequest) || matches!(last, AuthError::BadRequest) {
                        last = e;
                    }
                }
                Err(e) => {
                    error!(provider = provider.name(), error = %e, "auth backend failure");
                    return Err(e);
                }
            }
        }
        Err(last)
    }
}
