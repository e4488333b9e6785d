use crate::domain_model::*;
use jsonwebtoken::{DecodingKey, EncodingKey};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Public,
    Private,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Public => "public",
            KeyKind::Private => "private",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded key as served by the upstream key endpoint.
#[derive(Clone)]
pub enum KeyMaterial {
    Verifying(DecodingKey),
    Signing(EncodingKey),
}

impl KeyMaterial {
    pub fn kind(&self) -> KeyKind {
        match self {
            KeyMaterial::Verifying(_) => KeyKind::Public,
            KeyMaterial::Signing(_) => KeyKind::Private,
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({})", self.kind())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("not found upstream")]
    NotFound,
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream rejected our credentials")]
    Unauthorized,
    #[error("cannot convert to public key: {0}")]
    BadPublicKey(String),
    #[error("cannot convert to private key: {0}")]
    BadPrivateKey(String),
    #[error("bad upstream response: {0}")]
    BadResponse(String),
    #[error("upstream transport error: {0}")]
    Transport(String),
}

impl UpstreamError {
    /// Transient failures are worth retrying soon, the rest are answers.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout | UpstreamError::Transport(_) | UpstreamError::Unauthorized
        )
    }
}

/// The authorization server's key and client lookup endpoints.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn get_key(&self, key_set: &str, kind: KeyKind) -> Result<KeyMaterial, UpstreamError>;

    async fn get_client(&self, client_id: &ClientId) -> Result<ClientInfo, UpstreamError>;
}
