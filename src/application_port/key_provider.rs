use crate::domain_model::*;
use jsonwebtoken::{DecodingKey, EncodingKey};

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache doesn't have the requested data: {0}")]
    NotInCache(String),
    #[error("bad key stored in the cache: {0}")]
    BadKey(String),
    #[error("last refresh of {name} failed: {reason}")]
    RefreshFailed { name: String, reason: String },
    #[error("there's no OIDC client with id {0}")]
    NoSuchClient(ClientId),
}

impl CacheError {
    /// Everything except a negative client answer may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CacheError::NoSuchClient(_) | CacheError::BadKey(_))
    }
}

/// Keys and client metadata served from the local cache.
#[async_trait::async_trait]
pub trait KeyProvider: Send + Sync {
    /// Key that verifies challenge tokens. Never touches the network.
    fn verification_key(&self) -> Result<DecodingKey, CacheError>;

    /// Key that signs consent tokens. Never touches the network.
    fn consent_key(&self) -> Result<EncodingKey, CacheError>;

    /// Cache-or-fetch lookup of a client.
    async fn client(&self, client_id: &ClientId) -> Result<ClientInfo, CacheError>;
}
