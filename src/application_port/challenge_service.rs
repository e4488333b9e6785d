use crate::application_port::CacheError;
use crate::domain_model::*;
use crate::domain_port::StoreError;

/// Why a challenge token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("bad signing method: {0}")]
    BadSigningMethod(String),
    #[error("signature verification failed")]
    BadSignature,
    #[error("claim {0} is missing")]
    MissingClaim(&'static str),
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("bad request")]
    BadRequest,
    #[error("bad challenge token: {0}")]
    BadChallengeToken(#[from] TokenError),
    #[error("challenge expired")]
    ChallengeExpired,
    #[error("no challenge stored for this session")]
    NoChallenge,
    #[error("there's no OIDC client with id {0}")]
    NoSuchClient(ClientId),
    #[error(transparent)]
    Cache(CacheError),
    #[error("signing error: {0}")]
    Signing(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<CacheError> for ChallengeError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NoSuchClient(id) => ChallengeError::NoSuchClient(id),
            other => ChallengeError::Cache(other),
        }
    }
}

#[async_trait::async_trait]
pub trait ChallengeService: Send + Sync {
    /// Verify a raw challenge token and bind the authenticated user to it.
    async fn new_challenge(&self, raw_token: &str, user: UserId)
    -> Result<Challenge, ChallengeError>;

    /// Persist the challenge in the session slot, replacing any previous one.
    async fn save(&self, session: &SessionId, challenge: &Challenge) -> Result<(), ChallengeError>;

    /// Re-save a loaded challenge, e.g. after attaching the user.
    async fn update(&self, session: &SessionId, challenge: &Challenge)
    -> Result<(), ChallengeError>;

    async fn load(&self, session: &SessionId) -> Result<Challenge, ChallengeError>;

    /// Consume the challenge and return the redirect carrying the signed consent.
    async fn grant_access(
        &self,
        session: &SessionId,
        challenge: Challenge,
        granted_scopes: &[String],
    ) -> Result<String, ChallengeError>;

    /// Consume the challenge and return the redirect carrying the refusal.
    async fn refuse_access(
        &self,
        session: &SessionId,
        challenge: Challenge,
    ) -> Result<String, ChallengeError>;
}
