use crate::domain_model::*;
use crate::domain_port::StoreError;
use std::time::Duration;

/// Session slot the pending challenge is kept under.
pub const CHALLENGE_SLOT: &str = "challenge";

/// Session-scoped persistence for pending challenges.
/// One live value per `(session, slot)`; saving again replaces it.
#[async_trait::async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn get(&self, session: &SessionId, slot: &str) -> Result<Option<Challenge>, StoreError>;

    async fn save(
        &self,
        session: &SessionId,
        slot: &str,
        challenge: &Challenge,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, session: &SessionId, slot: &str) -> Result<bool, StoreError>;
}
