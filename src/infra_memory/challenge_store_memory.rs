use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Process-local challenge store. Values vanish on restart.
pub struct MemoryChallengeStore {
    slots: DashMap<(SessionId, String), (Challenge, Instant)>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        MemoryChallengeStore {
            slots: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn key(session: &SessionId, slot: &str) -> (SessionId, String) {
        (session.clone(), slot.to_string())
    }
}

impl Default for MemoryChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn get(&self, session: &SessionId, slot: &str) -> Result<Option<Challenge>, StoreError> {
        let key = Self::key(session, slot);
        let now = Instant::now();
        let found = self
            .slots
            .get(&key)
            .map(|v| (v.value().0.clone(), v.value().1));
        match found {
            Some((challenge, expires_at)) if now < expires_at => Ok(Some(challenge)),
            Some(_) => {
                self.slots.remove_if(&key, |_, (_, exp)| *exp <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        session: &SessionId,
        slot: &str,
        challenge: &Challenge,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.slots.insert(
            Self::key(session, slot),
            (challenge.clone(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn delete(&self, session: &SessionId, slot: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .slots
            .remove(&Self::key(session, slot))
            .is_some_and(|(_, (_, expires_at))| now < expires_at))
    }
}
