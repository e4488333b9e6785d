use crate::domain_model::*;
use crate::domain_port::*;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Pending challenges as JSON strings under `prefix:session:slot`, with the
/// Redis TTL doing the expiry.
pub struct RedisChallengeStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisChallengeStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        RedisChallengeStore {
            conn,
            prefix: prefix.into(),
        }
    }

    fn key(&self, session: &SessionId, slot: &str) -> String {
        challenge_key(&self.prefix, session, slot)
    }
}

fn challenge_key(prefix: &str, session: &SessionId, slot: &str) -> String {
    format!("{}:{}:{}", prefix, session, slot)
}

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait::async_trait]
impl ChallengeStore for RedisChallengeStore {
    async fn get(&self, session: &SessionId, slot: &str) -> Result<Option<Challenge>, StoreError> {
        let key = self.key(session, slot);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await.map_err(backend)?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| StoreError::Corrupted(e.to_string()))
        })
        .transpose()
    }

    async fn save(
        &self,
        session: &SessionId,
        slot: &str,
        challenge: &Challenge,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = self.key(session, slot);
        let json =
            serde_json::to_string(challenge).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(&key, json, ttl.as_secs().max(1))
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete(&self, session: &SessionId, slot: &str) -> Result<bool, StoreError> {
        let key = self.key(session, slot);
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(&key).await.map_err(backend)?;
        Ok(removed > 0)
    }
}
