use super::util::is_dup_key;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use nanoid::nanoid;
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cookieauth (
    selector   VARCHAR(32)  NOT NULL PRIMARY KEY,
    validator  VARCHAR(64)  NOT NULL,
    user       VARCHAR(255) NOT NULL,
    expiration DATETIME(6)  NOT NULL,
    INDEX idx_cookieauth_user (user)
)
"#;

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Remember-me tokens in the `cookieauth` table.
pub struct MySqlCredentialStore {
    pool: MySqlPool,
}

impl MySqlCredentialStore {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlCredentialStore { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    fn row_to_record(row: MySqlRow) -> Result<RememberMeRecord, StoreError> {
        let selector: String = row
            .try_get("selector")
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;
        let validator_hash: String = row
            .try_get("validator")
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;
        let user: String = row
            .try_get("user")
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;
        let expires_at: DateTime<Utc> = row
            .try_get("expiration")
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;

        Ok(RememberMeRecord {
            selector,
            user: UserId(user),
            validator_hash,
            expires_at,
        })
    }
}

#[async_trait::async_trait]
impl CredentialStore for MySqlCredentialStore {
    async fn get(&self, selector: &str) -> Result<Option<RememberMeRecord>, StoreError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT selector, validator, user, expiration
FROM cookieauth
WHERE selector = ?
"#,
        )
        .bind(selector)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row_opt.map(Self::row_to_record).transpose()
    }

    async fn insert(
        &self,
        selector: Option<&str>,
        user: &UserId,
        validator_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let selector = selector.map(str::to_string).unwrap_or_else(|| nanoid!(24));

        sqlx::query(
            r#"
INSERT INTO cookieauth (selector, validator, user, expiration)
VALUES (?, ?, ?, ?)
"#,
        )
        .bind(&selector)
        .bind(validator_hash)
        .bind(user)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_dup_key(&e) {
                StoreError::Backend(format!("selector {} already exists", selector))
            } else {
                backend(e)
            }
        })?;

        Ok(selector)
    }

    async fn update(
        &self,
        selector: &str,
        user: &UserId,
        validator_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
UPDATE cookieauth
SET validator = ?, expiration = ?
WHERE selector = ? AND user = ?
"#,
        )
        .bind(validator_hash)
        .bind(expires_at)
        .bind(selector)
        .bind(user)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_selector(&self, selector: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM cookieauth WHERE selector = ?")
            .bind(selector)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, user: &UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM cookieauth WHERE user = ?")
            .bind(user)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }
}
