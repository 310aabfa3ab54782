//! SQLite-backed [`IdempotencyRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::{decode_time, encode_time, RepositoryError};
use crate::idempotency::{IdempotencyRecord, IdempotencyRepository};

/// Durable dedupe store.
#[derive(Debug, Clone)]
pub struct SqliteIdempotencyRepository {
    pool: SqlitePool,
}

impl SqliteIdempotencyRepository {
    /// Wrap a pool whose schema has been initialised.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyRepository for SqliteIdempotencyRepository {
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT key, response, created_at, expires_at FROM idempotency_keys \
             WHERE key = ?1 AND expires_at > ?2",
        )
        .bind(key)
        .bind(encode_time(&now))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let response: String = row.try_get("response")?;
        let created_at: String = row.try_get("created_at")?;
        let expires_at: String = row.try_get("expires_at")?;
        Ok(Some(IdempotencyRecord {
            key: row.try_get("key")?,
            response: serde_json::from_str(&response)?,
            created_at: decode_time("created_at", &created_at)?,
            expires_at: decode_time("expires_at", &expires_at)?,
        }))
    }

    async fn set(&self, record: &IdempotencyRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT OR REPLACE INTO idempotency_keys (key, response, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&record.key)
        .bind(serde_json::to_string(&record.response)?)
        .bind(encode_time(&record.created_at))
        .bind(encode_time(&record.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= ?1")
            .bind(encode_time(&now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
