//! SQLite-backed [`TokenRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{decode_optional_time, decode_time, encode_time, RepositoryError};
use crate::tokens::{ExecutionToken, TokenRepository};

const SELECT_COLUMNS: &str = "SELECT token_id, tenant_id, opportunity_id, actor_type, mode, \
     channel_scope, command_type, correlation_id, created_at, expires_at, \
     used_at, used_by, revoked_at, revoked_by, metadata FROM execution_tokens";

/// Durable token store.
#[derive(Debug, Clone)]
pub struct SqliteTokenRepository {
    pool: SqlitePool,
}

impl SqliteTokenRepository {
    /// Wrap a pool whose schema has been initialised with
    /// [`super::init_schema`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_enum<T>(field: &'static str, raw: String) -> Result<T, RepositoryError>
where
    T: std::str::FromStr,
{
    raw.parse::<T>()
        .map_err(|_| RepositoryError::InvalidValue { field, value: raw })
}

fn row_to_token(row: &SqliteRow) -> Result<ExecutionToken, RepositoryError> {
    let created_at: String = row.try_get("created_at")?;
    let expires_at: String = row.try_get("expires_at")?;
    let metadata: String = row.try_get("metadata")?;

    Ok(ExecutionToken {
        token_id: row.try_get("token_id")?,
        tenant_id: row.try_get("tenant_id")?,
        opportunity_id: row.try_get("opportunity_id")?,
        actor_type: parse_enum("actor_type", row.try_get("actor_type")?)?,
        mode: parse_enum("mode", row.try_get("mode")?)?,
        channel_scope: parse_enum("channel_scope", row.try_get("channel_scope")?)?,
        command_type: parse_enum("command_type", row.try_get("command_type")?)?,
        correlation_id: row.try_get("correlation_id")?,
        created_at: decode_time("created_at", &created_at)?,
        expires_at: decode_time("expires_at", &expires_at)?,
        used_at: decode_optional_time("used_at", row.try_get("used_at")?)?,
        used_by: row.try_get("used_by")?,
        revoked_at: decode_optional_time("revoked_at", row.try_get("revoked_at")?)?,
        revoked_by: row.try_get("revoked_by")?,
        metadata: serde_json::from_str(&metadata)?,
    })
}

#[async_trait]
impl TokenRepository for SqliteTokenRepository {
    async fn create(&self, token: &ExecutionToken) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO execution_tokens (token_id, tenant_id, opportunity_id, actor_type, \
             mode, channel_scope, command_type, correlation_id, created_at, expires_at, \
             used_at, used_by, revoked_at, revoked_by, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(&token.token_id)
        .bind(&token.tenant_id)
        .bind(&token.opportunity_id)
        .bind(token.actor_type.as_str())
        .bind(token.mode.as_str())
        .bind(token.channel_scope.as_str())
        .bind(token.command_type.as_str())
        .bind(&token.correlation_id)
        .bind(encode_time(&token.created_at))
        .bind(encode_time(&token.expires_at))
        .bind(token.used_at.as_ref().map(encode_time))
        .bind(&token.used_by)
        .bind(token.revoked_at.as_ref().map(encode_time))
        .bind(&token.revoked_by)
        .bind(serde_json::to_string(&token.metadata)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(RepositoryError::Duplicate(token.token_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, token_id: &str) -> Result<Option<ExecutionToken>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE token_id = ?1");
        let row = sqlx::query(&sql)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_token).transpose()
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<ExecutionToken>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE correlation_id = ?1 ORDER BY created_at ASC");
        let rows = sqlx::query(&sql)
            .bind(correlation_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_token).collect()
    }

    async fn update(&self, token: &ExecutionToken) -> Result<ExecutionToken, RepositoryError> {
        // COALESCE keeps the first recorded used_at / revoked_at. SET
        // expressions see the old row, so metadata follows the revocation.
        let result = sqlx::query(
            "UPDATE execution_tokens SET \
               used_by = CASE WHEN used_at IS NULL THEN ?2 ELSE used_by END, \
               used_at = COALESCE(used_at, ?1), \
               revoked_by = CASE WHEN revoked_at IS NULL THEN ?4 ELSE revoked_by END, \
               metadata = CASE WHEN revoked_at IS NULL AND ?3 IS NOT NULL \
                 THEN ?5 ELSE metadata END, \
               revoked_at = COALESCE(revoked_at, ?3) \
             WHERE token_id = ?6",
        )
        .bind(token.used_at.as_ref().map(encode_time))
        .bind(&token.used_by)
        .bind(token.revoked_at.as_ref().map(encode_time))
        .bind(&token.revoked_by)
        .bind(serde_json::to_string(&token.metadata)?)
        .bind(&token.token_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(token.token_id.clone()));
        }
        self.find_by_id(&token.token_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(token.token_id.clone()))
    }

    async fn delete_if_untouched(
        &self,
        token_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM execution_tokens WHERE token_id = ?1 AND expires_at < ?2 \
             AND used_at IS NULL AND revoked_at IS NULL",
        )
        .bind(token_id)
        .bind(encode_time(&now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionToken>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE expires_at < ?1");
        let rows = sqlx::query(&sql)
            .bind(encode_time(&now))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_token).collect()
    }
}
