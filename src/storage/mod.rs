//! SQLite persistence for execution tokens and idempotency records.
//!
//! The token service and adapters only see the repository traits; this
//! module provides the durable implementations plus the shared error type
//! the in-memory implementations also return.

pub mod idempotency;
pub mod tokens;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

pub use self::idempotency::SqliteIdempotencyRepository;
pub use self::tokens::SqliteTokenRepository;

/// Errors from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored JSON column could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored column held a value outside its closed set.
    #[error("invalid {field} value: {value:?}")]
    InvalidValue {
        /// Which column contained the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },

    /// A record with the same key already exists.
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// The record to update does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// An in-memory store's lock was poisoned.
    #[error("store lock poisoned: {0}")]
    Lock(String),
}

/// Maximum pooled connections for the file-backed database.
const MAX_CONNECTIONS: u32 = 5;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS execution_tokens (
        token_id        TEXT PRIMARY KEY,
        tenant_id       TEXT NOT NULL,
        opportunity_id  TEXT NOT NULL,
        actor_type      TEXT NOT NULL,
        mode            TEXT NOT NULL,
        channel_scope   TEXT NOT NULL,
        command_type    TEXT NOT NULL,
        correlation_id  TEXT NOT NULL,
        created_at      TEXT NOT NULL,
        expires_at      TEXT NOT NULL,
        used_at         TEXT,
        used_by         TEXT,
        revoked_at      TEXT,
        revoked_by      TEXT,
        metadata        TEXT NOT NULL DEFAULT '{}'
    )",
    "CREATE INDEX IF NOT EXISTS idx_execution_tokens_correlation
        ON execution_tokens(correlation_id)",
    "CREATE INDEX IF NOT EXISTS idx_execution_tokens_expires
        ON execution_tokens(expires_at)",
    "CREATE TABLE IF NOT EXISTS idempotency_keys (
        key         TEXT PRIMARY KEY,
        response    TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        expires_at  TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_idempotency_keys_expires
        ON idempotency_keys(expires_at)",
];

/// Open (creating if needed) the SQLite database at `path` and apply the schema.
///
/// # Errors
///
/// Returns [`RepositoryError::Database`] if the file cannot be opened or the
/// schema cannot be applied.
pub async fn open_pool(path: &Path) -> Result<SqlitePool, RepositoryError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;
    init_schema(&pool).await?;
    info!(path = %path.display(), "execution store opened");
    Ok(pool)
}

/// Apply the schema. Safe to run repeatedly.
///
/// # Errors
///
/// Returns [`RepositoryError::Database`] on SQLite failure.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), RepositoryError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Fixed-width RFC 3339 rendering so stored timestamps compare correctly as text.
pub(crate) fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub(crate) fn decode_time(field: &'static str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::InvalidValue {
            field,
            value: raw.to_owned(),
        })
}

/// Parse an optional stored timestamp.
pub(crate) fn decode_optional_time(
    field: &'static str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|s| decode_time(field, &s)).transpose()
}
