//! Command-level deduplication.
//!
//! Every adapter call is keyed by `command_id`. A successful result is
//! remembered for a fixed window; a replay inside that window is answered
//! from the store, marked `idempotent`, and never reaches the provider.
//! Failures are not remembered so the caller can retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::storage::RepositoryError;
use crate::types::ExecutionResult;

/// How long a successful result is replayable.
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A stored response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    /// Idempotency key (the command id).
    pub key: String,
    /// Serialized [`ExecutionResult`].
    pub response: Value,
    /// When the response was stored.
    pub created_at: DateTime<Utc>,
    /// After this instant the record is ignored.
    pub expires_at: DateTime<Utc>,
}

/// Dedupe storage.
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// Fetch a record that has not expired at `now`.
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError>;

    /// Store (or replace) a record.
    async fn set(&self, record: &IdempotencyRecord) -> Result<(), RepositoryError>;

    /// Remove a record. Returns whether one existed.
    async fn delete(&self, key: &str) -> Result<bool, RepositoryError>;

    /// Drop every record expired at `now`; returns how many were removed.
    async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// Process-local dedupe store.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything. Test helper.
    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, IdempotencyRecord>>, RepositoryError>
    {
        self.records
            .lock()
            .map_err(|e| RepositoryError::Lock(e.to_string()))
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryIdempotencyStore {
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError> {
        Ok(self
            .lock()?
            .get(key)
            .filter(|r| r.expires_at > now)
            .cloned())
    }

    async fn set(&self, record: &IdempotencyRecord) -> Result<(), RepositoryError> {
        self.lock()?.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RepositoryError> {
        Ok(self.lock()?.remove(key).is_some())
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, r| r.expires_at > now);
        let removed = before.saturating_sub(records.len());
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}

/// Replay-or-remember wrapper adapters put around their provider call.
#[derive(Clone)]
pub struct IdempotencyGuard {
    repo: Arc<dyn IdempotencyRepository>,
    ttl: chrono::Duration,
}

impl std::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl IdempotencyGuard {
    /// Guard over `repo` with a replay window of `ttl`.
    pub fn new(repo: Arc<dyn IdempotencyRepository>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self { repo, ttl }
    }

    /// Guard over a fresh in-memory store with the default window.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryIdempotencyStore::new()),
            DEFAULT_IDEMPOTENCY_TTL,
        )
    }

    /// The previously stored result for `command_id`, flagged `idempotent`.
    ///
    /// # Errors
    ///
    /// Returns a repository failure, or a serialization error if the stored
    /// response no longer decodes.
    pub async fn replay(&self, command_id: &str) -> Result<Option<ExecutionResult>, RepositoryError> {
        let Some(record) = self.repo.get(command_id, Utc::now()).await? else {
            return Ok(None);
        };
        let mut result: ExecutionResult = serde_json::from_value(record.response)?;
        result
            .metadata
            .insert("idempotent".to_owned(), Value::Bool(true));
        debug!(command_id, "replaying stored result");
        Ok(Some(result))
    }

    /// Store a successful result. Failed results are ignored.
    ///
    /// # Errors
    ///
    /// Returns a repository or serialization failure.
    pub async fn remember(&self, result: &ExecutionResult) -> Result<(), RepositoryError> {
        if !result.success {
            return Ok(());
        }
        let now = Utc::now();
        let record = IdempotencyRecord {
            key: result.command_id.clone(),
            response: serde_json::to_value(result)?,
            created_at: now,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.repo.set(&record).await
    }

    /// Drop expired records from the underlying store.
    ///
    /// # Errors
    ///
    /// Returns a repository failure.
    pub async fn cleanup(&self) -> Result<u64, RepositoryError> {
        self.repo.cleanup(Utc::now()).await
    }
}
