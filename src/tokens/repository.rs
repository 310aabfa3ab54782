//! Token persistence seam.
//!
//! The service never touches storage directly. [`InMemoryTokenRepository`]
//! backs tests and single-process deployments; the SQLite implementation
//! lives in [`crate::storage::tokens`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ExecutionToken;
use crate::storage::RepositoryError;

/// Storage operations the token service needs.
///
/// `update` must never overwrite an existing `used_at` or `revoked_at`:
/// the first writer wins and the stored record is returned. Metadata is only
/// written by the call that records the revocation, so a concurrent use
/// cannot erase a revocation entry.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Insert a new token.
    async fn create(&self, token: &ExecutionToken) -> Result<(), RepositoryError>;

    /// Look a token up by id.
    async fn find_by_id(&self, token_id: &str) -> Result<Option<ExecutionToken>, RepositoryError>;

    /// Every token issued under a correlation id, oldest first.
    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<ExecutionToken>, RepositoryError>;

    /// Persist lifecycle changes and return the stored record.
    async fn update(&self, token: &ExecutionToken) -> Result<ExecutionToken, RepositoryError>;

    /// Delete a token only if it expired before `now` and was never used or
    /// revoked. Returns whether a record was removed.
    async fn delete_if_untouched(
        &self,
        token_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Tokens whose `expires_at` is before `now`.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionToken>, RepositoryError>;
}

/// Process-local token store.
#[derive(Debug, Default)]
pub struct InMemoryTokenRepository {
    tokens: Mutex<HashMap<String, ExecutionToken>>,
}

impl InMemoryTokenRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, ExecutionToken>>, RepositoryError> {
        self.tokens
            .lock()
            .map_err(|e| RepositoryError::Lock(e.to_string()))
    }
}

#[async_trait]
impl TokenRepository for InMemoryTokenRepository {
    async fn create(&self, token: &ExecutionToken) -> Result<(), RepositoryError> {
        let mut tokens = self.lock()?;
        if tokens.contains_key(&token.token_id) {
            return Err(RepositoryError::Duplicate(token.token_id.clone()));
        }
        tokens.insert(token.token_id.clone(), token.clone());
        Ok(())
    }

    async fn find_by_id(&self, token_id: &str) -> Result<Option<ExecutionToken>, RepositoryError> {
        Ok(self.lock()?.get(token_id).cloned())
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<ExecutionToken>, RepositoryError> {
        let mut found: Vec<ExecutionToken> = self
            .lock()?
            .values()
            .filter(|t| t.correlation_id == correlation_id)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.created_at);
        Ok(found)
    }

    async fn update(&self, token: &ExecutionToken) -> Result<ExecutionToken, RepositoryError> {
        let mut tokens = self.lock()?;
        let stored = tokens
            .get_mut(&token.token_id)
            .ok_or_else(|| RepositoryError::NotFound(token.token_id.clone()))?;

        if stored.used_at.is_none() && token.used_at.is_some() {
            stored.used_at = token.used_at;
            stored.used_by = token.used_by.clone();
        }
        if stored.revoked_at.is_none() && token.revoked_at.is_some() {
            stored.revoked_at = token.revoked_at;
            stored.revoked_by = token.revoked_by.clone();
            stored.metadata = token.metadata.clone();
        }
        Ok(stored.clone())
    }

    async fn delete_if_untouched(
        &self,
        token_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tokens = self.lock()?;
        let untouched = tokens
            .get(token_id)
            .is_some_and(|t| t.expires_at < now && t.used_at.is_none() && t.revoked_at.is_none());
        Ok(untouched && tokens.remove(token_id).is_some())
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionToken>, RepositoryError> {
        Ok(self
            .lock()?
            .values()
            .filter(|t| t.expires_at < now)
            .cloned()
            .collect())
    }
}
