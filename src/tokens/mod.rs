//! Execution tokens: short-lived, single-use, narrowly scoped capabilities.
//!
//! A token authorizes exactly one side effect on one channel for one
//! command type. Lifecycle:
//!
//! ```text
//! ISSUED ──mark_token_used──▶ USED      (terminal, repeat is a no-op)
//!   │
//!   ├────revoke_token──────▶ REVOKED   (terminal, repeat is a no-op)
//!   │
//!   └────now > expires_at──▶ EXPIRED   (implicit)
//! ```
//!
//! Used and revoked tokens are kept for audit; only untouched expired
//! tokens are removed by [`ExecutionTokenService::cleanup_expired_tokens`].

pub mod repository;

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::RepositoryError;
use crate::types::{ActionType, ActorType, Channel, ExecutionMode};

pub use self::repository::{InMemoryTokenRepository, TokenRepository};

/// Raw entropy per token id (256 bits).
const TOKEN_ID_BYTES: usize = 32;

/// Default lifetime of an issued token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

/// Command types that produce an externally visible side effect and
/// therefore always require a token.
pub const TOKEN_REQUIRED_ACTIONS: &[ActionType] = &[
    ActionType::SendMessage,
    ActionType::SendEmail,
    ActionType::MakeCall,
    ActionType::BookMeeting,
    ActionType::CancelMeeting,
    ActionType::UpdateCrmRecord,
];

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A persisted execution token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionToken {
    /// 256-bit random identifier, URL-safe base64 without padding.
    pub token_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Opportunity (lead) the side effect concerns.
    pub opportunity_id: String,
    /// Actor the token was issued to.
    pub actor_type: ActorType,
    /// Mode the plan was approved for.
    pub mode: ExecutionMode,
    /// The only channel the token may be used on.
    pub channel_scope: Channel,
    /// The only command type the token may be used for.
    pub command_type: ActionType,
    /// Correlation id of the plan that requested the token.
    pub correlation_id: String,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Expiry time; the token is unusable once `now > expires_at`.
    pub expires_at: DateTime<Utc>,
    /// When the token was consumed. Set at most once.
    pub used_at: Option<DateTime<Utc>>,
    /// Who consumed the token.
    pub used_by: Option<String>,
    /// When the token was revoked. Set at most once.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Who revoked the token.
    pub revoked_by: Option<String>,
    /// Issuer and revocation annotations.
    pub metadata: Value,
}

impl ExecutionToken {
    /// Whether the token's lifetime has elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the token has been consumed.
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    /// Whether the token has been revoked.
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Lifecycle status at `now`. Terminal states win over expiry.
    pub fn status_at(&self, now: DateTime<Utc>) -> TokenStatus {
        if self.is_used() {
            TokenStatus::Used
        } else if self.is_revoked() {
            TokenStatus::Revoked
        } else if self.is_expired_at(now) {
            TokenStatus::Expired
        } else {
            TokenStatus::Issued
        }
    }
}

/// Lifecycle status of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    /// Usable until it expires.
    Issued,
    /// Consumed.
    Used,
    /// Withdrawn.
    Revoked,
    /// Lifetime elapsed without use.
    Expired,
}

/// Token requirement declared by an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequirement {
    /// Channel the token will be scoped to.
    pub channel_scope: Channel,
    /// Lifetime override; the service default applies when absent.
    #[serde(default)]
    pub ttl: Option<Duration>,
}

/// Upstream plan a token is issued against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    /// Whether upstream policy approved the plan.
    pub allowed: bool,
    /// Owning tenant.
    pub tenant_id: String,
    /// Opportunity (lead) the plan concerns.
    pub opportunity_id: String,
    /// Actor that will carry out the plan.
    pub actor_type: ActorType,
    /// Side effect the plan performs.
    pub action_type: ActionType,
    /// Mode the plan was approved for.
    pub mode: ExecutionMode,
    /// Correlation id threading the plan through the audit trail.
    pub correlation_id: String,
    /// Token requirement; plans without one cannot be issued a token.
    #[serde(default)]
    pub token_requirement: Option<TokenRequirement>,
}

/// Scope a caller requires a token to satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenScope {
    /// Required channel, if constrained.
    pub channel: Option<Channel>,
    /// Required command type, if constrained.
    pub command_type: Option<ActionType>,
    /// Required owning tenant, if constrained.
    pub tenant_id: Option<String>,
}

impl TokenScope {
    /// Scope constrained to one channel.
    pub fn channel(channel: Channel) -> Self {
        Self {
            channel: Some(channel),
            ..Self::default()
        }
    }

    /// Scope matching exactly what `action` needs.
    pub fn for_action(action: ActionType) -> Self {
        Self {
            channel: Some(action.channel()),
            command_type: Some(action),
            tenant_id: None,
        }
    }

    /// Add a command-type constraint.
    pub fn with_command_type(mut self, command_type: ActionType) -> Self {
        self.command_type = Some(command_type);
        self
    }

    /// Add a tenant constraint.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a token cannot be used right now.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenDenial {
    /// No token with this id exists.
    #[error("token not found")]
    NotFound,
    /// The token's lifetime has elapsed.
    #[error("token expired at {expired_at}")]
    Expired {
        /// When it expired.
        expired_at: DateTime<Utc>,
    },
    /// The token was already consumed.
    #[error("token already used at {used_at}")]
    AlreadyUsed {
        /// When it was consumed.
        used_at: DateTime<Utc>,
    },
    /// The token was revoked.
    #[error("token revoked at {revoked_at}")]
    Revoked {
        /// When it was revoked.
        revoked_at: DateTime<Utc>,
    },
    /// The token is scoped to another channel.
    #[error("channel scope mismatch: token is scoped to {token}, {required} required")]
    ChannelScopeMismatch {
        /// Channel on the token.
        token: Channel,
        /// Channel the caller needs.
        required: Channel,
    },
    /// The token is scoped to another command type.
    #[error("command type scope mismatch: token is scoped to {token}, {required} required")]
    CommandTypeMismatch {
        /// Command type on the token.
        token: ActionType,
        /// Command type the caller needs.
        required: ActionType,
    },
    /// The token belongs to another tenant.
    #[error("tenant scope mismatch: token belongs to another tenant")]
    TenantMismatch,
}

/// Errors from token service operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The plan was not approved upstream.
    #[error("execution plan is not allowed")]
    PlanNotAllowed,
    /// The plan declares no token requirement.
    #[error("execution plan declares no token requirement")]
    NoTokenRequirement,
    /// The plan's TTL override cannot be represented.
    #[error("invalid token lifetime: {0:?}")]
    InvalidTtl(Duration),
    /// The token exists but cannot be used.
    #[error(transparent)]
    Denied(#[from] TokenDenial),
    /// The repository failed.
    #[error("token repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Outcome of [`ExecutionTokenService::verify_token`].
///
/// `valid` and `can_use` are deliberately separate: a revoked or used
/// token is still a valid record (useful for audit messaging) but cannot
/// authorize anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenVerification {
    /// A token record with this id exists.
    pub valid: bool,
    /// The token may authorize the requested scope right now.
    pub can_use: bool,
    /// Lifecycle status, when the record exists.
    pub status: Option<TokenStatus>,
    /// Why the token cannot be used, when `can_use` is false.
    pub denial: Option<TokenDenial>,
}

impl TokenVerification {
    fn usable() -> Self {
        Self {
            valid: true,
            can_use: true,
            status: Some(TokenStatus::Issued),
            denial: None,
        }
    }

    fn denied(status: Option<TokenStatus>, denial: TokenDenial) -> Self {
        Self {
            valid: status.is_some(),
            can_use: false,
            status,
            denial: Some(denial),
        }
    }

    /// Human-readable denial reason, if any.
    pub fn reason(&self) -> Option<String> {
        self.denial.as_ref().map(ToString::to_string)
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Issues, verifies, consumes, and revokes execution tokens.
pub struct ExecutionTokenService {
    repo: Arc<dyn TokenRepository>,
    default_ttl: Duration,
}

impl std::fmt::Debug for ExecutionTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTokenService")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl ExecutionTokenService {
    /// Create a service with the default 10 minute lifetime.
    pub fn new(repo: Arc<dyn TokenRepository>) -> Self {
        Self::with_default_ttl(repo, DEFAULT_TOKEN_TTL)
    }

    /// Create a service with a custom default lifetime.
    pub fn with_default_ttl(repo: Arc<dyn TokenRepository>, default_ttl: Duration) -> Self {
        Self { repo, default_ttl }
    }

    /// Whether the plan's action type is one that always requires a token.
    pub fn execution_requires_token(plan: &ExecutionPlan) -> bool {
        action_requires_token(plan.action_type)
    }

    /// Issue a token for an approved plan.
    ///
    /// The returned record carries the only copy of the raw token id the
    /// caller will ever receive from this service.
    ///
    /// # Errors
    ///
    /// [`TokenError::PlanNotAllowed`] or [`TokenError::NoTokenRequirement`]
    /// for plans that may not receive a token; repository failures otherwise.
    pub async fn issue_token(
        &self,
        plan: &ExecutionPlan,
        issued_by: &str,
    ) -> Result<ExecutionToken, TokenError> {
        if !plan.allowed {
            return Err(TokenError::PlanNotAllowed);
        }
        let requirement = plan
            .token_requirement
            .as_ref()
            .ok_or(TokenError::NoTokenRequirement)?;

        let ttl = requirement.ttl.unwrap_or(self.default_ttl);
        let lifetime = chrono::Duration::from_std(ttl).map_err(|_| TokenError::InvalidTtl(ttl))?;
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(lifetime)
            .ok_or(TokenError::InvalidTtl(ttl))?;

        let token = ExecutionToken {
            token_id: generate_token_id(),
            tenant_id: plan.tenant_id.clone(),
            opportunity_id: plan.opportunity_id.clone(),
            actor_type: plan.actor_type,
            mode: plan.mode,
            channel_scope: requirement.channel_scope,
            command_type: plan.action_type,
            correlation_id: plan.correlation_id.clone(),
            created_at: now,
            expires_at,
            used_at: None,
            used_by: None,
            revoked_at: None,
            revoked_by: None,
            metadata: json!({ "issuedBy": issued_by }),
        };

        self.repo.create(&token).await?;

        info!(
            token = token_prefix(&token.token_id),
            tenant_id = %token.tenant_id,
            channel = %token.channel_scope,
            command_type = %token.command_type,
            correlation_id = %token.correlation_id,
            expires_at = %token.expires_at,
            "execution token issued"
        );
        Ok(token)
    }

    /// Check whether a token may authorize `required` right now.
    ///
    /// Checks run in order: not found, expired, already used, revoked,
    /// channel mismatch, command type mismatch, tenant mismatch.
    ///
    /// # Errors
    ///
    /// Only repository failures; every denial is reported in the result.
    pub async fn verify_token(
        &self,
        token_id: &str,
        required: &TokenScope,
    ) -> Result<TokenVerification, TokenError> {
        let Some(token) = self.repo.find_by_id(token_id).await? else {
            debug!(token = token_prefix(token_id), "token not found");
            return Ok(TokenVerification::denied(None, TokenDenial::NotFound));
        };

        let now = Utc::now();
        let status = Some(token.status_at(now));

        if token.is_expired_at(now) {
            return Ok(TokenVerification::denied(
                status,
                TokenDenial::Expired {
                    expired_at: token.expires_at,
                },
            ));
        }
        if let Some(used_at) = token.used_at {
            return Ok(TokenVerification::denied(
                status,
                TokenDenial::AlreadyUsed { used_at },
            ));
        }
        if let Some(revoked_at) = token.revoked_at {
            return Ok(TokenVerification::denied(
                status,
                TokenDenial::Revoked { revoked_at },
            ));
        }
        if let Some(denial) = scope_denial(&token, required) {
            return Ok(TokenVerification::denied(status, denial));
        }

        Ok(TokenVerification::usable())
    }

    /// Whether the token was consumed by `command_id` under `required`.
    ///
    /// A retried command presents the token it already spent; this lets the
    /// caller answer the retry from the idempotency store instead of
    /// rejecting it. Expiry and revocation after the first use do not matter.
    ///
    /// # Errors
    ///
    /// Returns a repository failure.
    pub async fn consumed_by(
        &self,
        token_id: &str,
        command_id: &str,
        required: &TokenScope,
    ) -> Result<bool, TokenError> {
        let Some(token) = self.repo.find_by_id(token_id).await? else {
            return Ok(false);
        };
        Ok(token.used_by.as_deref() == Some(command_id)
            && scope_denial(&token, required).is_none())
    }

    /// Consume a token.
    ///
    /// Replays are safe: a token that is already used returns success
    /// without changing the record.
    ///
    /// # Errors
    ///
    /// [`TokenDenial::NotFound`], [`TokenDenial::Revoked`], or
    /// [`TokenDenial::Expired`] wrapped in [`TokenError::Denied`].
    pub async fn mark_token_used(
        &self,
        token_id: &str,
        used_by: &str,
    ) -> Result<ExecutionToken, TokenError> {
        let mut token = self
            .repo
            .find_by_id(token_id)
            .await?
            .ok_or(TokenDenial::NotFound)?;

        if token.is_used() {
            debug!(token = token_prefix(token_id), "token already used; no-op");
            return Ok(token);
        }
        if let Some(revoked_at) = token.revoked_at {
            warn!(token = token_prefix(token_id), used_by, "attempt to use revoked token");
            return Err(TokenDenial::Revoked { revoked_at }.into());
        }
        let now = Utc::now();
        if token.is_expired_at(now) {
            warn!(token = token_prefix(token_id), used_by, "attempt to use expired token");
            return Err(TokenDenial::Expired {
                expired_at: token.expires_at,
            }
            .into());
        }

        token.used_at = Some(now);
        token.used_by = Some(used_by.to_owned());
        let stored = self.repo.update(&token).await?;

        if stored.used_by.as_deref() != Some(used_by) {
            // Lost a race; the first writer's record stands.
            debug!(token = token_prefix(token_id), "token consumed concurrently");
        }
        info!(token = token_prefix(token_id), used_by, "execution token used");
        Ok(stored)
    }

    /// Revoke a token, appending `reason` to its metadata.
    ///
    /// Revoking an already revoked token returns success without changes.
    ///
    /// # Errors
    ///
    /// [`TokenDenial::NotFound`] wrapped in [`TokenError::Denied`], or a
    /// repository failure.
    pub async fn revoke_token(
        &self,
        token_id: &str,
        revoked_by: &str,
        reason: &str,
    ) -> Result<ExecutionToken, TokenError> {
        let mut token = self
            .repo
            .find_by_id(token_id)
            .await?
            .ok_or(TokenDenial::NotFound)?;

        if token.is_revoked() {
            debug!(token = token_prefix(token_id), "token already revoked; no-op");
            return Ok(token);
        }

        let now = Utc::now();
        token.revoked_at = Some(now);
        token.revoked_by = Some(revoked_by.to_owned());
        append_revocation(&mut token.metadata, revoked_by, reason, now);

        let stored = self.repo.update(&token).await?;
        if stored.revoked_at.map(|t| t.timestamp_micros()) != Some(now.timestamp_micros()) {
            // Another revoke landed first; its reason stands.
            debug!(token = token_prefix(token_id), "token revoked concurrently");
            return Ok(stored);
        }
        info!(token = token_prefix(token_id), revoked_by, reason, "execution token revoked");
        Ok(stored)
    }

    /// Delete tokens that expired without ever being used or revoked.
    ///
    /// Used and revoked tokens are retained for audit regardless of age.
    ///
    /// # Errors
    ///
    /// Returns a repository failure; tokens deleted before the failure stay deleted.
    pub async fn cleanup_expired_tokens(&self) -> Result<u64, TokenError> {
        let now = Utc::now();
        let expired = self.repo.find_expired(now).await?;
        let mut removed: u64 = 0;
        for token in expired
            .iter()
            .filter(|t| t.is_expired_at(now) && !t.is_used() && !t.is_revoked())
        {
            // A use or revoke that lands after the scan keeps the token.
            if self.repo.delete_if_untouched(&token.token_id, now).await? {
                removed = removed.saturating_add(1);
            }
        }
        if removed > 0 {
            info!(removed, "expired execution tokens cleaned up");
        }
        Ok(removed)
    }

    /// Every token issued under a correlation id, for audit lookups.
    ///
    /// # Errors
    ///
    /// Returns a repository failure.
    pub async fn tokens_for_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<ExecutionToken>, TokenError> {
        Ok(self.repo.find_by_correlation_id(correlation_id).await?)
    }
}

/// Whether `action` is in the fixed set of token-requiring command types.
pub fn action_requires_token(action: ActionType) -> bool {
    TOKEN_REQUIRED_ACTIONS.contains(&action)
}

/// The first scope constraint `token` fails: channel, command type, tenant.
fn scope_denial(token: &ExecutionToken, required: &TokenScope) -> Option<TokenDenial> {
    if let Some(channel) = required.channel {
        if channel != token.channel_scope {
            return Some(TokenDenial::ChannelScopeMismatch {
                token: token.channel_scope,
                required: channel,
            });
        }
    }
    if let Some(command_type) = required.command_type {
        if command_type != token.command_type {
            return Some(TokenDenial::CommandTypeMismatch {
                token: token.command_type,
                required: command_type,
            });
        }
    }
    match &required.tenant_id {
        Some(tenant_id) if *tenant_id != token.tenant_id => Some(TokenDenial::TenantMismatch),
        _ => None,
    }
}

/// Generate an unguessable, URL-safe token id.
fn generate_token_id() -> String {
    let mut bytes = [0u8; TOKEN_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Short prefix safe to write to logs.
pub(crate) fn token_prefix(token_id: &str) -> &str {
    token_id.get(..8).unwrap_or(token_id)
}

fn append_revocation(metadata: &mut Value, revoked_by: &str, reason: &str, at: DateTime<Utc>) {
    if !metadata.is_object() {
        let previous = std::mem::take(metadata);
        *metadata = if previous.is_null() {
            json!({})
        } else {
            json!({ "previous": previous })
        };
    }
    let entry = json!({
        "reason": reason,
        "revokedBy": revoked_by,
        "revokedAt": at.to_rfc3339(),
    });
    if let Some(obj) = metadata.as_object_mut() {
        match obj.get_mut("revocations").and_then(Value::as_array_mut) {
            Some(list) => list.push(entry),
            None => {
                obj.insert("revocations".to_owned(), Value::Array(vec![entry]));
            }
        }
    }
}
