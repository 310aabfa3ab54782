//! Token lifecycle through `ExecutionTokenService`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadgate::storage::RepositoryError;
use leadgate::tokens::{
    ExecutionToken, ExecutionTokenService, InMemoryTokenRepository, TokenDenial, TokenError,
    TokenRepository, TokenScope, TokenStatus,
};
use leadgate::types::{ActionType, Channel};

use crate::support::{plan, stale_token};

/// Applies a queued write from "another caller" at the worst moment:
/// right before the next `update`, or right after the expiry scan.
#[derive(Default)]
struct InterleavingRepo {
    inner: InMemoryTokenRepository,
    before_update: Mutex<Option<ExecutionToken>>,
    after_scan: Mutex<Option<ExecutionToken>>,
}

impl InterleavingRepo {
    fn queue(slot: &Mutex<Option<ExecutionToken>>, token: ExecutionToken) {
        if let Ok(mut pending) = slot.lock() {
            *pending = Some(token);
        }
    }

    fn take(slot: &Mutex<Option<ExecutionToken>>) -> Option<ExecutionToken> {
        slot.lock().ok().and_then(|mut pending| pending.take())
    }
}

#[async_trait]
impl TokenRepository for InterleavingRepo {
    async fn create(&self, token: &ExecutionToken) -> Result<(), RepositoryError> {
        self.inner.create(token).await
    }

    async fn find_by_id(&self, token_id: &str) -> Result<Option<ExecutionToken>, RepositoryError> {
        self.inner.find_by_id(token_id).await
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<ExecutionToken>, RepositoryError> {
        self.inner.find_by_correlation_id(correlation_id).await
    }

    async fn update(&self, token: &ExecutionToken) -> Result<ExecutionToken, RepositoryError> {
        if let Some(other) = Self::take(&self.before_update) {
            self.inner.update(&other).await?;
        }
        self.inner.update(token).await
    }

    async fn delete_if_untouched(
        &self,
        token_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.inner.delete_if_untouched(token_id, now).await
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionToken>, RepositoryError> {
        let expired = self.inner.find_expired(now).await?;
        if let Some(other) = Self::take(&self.after_scan) {
            self.inner.update(&other).await?;
        }
        Ok(expired)
    }
}

fn revoked_copy(token: &ExecutionToken, reason: &str) -> ExecutionToken {
    let mut revoked = token.clone();
    revoked.revoked_at = Some(Utc::now());
    revoked.revoked_by = Some("ops".to_owned());
    revoked.metadata["revocations"] = serde_json::json!([{"reason": reason, "revokedBy": "ops"}]);
    revoked
}

fn service() -> (Arc<InMemoryTokenRepository>, ExecutionTokenService) {
    let repo = Arc::new(InMemoryTokenRepository::new());
    let service = ExecutionTokenService::new(Arc::clone(&repo) as Arc<dyn TokenRepository>);
    (repo, service)
}

#[tokio::test]
async fn issue_verify_use_exactly_once() {
    let (_, service) = service();
    let token = service
        .issue_token(&plan(ActionType::SendMessage), "planner")
        .await
        .expect("issue should succeed");
    assert_eq!(token.channel_scope, Channel::Sms);
    assert_eq!(token.command_type, ActionType::SendMessage);
    assert_eq!(token.metadata["issuedBy"], "planner");

    let scope = TokenScope::for_action(ActionType::SendMessage);
    let verification = service
        .verify_token(&token.token_id, &scope)
        .await
        .expect("verify should succeed");
    assert!(verification.valid);
    assert!(verification.can_use);
    assert_eq!(verification.status, Some(TokenStatus::Issued));

    let used = service
        .mark_token_used(&token.token_id, "cmd-1")
        .await
        .expect("first use should succeed");
    assert_eq!(used.used_by.as_deref(), Some("cmd-1"));
    let used_at = used.used_at.expect("used_at recorded");

    let again = service
        .verify_token(&token.token_id, &scope)
        .await
        .expect("verify should succeed");
    assert!(again.valid);
    assert!(!again.can_use);
    assert_eq!(again.status, Some(TokenStatus::Used));
    assert_eq!(again.denial, Some(TokenDenial::AlreadyUsed { used_at }));
}

#[tokio::test]
async fn repeat_use_is_a_no_op() {
    let (_, service) = service();
    let token = service
        .issue_token(&plan(ActionType::MakeCall), "planner")
        .await
        .expect("issue should succeed");

    let first = service
        .mark_token_used(&token.token_id, "cmd-1")
        .await
        .expect("first use");
    let second = service
        .mark_token_used(&token.token_id, "cmd-2")
        .await
        .expect("repeat use is a no-op success");
    assert_eq!(second.used_at, first.used_at);
    assert_eq!(second.used_by.as_deref(), Some("cmd-1"));
}

#[tokio::test]
async fn default_ttl_is_ten_minutes_and_plan_can_override() {
    let (_, service) = service();
    let token = service
        .issue_token(&plan(ActionType::SendEmail), "planner")
        .await
        .expect("issue should succeed");
    assert_eq!(
        token.expires_at.signed_duration_since(token.created_at),
        chrono::Duration::minutes(10)
    );

    let mut short = plan(ActionType::SendEmail);
    if let Some(requirement) = short.token_requirement.as_mut() {
        requirement.ttl = Some(Duration::from_secs(30));
    }
    let token = service
        .issue_token(&short, "planner")
        .await
        .expect("issue should succeed");
    assert_eq!(
        token.expires_at.signed_duration_since(token.created_at),
        chrono::Duration::seconds(30)
    );
}

#[tokio::test]
async fn token_ids_are_unique_and_unpadded() {
    let (_, service) = service();
    let a = service
        .issue_token(&plan(ActionType::BookMeeting), "planner")
        .await
        .expect("issue");
    let b = service
        .issue_token(&plan(ActionType::BookMeeting), "planner")
        .await
        .expect("issue");
    assert_ne!(a.token_id, b.token_id);
    assert_eq!(a.token_id.len(), 43);
    assert!(!a.token_id.contains('='));
}

#[tokio::test]
async fn plans_without_approval_or_requirement_get_no_token() {
    let (_, service) = service();

    let mut denied = plan(ActionType::SendMessage);
    denied.allowed = false;
    assert!(matches!(
        service.issue_token(&denied, "planner").await,
        Err(TokenError::PlanNotAllowed)
    ));

    let mut bare = plan(ActionType::SendMessage);
    bare.token_requirement = None;
    assert!(matches!(
        service.issue_token(&bare, "planner").await,
        Err(TokenError::NoTokenRequirement)
    ));
}

#[tokio::test]
async fn sms_token_cannot_authorize_a_call() {
    let (_, service) = service();
    let token = service
        .issue_token(&plan(ActionType::SendMessage), "planner")
        .await
        .expect("issue should succeed");

    let verification = service
        .verify_token(&token.token_id, &TokenScope::channel(Channel::Voice))
        .await
        .expect("verify should succeed");
    assert!(verification.valid);
    assert!(!verification.can_use);
    assert_eq!(
        verification.denial,
        Some(TokenDenial::ChannelScopeMismatch {
            token: Channel::Sms,
            required: Channel::Voice,
        })
    );
    let reason = verification.reason().unwrap_or_default();
    assert!(reason.contains("channel scope mismatch"), "reason: {reason}");
}

#[tokio::test]
async fn command_type_and_tenant_scopes_are_enforced() {
    let (_, service) = service();
    let token = service
        .issue_token(&plan(ActionType::BookMeeting), "planner")
        .await
        .expect("issue should succeed");

    // Same channel, different command type.
    let cancel = service
        .verify_token(&token.token_id, &TokenScope::for_action(ActionType::CancelMeeting))
        .await
        .expect("verify");
    assert_eq!(
        cancel.denial,
        Some(TokenDenial::CommandTypeMismatch {
            token: ActionType::BookMeeting,
            required: ActionType::CancelMeeting,
        })
    );

    let foreign = service
        .verify_token(
            &token.token_id,
            &TokenScope::for_action(ActionType::BookMeeting).with_tenant("tenant-2"),
        )
        .await
        .expect("verify");
    assert_eq!(foreign.denial, Some(TokenDenial::TenantMismatch));

    let own = service
        .verify_token(
            &token.token_id,
            &TokenScope::for_action(ActionType::BookMeeting).with_tenant("tenant-1"),
        )
        .await
        .expect("verify");
    assert!(own.can_use);
}

#[tokio::test]
async fn unknown_token_is_not_valid() {
    let (_, service) = service();
    let verification = service
        .verify_token("does-not-exist", &TokenScope::default())
        .await
        .expect("verify should succeed");
    assert!(!verification.valid);
    assert!(!verification.can_use);
    assert_eq!(verification.status, None);
    assert_eq!(verification.denial, Some(TokenDenial::NotFound));

    assert!(matches!(
        service.mark_token_used("does-not-exist", "cmd-1").await,
        Err(TokenError::Denied(TokenDenial::NotFound))
    ));
}

#[tokio::test]
async fn expired_token_cannot_be_used() {
    let (repo, service) = service();
    let token = stale_token("stale-1");
    repo.create(&token).await.expect("seed token");

    let verification = service
        .verify_token("stale-1", &TokenScope::for_action(ActionType::SendMessage))
        .await
        .expect("verify");
    assert!(verification.valid);
    assert_eq!(verification.status, Some(TokenStatus::Expired));
    assert_eq!(
        verification.denial,
        Some(TokenDenial::Expired {
            expired_at: token.expires_at
        })
    );

    assert!(matches!(
        service.mark_token_used("stale-1", "cmd-1").await,
        Err(TokenError::Denied(TokenDenial::Expired { .. }))
    ));
}

#[tokio::test]
async fn revoked_token_cannot_be_used_and_repeat_revoke_is_a_no_op() {
    let (_, service) = service();
    let token = service
        .issue_token(&plan(ActionType::UpdateCrmRecord), "planner")
        .await
        .expect("issue should succeed");

    let revoked = service
        .revoke_token(&token.token_id, "ops", "lead opted out")
        .await
        .expect("revoke should succeed");
    let revoked_at = revoked.revoked_at.expect("revoked_at recorded");
    assert_eq!(revoked.revoked_by.as_deref(), Some("ops"));
    assert_eq!(revoked.metadata["revocations"][0]["reason"], "lead opted out");
    assert_eq!(revoked.metadata["issuedBy"], "planner");

    let again = service
        .revoke_token(&token.token_id, "someone-else", "second thoughts")
        .await
        .expect("repeat revoke is a no-op success");
    assert_eq!(again.revoked_at, Some(revoked_at));
    assert_eq!(again.revoked_by.as_deref(), Some("ops"));
    assert_eq!(
        again.metadata["revocations"].as_array().map(Vec::len),
        Some(1)
    );

    let verification = service
        .verify_token(&token.token_id, &TokenScope::for_action(ActionType::UpdateCrmRecord))
        .await
        .expect("verify");
    assert_eq!(verification.status, Some(TokenStatus::Revoked));
    assert_eq!(verification.denial, Some(TokenDenial::Revoked { revoked_at }));

    assert!(matches!(
        service.mark_token_used(&token.token_id, "cmd-1").await,
        Err(TokenError::Denied(TokenDenial::Revoked { .. }))
    ));
}

#[tokio::test]
async fn cleanup_keeps_used_and_revoked_tokens() {
    let (repo, service) = service();

    let plain = stale_token("stale-plain");
    let mut used = stale_token("stale-used");
    used.used_at = Some(used.created_at);
    used.used_by = Some("cmd-old".to_owned());
    let mut revoked = stale_token("stale-revoked");
    revoked.revoked_at = Some(revoked.created_at);
    revoked.revoked_by = Some("ops".to_owned());
    for token in [&plain, &used, &revoked] {
        repo.create(token).await.expect("seed token");
    }
    let fresh = service
        .issue_token(&plan(ActionType::SendMessage), "planner")
        .await
        .expect("issue");

    let removed = service.cleanup_expired_tokens().await.expect("cleanup");
    assert_eq!(removed, 1);

    assert!(repo.find_by_id("stale-plain").await.expect("lookup").is_none());
    assert!(repo.find_by_id("stale-used").await.expect("lookup").is_some());
    assert!(repo.find_by_id("stale-revoked").await.expect("lookup").is_some());
    assert!(repo.find_by_id(&fresh.token_id).await.expect("lookup").is_some());

    assert_eq!(service.cleanup_expired_tokens().await.expect("cleanup"), 0);
}

#[tokio::test]
async fn revoke_landing_after_the_expiry_scan_keeps_the_token() {
    let repo = Arc::new(InterleavingRepo::default());
    let service = ExecutionTokenService::new(Arc::clone(&repo) as Arc<dyn TokenRepository>);
    let stale = stale_token("stale-1");
    repo.create(&stale).await.expect("seed token");
    InterleavingRepo::queue(&repo.after_scan, revoked_copy(&stale, "lead opted out"));

    let removed = service.cleanup_expired_tokens().await.expect("cleanup");

    assert_eq!(removed, 0);
    let kept = repo
        .find_by_id("stale-1")
        .await
        .expect("lookup")
        .expect("revoked token retained");
    assert_eq!(kept.revoked_by.as_deref(), Some("ops"));
}

#[tokio::test]
async fn use_racing_a_revoke_keeps_the_revocation_reason() {
    let repo = Arc::new(InterleavingRepo::default());
    let service = ExecutionTokenService::new(Arc::clone(&repo) as Arc<dyn TokenRepository>);
    let token = service
        .issue_token(&plan(ActionType::SendMessage), "planner")
        .await
        .expect("issue");
    InterleavingRepo::queue(&repo.before_update, revoked_copy(&token, "lead opted out"));

    let stored = service
        .mark_token_used(&token.token_id, "cmd-1")
        .await
        .expect("use");

    assert_eq!(stored.used_by.as_deref(), Some("cmd-1"));
    assert_eq!(stored.revoked_by.as_deref(), Some("ops"));
    assert_eq!(stored.metadata["issuedBy"], "planner");
    assert_eq!(stored.metadata["revocations"][0]["reason"], "lead opted out");
}

#[tokio::test]
async fn racing_revokes_keep_the_first_reason() {
    let repo = Arc::new(InterleavingRepo::default());
    let service = ExecutionTokenService::new(Arc::clone(&repo) as Arc<dyn TokenRepository>);
    let token = service
        .issue_token(&plan(ActionType::SendMessage), "planner")
        .await
        .expect("issue");
    InterleavingRepo::queue(&repo.before_update, revoked_copy(&token, "lead opted out"));

    let stored = service
        .revoke_token(&token.token_id, "admin", "second thoughts")
        .await
        .expect("revoke");

    assert_eq!(stored.revoked_by.as_deref(), Some("ops"));
    let revocations = stored.metadata["revocations"]
        .as_array()
        .expect("revocations list");
    assert_eq!(revocations.len(), 1);
    assert_eq!(revocations[0]["reason"], "lead opted out");
}

#[tokio::test]
async fn tokens_are_listed_by_correlation() {
    let (_, service) = service();
    let first = service
        .issue_token(&plan(ActionType::SendMessage), "planner")
        .await
        .expect("issue");
    let second = service
        .issue_token(&plan(ActionType::MakeCall), "planner")
        .await
        .expect("issue");

    let listed = service
        .tokens_for_correlation("corr-plan")
        .await
        .expect("lookup");
    let ids: Vec<&str> = listed.iter().map(|t| t.token_id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.token_id.as_str()));
    assert!(ids.contains(&second.token_id.as_str()));
    assert!(service
        .tokens_for_correlation("corr-other")
        .await
        .expect("lookup")
        .is_empty());
}

#[test]
fn only_side_effects_require_tokens() {
    assert!(!ExecutionTokenService::execution_requires_token(&plan(
        ActionType::CheckAvailability
    )));
    for action in [
        ActionType::SendMessage,
        ActionType::SendEmail,
        ActionType::MakeCall,
        ActionType::BookMeeting,
        ActionType::CancelMeeting,
        ActionType::UpdateCrmRecord,
    ] {
        assert!(ExecutionTokenService::execution_requires_token(&plan(action)), "{action}");
    }
}
