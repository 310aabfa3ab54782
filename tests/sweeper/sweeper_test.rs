//! Expired tokens and idempotency records are swept; live ones are kept.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use tokio::sync::watch;

use leadgate::idempotency::{IdempotencyGuard, IdempotencyRepository, InMemoryIdempotencyStore};
use leadgate::sweeper::{spawn_sweeper, sweep_once, SweepReport};
use leadgate::tokens::{ExecutionTokenService, InMemoryTokenRepository, TokenRepository};
use leadgate::types::{ActionType, ExecutionResult};

use crate::support::{plan, stale_token};

struct Fixture {
    tokens: Arc<ExecutionTokenService>,
    token_repo: Arc<InMemoryTokenRepository>,
    expiring: IdempotencyGuard,
}

async fn fixture() -> Fixture {
    let token_repo = Arc::new(InMemoryTokenRepository::new());
    let tokens = Arc::new(ExecutionTokenService::new(
        Arc::clone(&token_repo) as Arc<dyn TokenRepository>
    ));

    token_repo
        .create(&stale_token("stale-1"))
        .await
        .expect("create stale token");
    let mut used = stale_token("stale-used");
    used.used_at = Some(used.created_at);
    used.used_by = Some("cmd-0".to_owned());
    token_repo.create(&used).await.expect("create used token");
    tokens
        .issue_token(&plan(ActionType::SendMessage), "planner")
        .await
        .expect("issue fresh token");

    let store: Arc<dyn IdempotencyRepository> = Arc::new(InMemoryIdempotencyStore::new());
    let expiring = IdempotencyGuard::new(store, Duration::ZERO);
    expiring
        .remember(&ExecutionResult::succeeded(
            "cmd-1",
            Some("ext-1".to_owned()),
            Map::new(),
        ))
        .await
        .expect("remember");

    Fixture {
        tokens,
        token_repo,
        expiring,
    }
}

#[tokio::test]
async fn sweep_once_removes_only_unused_expired_records() {
    let f = fixture().await;

    let report = sweep_once(&f.tokens, &f.expiring).await;
    assert_eq!(
        report,
        SweepReport {
            tokens_removed: 1,
            idempotency_records_removed: 1,
        }
    );

    assert!(f.token_repo.find_by_id("stale-1").await.expect("lookup").is_none());
    assert!(f.token_repo.find_by_id("stale-used").await.expect("lookup").is_some());
    assert_eq!(
        f.tokens
            .tokens_for_correlation("corr-plan")
            .await
            .expect("lookup")
            .len(),
        1
    );

    assert_eq!(sweep_once(&f.tokens, &f.expiring).await, SweepReport::default());
}

#[tokio::test(start_paused = true)]
async fn background_sweeper_runs_on_interval_and_stops_on_shutdown() {
    let f = fixture().await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = spawn_sweeper(
        Arc::clone(&f.tokens),
        f.expiring.clone(),
        Duration::from_secs(60),
        shutdown_rx,
    );

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(f.token_repo.find_by_id("stale-1").await.expect("lookup").is_none());

    shutdown_tx.send(true).expect("sweeper is listening");
    handle.await.expect("sweeper exits cleanly");
}
