//! `SqliteIdempotencyRepository` expiry and replacement rules.

use chrono::{Duration, Utc};
use serde_json::json;

use leadgate::idempotency::{IdempotencyRecord, IdempotencyRepository};
use leadgate::storage::SqliteIdempotencyRepository;

use crate::support::memory_pool;

fn record(key: &str, expires_in: Duration, response: serde_json::Value) -> IdempotencyRecord {
    let now = Utc::now();
    IdempotencyRecord {
        key: key.to_owned(),
        response,
        created_at: now,
        expires_at: match now.checked_add_signed(expires_in) {
            Some(at) => at,
            None => panic!("timestamp overflow"),
        },
    }
}

#[tokio::test]
async fn live_records_are_returned_and_replaced() {
    let repo = SqliteIdempotencyRepository::new(memory_pool().await);
    repo.set(&record("cmd-1", Duration::hours(1), json!({"v": 1})))
        .await
        .expect("set");
    repo.set(&record("cmd-1", Duration::hours(1), json!({"v": 2})))
        .await
        .expect("replace");

    let found = repo
        .get("cmd-1", Utc::now())
        .await
        .expect("get")
        .expect("record present");
    assert_eq!(found.response, json!({"v": 2}));
    assert!(repo.get("cmd-2", Utc::now()).await.expect("get").is_none());
}

#[tokio::test]
async fn expired_records_are_invisible_and_swept() {
    let repo = SqliteIdempotencyRepository::new(memory_pool().await);
    repo.set(&record("old", Duration::hours(-1), json!({})))
        .await
        .expect("set");
    repo.set(&record("new", Duration::hours(1), json!({})))
        .await
        .expect("set");

    assert!(repo.get("old", Utc::now()).await.expect("get").is_none());
    assert_eq!(repo.cleanup(Utc::now()).await.expect("cleanup"), 1);
    assert!(repo.get("new", Utc::now()).await.expect("get").is_some());

    assert!(repo.delete("new").await.expect("delete"));
    assert!(!repo.delete("new").await.expect("delete"));
}
