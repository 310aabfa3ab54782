//! Rehearsal mode: the full pipeline runs but no provider is touched.

use leadgate::orchestrator::{ExecutionContext, OrchestratorFailure, NO_ADAPTER};
use leadgate::types::{ExecutionEventType, ExecutionMode};
use serde_json::json;

use crate::harness::{live, HarnessBuilder, ALLOWED_PHONE};
use crate::support::{call, command, sms};

#[tokio::test]
async fn rehearsal_simulates_without_calling_the_provider() {
    let h = HarnessBuilder::new().build();
    let result = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &ExecutionContext::permissive())
        .await;

    assert!(result.success, "{:?}", result.failure);
    assert_eq!(result.mode, ExecutionMode::Rehearsal);
    assert_eq!(result.adapter_used, "message");
    assert_eq!(result.correlation_id, "corr-cmd-1");
    let execution = result.execution.expect("simulated result");
    assert_eq!(execution.external_id.as_deref(), Some("sim-message-cmd-1"));
    assert!(execution.flag("simulated"));
    assert_eq!(h.sms.calls(), 0);

    assert_eq!(
        h.trail("cmd-1"),
        vec![
            ExecutionEventType::ExecutionAttempted,
            ExecutionEventType::DryRunExecuted
        ]
    );
    let terminal = h.events.of_type(ExecutionEventType::DryRunExecuted);
    assert_eq!(terminal.len(), 1);
    assert_eq!(result.audit_ref, terminal[0].event_id);
}

#[tokio::test]
async fn live_request_from_tenant_without_live_access_is_downgraded() {
    let h = HarnessBuilder::new().build();
    let context = ExecutionContext::permissive().with_mode(ExecutionMode::Live);
    let result = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &context)
        .await;

    assert!(result.success);
    assert_eq!(result.mode, ExecutionMode::Rehearsal);
    assert_eq!(h.sms.calls(), 0);

    let dry_runs = h.events.of_type(ExecutionEventType::DryRunExecuted);
    let reason = dry_runs[0].details["resolution"]["downgradeReason"]
        .as_str()
        .unwrap_or_default();
    assert!(reason.contains("tenant-1"), "{reason}");
}

#[tokio::test]
async fn kill_switch_forces_rehearsal_until_released() {
    let h = HarnessBuilder::new().live().build();
    let context = ExecutionContext {
        mode: live(),
        ..ExecutionContext::permissive()
    };

    h.kill_switch.engage();
    let blocked = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &context)
        .await;
    assert!(blocked.success);
    assert_eq!(blocked.mode, ExecutionMode::Rehearsal);
    assert_eq!(h.sms.calls(), 0);

    h.kill_switch.release();
    let sent = h
        .orchestrator
        .execute(&sms("cmd-2", ALLOWED_PHONE), &context)
        .await;
    assert!(sent.success);
    assert_eq!(sent.mode, ExecutionMode::Live);
    assert_eq!(h.sms.calls(), 1);
}

#[tokio::test]
async fn rehearsal_still_enforces_the_adapter_boundary() {
    let h = HarnessBuilder::new().build();
    let cmd = command(
        "cmd-1",
        leadgate::types::ActionType::SendMessage,
        json!({"to": ALLOWED_PHONE, "body": "hello", "lead_state": "CONTACTED"}),
    );
    let result = h
        .orchestrator
        .execute(&cmd, &ExecutionContext::permissive())
        .await;

    assert!(!result.success);
    assert!(matches!(
        result.failure,
        Some(OrchestratorFailure::AdapterBoundaryViolation { .. })
    ));
    assert_eq!(
        h.trail("cmd-1"),
        vec![
            ExecutionEventType::ExecutionAttempted,
            ExecutionEventType::AdapterBoundaryViolation
        ]
    );
}

#[tokio::test]
async fn rehearsal_rejects_invalid_payloads() {
    let h = HarnessBuilder::new().build();
    let result = h
        .orchestrator
        .execute(&sms("cmd-1", "not-a-number"), &ExecutionContext::permissive())
        .await;

    assert!(!result.success);
    assert!(matches!(
        result.failure,
        Some(OrchestratorFailure::AdapterExecutionError { .. })
    ));
    assert!(result.execution.is_none());
}

#[tokio::test]
async fn action_without_adapter_reports_none() {
    let h = HarnessBuilder::new().without_voice().build();
    let result = h
        .orchestrator
        .execute(&call("cmd-1", ALLOWED_PHONE), &ExecutionContext::permissive())
        .await;

    assert!(!result.success);
    assert_eq!(result.adapter_used, NO_ADAPTER);
    assert_eq!(
        result.error_message().as_deref(),
        Some("no adapter registered for MAKE_CALL")
    );
    assert_eq!(
        h.trail("cmd-1"),
        vec![
            ExecutionEventType::ExecutionAttempted,
            ExecutionEventType::ExecutionFailed
        ]
    );
}
