//! Schema validation and business rules run before any adapter is chosen.

use leadgate::lifecycle::{LeadState, TransitionAttempt};
use leadgate::orchestrator::{BillingStatus, ExecutionContext, OrchestratorFailure, NO_ADAPTER};
use leadgate::types::{ActionType, ActorType, ExecutionEventType, ExecutionMode};

use crate::harness::{HarnessBuilder, ALLOWED_PHONE};
use crate::support::sms;

fn violations(failure: Option<OrchestratorFailure>) -> Vec<String> {
    match failure {
        Some(OrchestratorFailure::BusinessRuleBlocked { violations }) => violations,
        other => panic!("expected business rule block, got {other:?}"),
    }
}

#[tokio::test]
async fn blank_identifiers_fail_schema_validation() {
    let h = HarnessBuilder::new().build();
    let mut cmd = sms("cmd-1", ALLOWED_PHONE);
    cmd.tenant_id = String::new();
    cmd.correlation_id = "  ".to_owned();

    let result = h
        .orchestrator
        .execute(&cmd, &ExecutionContext::permissive())
        .await;

    assert!(!result.success);
    assert_eq!(result.adapter_used, NO_ADAPTER);
    match result.failure {
        Some(OrchestratorFailure::SchemaInvalid { errors }) => assert_eq!(errors.len(), 2),
        other => panic!("expected schema failure, got {other:?}"),
    }
    assert_eq!(h.trail("cmd-1").len(), 2);
}

#[tokio::test]
async fn early_failures_report_the_configured_default_mode() {
    let h = HarnessBuilder::new().default_mode(ExecutionMode::Live).build();
    let mut cmd = sms("cmd-1", ALLOWED_PHONE);
    cmd.tenant_id = String::new();

    let result = h
        .orchestrator
        .execute(&cmd, &ExecutionContext::permissive())
        .await;

    assert!(matches!(
        result.failure,
        Some(OrchestratorFailure::SchemaInvalid { .. })
    ));
    assert_eq!(result.mode, ExecutionMode::Live);

    let h = HarnessBuilder::new().build();
    let result = h
        .orchestrator
        .execute(&cmd, &ExecutionContext::permissive())
        .await;
    assert_eq!(result.mode, ExecutionMode::Rehearsal);
}

#[tokio::test]
async fn every_violated_rule_is_reported() {
    let h = HarnessBuilder::new().build();
    let context = ExecutionContext {
        billing_status: BillingStatus::Suspended,
        capabilities: vec![ActionType::SendEmail],
        lead_state: Some(LeadState::DoNotContact),
        ..ExecutionContext::default()
    };

    let result = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &context)
        .await;

    assert!(!result.success);
    let found = violations(result.failure);
    assert_eq!(
        found,
        vec![
            "billing status SUSPENDED blocks execution".to_owned(),
            "capability not granted: SEND_MESSAGE".to_owned(),
            "lead is in terminal state DO_NOT_CONTACT".to_owned(),
        ]
    );
    assert_eq!(h.sms.calls(), 0);
    assert_eq!(
        h.trail("cmd-1"),
        vec![
            ExecutionEventType::ExecutionAttempted,
            ExecutionEventType::ExecutionFailed
        ]
    );
}

#[tokio::test]
async fn empty_capability_list_blocks_everything() {
    let h = HarnessBuilder::new().build();
    let result = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &ExecutionContext::default())
        .await;

    assert_eq!(
        violations(result.failure),
        vec!["capability not granted: SEND_MESSAGE".to_owned()]
    );
}

#[tokio::test]
async fn trial_billing_is_allowed() {
    let h = HarnessBuilder::new().build();
    let context = ExecutionContext {
        billing_status: BillingStatus::Trial,
        ..ExecutionContext::permissive()
    };
    let result = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &context)
        .await;
    assert!(result.success, "{:?}", result.failure);
}

#[tokio::test]
async fn rejected_transition_blocks_the_command() {
    let h = HarnessBuilder::new().build();
    let context = ExecutionContext::permissive()
        .with_lead_state(LeadState::New)
        .with_transition(TransitionAttempt::new(
            LeadState::New,
            LeadState::ContactAttempting,
            ActorType::Ai,
        ));

    let result = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &context)
        .await;

    let found = violations(result.failure);
    assert_eq!(found, vec!["missing inputs: channel".to_owned()]);
}

#[tokio::test]
async fn valid_transition_lets_the_command_through() {
    let h = HarnessBuilder::new().build();
    let context = ExecutionContext::permissive()
        .with_lead_state(LeadState::New)
        .with_transition(
            TransitionAttempt::new(LeadState::New, LeadState::ContactAttempting, ActorType::Ai)
                .with_input("channel", "SMS"),
        );

    let result = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &context)
        .await;
    assert!(result.success, "{:?}", result.failure);
}

#[tokio::test]
async fn transition_must_start_from_the_current_state() {
    let h = HarnessBuilder::new().build();
    let context = ExecutionContext::permissive()
        .with_lead_state(LeadState::Contacted)
        .with_transition(
            TransitionAttempt::new(LeadState::New, LeadState::ContactAttempting, ActorType::Ai)
                .with_input("channel", "SMS"),
        );

    let result = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &context)
        .await;

    let found = violations(result.failure);
    assert_eq!(
        found,
        vec!["transition starts from NEW but lead is in CONTACTED".to_owned()]
    );
}
