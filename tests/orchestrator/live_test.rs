//! Live mode: allowlist enforcement, provider calls, and failure events.

use leadgate::orchestrator::{ExecutionContext, OrchestratorFailure};
use leadgate::types::{ActionType, ExecutionEventType, ExecutionMode};
use serde_json::json;

use crate::harness::{live, HarnessBuilder, ALLOWED_PHONE, OTHER_PHONE};
use crate::support::{call, command, sms, RecordingProvider};

fn live_context() -> ExecutionContext {
    ExecutionContext::permissive().with_mode(ExecutionMode::Live)
}

#[tokio::test]
async fn allowlisted_target_is_sent() {
    let h = HarnessBuilder::new().live().build();
    let result = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &live_context())
        .await;

    assert!(result.success, "{:?}", result.failure);
    assert_eq!(result.mode, ExecutionMode::Live);
    assert_eq!(result.adapter_used, "message");
    let execution = result.execution.expect("provider result");
    assert_eq!(execution.external_id.as_deref(), Some("sms-1"));
    assert!(!execution.flag("simulated"));
    assert_eq!(h.sms.calls(), 1);

    let succeeded = h.events.of_type(ExecutionEventType::ExecutionSucceeded);
    assert_eq!(succeeded.len(), 1);
    assert_eq!(succeeded[0].details["externalId"], "sms-1");
    assert_eq!(result.audit_ref, succeeded[0].event_id);
}

#[tokio::test]
async fn unlisted_target_is_a_safety_violation() {
    let h = HarnessBuilder::new().live().build();
    let result = h
        .orchestrator
        .execute(&call("cmd-1", OTHER_PHONE), &live_context())
        .await;

    assert!(!result.success);
    assert_eq!(result.mode, ExecutionMode::Live);
    assert!(matches!(
        result.failure,
        Some(OrchestratorFailure::SafetyBoundaryViolation { .. })
    ));
    assert_eq!(h.voice.calls(), 0);

    let violations = h.events.of_type(ExecutionEventType::SafetyBoundaryViolation);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].details["target"]["targetType"], "PHONE_NUMBER");
    assert_eq!(result.audit_ref, violations[0].event_id);
}

#[tokio::test]
async fn missing_target_is_a_safety_violation() {
    let h = HarnessBuilder::new().live().build();
    let cmd = command(
        "cmd-1",
        ActionType::CheckAvailability,
        json!({"startTime": "2026-11-02T15:00:00Z", "endTime": "2026-11-02T16:00:00Z"}),
    );
    let result = h.orchestrator.execute(&cmd, &live_context()).await;

    assert!(!result.success);
    let reason = match result.failure {
        Some(OrchestratorFailure::SafetyBoundaryViolation { reason }) => reason,
        other => panic!("expected safety violation, got {other:?}"),
    };
    assert!(reason.contains("calendarId"), "{reason}");
    assert_eq!(h.calendar.calls(), 0);
}

#[tokio::test]
async fn provider_failure_is_reported_as_execution_failed() {
    let h = HarnessBuilder::new()
        .live()
        .voice_provider(RecordingProvider::failing("voice", "carrier unreachable"))
        .build();
    let result = h
        .orchestrator
        .execute(&call("cmd-1", ALLOWED_PHONE), &live_context())
        .await;

    assert!(!result.success);
    assert_eq!(h.voice.calls(), 1);
    let message = result.error_message().unwrap_or_default();
    assert!(message.contains("carrier unreachable"), "{message}");
    let execution = result.execution.expect("failed result is attached");
    assert!(!execution.success);
    assert_eq!(
        h.trail("cmd-1"),
        vec![
            ExecutionEventType::ExecutionAttempted,
            ExecutionEventType::ExecutionFailed
        ]
    );
}

#[tokio::test]
async fn replayed_command_id_is_answered_without_a_second_send() {
    let h = HarnessBuilder::new().live().build();
    let first = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &live_context())
        .await;
    let second = h
        .orchestrator
        .execute(&sms("cmd-1", ALLOWED_PHONE), &live_context())
        .await;

    assert!(first.success && second.success);
    assert_eq!(h.sms.calls(), 1);
    let replay = second.execution.expect("replayed result");
    assert!(replay.flag("idempotent"));
    assert_eq!(
        replay.external_id,
        first.execution.and_then(|e| e.external_id)
    );

    let succeeded = h.events.of_type(ExecutionEventType::ExecutionSucceeded);
    assert_eq!(succeeded.len(), 2);
    assert_eq!(succeeded[1].details["idempotent"], true);
}

#[tokio::test]
async fn calendar_booking_on_an_allowlisted_calendar_goes_live() {
    let h = HarnessBuilder::new().live().build();
    let cmd = command(
        "cmd-1",
        ActionType::BookMeeting,
        json!({
            "calendarId": "cal-main",
            "startTime": "2026-11-02T15:00:00Z",
            "endTime": "2026-11-02T15:30:00Z",
            "title": "Consultation",
        }),
    );
    let context = ExecutionContext {
        mode: live(),
        ..ExecutionContext::permissive()
    };
    let result = h.orchestrator.execute(&cmd, &context).await;

    assert!(result.success, "{:?}", result.failure);
    assert_eq!(result.adapter_used, "calendar");
    assert_eq!(h.calendar.requests()[0].operation, "calendars/cal-main/events");
}
