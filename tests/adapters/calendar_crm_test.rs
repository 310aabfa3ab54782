//! Calendar and CRM request shapes and validation.

use std::sync::Arc;

use serde_json::json;

use leadgate::adapters::calendar::CalendarAdapter;
use leadgate::adapters::crm::CrmAdapter;
use leadgate::adapters::{Adapter, AdapterContract, AdapterError};
use leadgate::types::ActionType;

use crate::support::{command, RecordingProvider};

fn calendar() -> (Arc<RecordingProvider>, CalendarAdapter) {
    let provider = RecordingProvider::new("calendar");
    let adapter = CalendarAdapter::new(AdapterContract::in_memory(), Arc::clone(&provider) as _);
    (provider, adapter)
}

#[tokio::test]
async fn booking_posts_to_the_calendar_events_collection() {
    let (provider, adapter) = calendar();
    let booking = command(
        "cmd-1",
        ActionType::BookMeeting,
        json!({
            "calendarId": "cal-main",
            "startTime": "2026-03-01T10:00:00Z",
            "endTime": "2026-03-01T10:30:00Z",
            "title": "Consultation",
            "attendeeEmail": "sam@example.com"
        }),
    );
    let result = adapter.execute(&booking).await.expect("execute should succeed");
    assert_eq!(result.metadata["adapter"], "calendar");

    let request = &provider.requests()[0];
    assert_eq!(request.operation, "calendars/cal-main/events");
    assert_eq!(request.body["title"], "Consultation");
    assert_eq!(request.body["attendeeEmail"], "sam@example.com");
}

#[tokio::test]
async fn cancel_and_availability_use_their_own_operations() {
    let (provider, adapter) = calendar();
    adapter
        .execute(&command(
            "cmd-2",
            ActionType::CancelMeeting,
            json!({"calendarId": "cal-main", "eventId": "evt_42", "reason": "rescheduled"}),
        ))
        .await
        .expect("cancel");
    adapter
        .execute(&command(
            "cmd-3",
            ActionType::CheckAvailability,
            json!({
                "calendarId": "cal-main",
                "startTime": "2026-03-01T09:00:00+01:00",
                "endTime": "2026-03-01T17:00:00+01:00"
            }),
        ))
        .await
        .expect("availability");

    let operations: Vec<String> = provider
        .requests()
        .into_iter()
        .map(|r| r.operation)
        .collect();
    assert_eq!(
        operations,
        vec![
            "calendars/cal-main/events/evt_42/cancel".to_owned(),
            "calendars/cal-main/availability".to_owned(),
        ]
    );
}

#[test]
fn calendar_rejects_bad_windows_and_path_syntax() {
    let (_, adapter) = calendar();

    let inverted = command(
        "cmd-4",
        ActionType::BookMeeting,
        json!({
            "calendarId": "cal-main",
            "startTime": "2026-03-01T11:00:00Z",
            "endTime": "2026-03-01T10:00:00Z"
        }),
    );
    assert!(matches!(
        adapter.preflight(&inverted),
        Err(AdapterError::InvalidCommand(msg)) if msg.contains("before")
    ));

    let not_rfc3339 = command(
        "cmd-5",
        ActionType::CheckAvailability,
        json!({"calendarId": "cal-main", "startTime": "tomorrow", "endTime": "2026-03-01T10:00:00Z"}),
    );
    assert!(adapter.preflight(&not_rfc3339).is_err());

    let traversal = command(
        "cmd-6",
        ActionType::CancelMeeting,
        json!({"calendarId": "../admin", "eventId": "evt_42"}),
    );
    assert!(adapter.preflight(&traversal).is_err());

    let bad_attendee = command(
        "cmd-7",
        ActionType::BookMeeting,
        json!({
            "calendarId": "cal-main",
            "startTime": "2026-03-01T10:00:00Z",
            "endTime": "2026-03-01T10:30:00Z",
            "attendeeEmail": "not-an-email"
        }),
    );
    assert!(adapter.preflight(&bad_attendee).is_err());
}

#[tokio::test]
async fn crm_update_targets_the_contact_record() {
    let provider = RecordingProvider::new("crm");
    let adapter = CrmAdapter::new(AdapterContract::in_memory(), Arc::clone(&provider) as _);

    let update = command(
        "cmd-8",
        ActionType::UpdateCrmRecord,
        json!({
            "locationId": "loc-1",
            "contactId": "contact-9",
            "fields": {"firstName": "Sam", "source": "webform"}
        }),
    );
    adapter.execute(&update).await.expect("execute should succeed");

    let request = &provider.requests()[0];
    assert_eq!(request.operation, "locations/loc-1/contacts/contact-9");
    assert_eq!(request.body["fields"]["source"], "webform");
}

#[test]
fn crm_requires_non_empty_fields() {
    let adapter = CrmAdapter::new(
        AdapterContract::in_memory(),
        RecordingProvider::new("crm") as _,
    );
    for fields in [json!({}), json!("Sam"), json!(null)] {
        let update = command(
            "cmd-9",
            ActionType::UpdateCrmRecord,
            json!({"locationId": "loc-1", "contactId": "contact-9", "fields": fields}),
        );
        assert!(
            matches!(adapter.preflight(&update), Err(AdapterError::InvalidCommand(_))),
            "fields {fields} should be rejected"
        );
    }
}
