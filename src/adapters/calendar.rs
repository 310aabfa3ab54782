//! Calendar bookings and availability lookups.
//!
//! `CHECK_AVAILABILITY` is read-only at the provider but still goes through
//! the contract so replays and boundary checks behave the same everywhere.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::contract::{copy_optional, require_email, require_identifier, require_time};
use super::{Adapter, AdapterCapabilities, AdapterContract, AdapterError};
use crate::providers::{ProviderClient, ProviderRequest};
use crate::types::{ActionType, ExecutionCommand, ExecutionResult};

/// Adapter name.
pub const NAME: &str = "calendar";

/// Books, cancels, and queries calendar slots.
pub struct CalendarAdapter {
    caps: AdapterCapabilities,
    contract: AdapterContract,
    provider: Arc<dyn ProviderClient>,
}

impl std::fmt::Debug for CalendarAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarAdapter")
            .field("caps", &self.caps)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl CalendarAdapter {
    /// Create the adapter over a calendar provider.
    pub fn new(contract: AdapterContract, provider: Arc<dyn ProviderClient>) -> Self {
        Self {
            caps: AdapterCapabilities::new(
                NAME,
                env!("CARGO_PKG_VERSION"),
                &[
                    ActionType::BookMeeting,
                    ActionType::CancelMeeting,
                    ActionType::CheckAvailability,
                ],
            ),
            contract,
            provider,
        }
    }

    fn validate(command: &ExecutionCommand) -> Result<(), AdapterError> {
        require_identifier(command, "calendarId")?;
        match command.action_type {
            ActionType::CancelMeeting => {
                require_identifier(command, "eventId")?;
            }
            _ => {
                let start = require_time(command, "startTime")?;
                let end = require_time(command, "endTime")?;
                if start >= end {
                    return Err(AdapterError::InvalidCommand(
                        "startTime must be before endTime".to_owned(),
                    ));
                }
                if command.action_type == ActionType::BookMeeting
                    && command.payload.get("attendeeEmail").is_some_and(|v| !v.is_null())
                {
                    require_email(command, "attendeeEmail")?;
                }
            }
        }
        Ok(())
    }

    fn build_request(command: &ExecutionCommand) -> Result<ProviderRequest, AdapterError> {
        let calendar_id = require_identifier(command, "calendarId")?;
        let mut body = Map::new();
        let operation = match command.action_type {
            ActionType::CancelMeeting => {
                let event_id = require_identifier(command, "eventId")?;
                copy_optional(command, &mut body, &["reason"]);
                format!("calendars/{calendar_id}/events/{event_id}/cancel")
            }
            ActionType::CheckAvailability => {
                copy_optional(command, &mut body, &["startTime", "endTime", "timezone"]);
                format!("calendars/{calendar_id}/availability")
            }
            _ => {
                copy_optional(
                    command,
                    &mut body,
                    &["startTime", "endTime", "title", "attendeeEmail", "timezone"],
                );
                format!("calendars/{calendar_id}/events")
            }
        };
        Ok(ProviderRequest {
            operation,
            idempotency_key: command.command_id.clone(),
            tenant_id: command.tenant_id.clone(),
            body: Value::Object(body),
        })
    }
}

#[async_trait]
impl Adapter for CalendarAdapter {
    fn capabilities(&self) -> &AdapterCapabilities {
        &self.caps
    }

    fn preflight(&self, command: &ExecutionCommand) -> Result<(), AdapterError> {
        self.contract.preflight(&self.caps, command, Self::validate)
    }

    async fn execute(&self, command: &ExecutionCommand) -> Result<ExecutionResult, AdapterError> {
        let provider = &self.provider;
        self.contract
            .execute(&self.caps, command, Self::validate, || async move {
                let request = Self::build_request(command)?;
                Ok(provider.call(request).await?)
            })
            .await
    }
}
