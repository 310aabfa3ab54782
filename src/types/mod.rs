//! Core domain types shared by the lifecycle, token, adapter, and
//! orchestrator layers.
//!
//! Every enum serializes as `SCREAMING_SNAKE_CASE` so stored records and
//! audit lines match the vocabulary used by upstream planners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// A string did not name any variant of a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Implements `as_str`, `Display`, and `FromStr` for a closed enum listing
/// its variants in an `ALL` constant.
macro_rules! closed_enum_strings {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Returns the canonical wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $ty {
            type Err = $crate::types::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_uppercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| $crate::types::UnknownVariant {
                        kind: $kind,
                        value: s.to_owned(),
                    })
            }
        }
    };
}

pub(crate) use closed_enum_strings;

// ---------------------------------------------------------------------------
// Actors, channels, actions
// ---------------------------------------------------------------------------

/// Who is asking for a transition or a side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    /// A human operator (sales rep, admin).
    Human,
    /// An AI agent acting on behalf of the tenant.
    Ai,
    /// The platform itself (webhooks, timers, reconcilers).
    System,
}

impl ActorType {
    /// Every actor type.
    pub const ALL: [ActorType; 3] = [Self::Human, Self::Ai, Self::System];
}

closed_enum_strings!(ActorType, "actor type", {
    Human => "HUMAN",
    Ai => "AI",
    System => "SYSTEM",
});

/// Outbound channel a side effect travels through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    /// Text message.
    Sms,
    /// Email.
    Email,
    /// Outbound phone call.
    Voice,
    /// Calendar booking system.
    Calendar,
    /// CRM record store.
    Crm,
}

impl Channel {
    /// Every channel.
    pub const ALL: [Channel; 5] = [
        Self::Sms,
        Self::Email,
        Self::Voice,
        Self::Calendar,
        Self::Crm,
    ];
}

closed_enum_strings!(Channel, "channel", {
    Sms => "SMS",
    Email => "EMAIL",
    Voice => "VOICE",
    Calendar => "CALENDAR",
    Crm => "CRM",
});

/// The kind of side effect a command requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Send a text message.
    SendMessage,
    /// Send an email.
    SendEmail,
    /// Place an outbound call.
    MakeCall,
    /// Create a calendar booking.
    BookMeeting,
    /// Cancel an existing calendar booking.
    CancelMeeting,
    /// Query free/busy slots on a calendar.
    CheckAvailability,
    /// Write fields onto a CRM contact record.
    UpdateCrmRecord,
}

impl ActionType {
    /// Every action type.
    pub const ALL: [ActionType; 7] = [
        Self::SendMessage,
        Self::SendEmail,
        Self::MakeCall,
        Self::BookMeeting,
        Self::CancelMeeting,
        Self::CheckAvailability,
        Self::UpdateCrmRecord,
    ];

    /// Channel this action is delivered through.
    pub fn channel(&self) -> Channel {
        match self {
            Self::SendMessage => Channel::Sms,
            Self::SendEmail => Channel::Email,
            Self::MakeCall => Channel::Voice,
            Self::BookMeeting | Self::CancelMeeting | Self::CheckAvailability => {
                Channel::Calendar
            }
            Self::UpdateCrmRecord => Channel::Crm,
        }
    }
}

closed_enum_strings!(ActionType, "action type", {
    SendMessage => "SEND_MESSAGE",
    SendEmail => "SEND_EMAIL",
    MakeCall => "MAKE_CALL",
    BookMeeting => "BOOK_MEETING",
    CancelMeeting => "CANCEL_MEETING",
    CheckAvailability => "CHECK_AVAILABILITY",
    UpdateCrmRecord => "UPDATE_CRM_RECORD",
});

/// Whether a command touches the outside world or only simulates doing so.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Simulated execution; no provider is contacted.
    #[default]
    Rehearsal,
    /// Real execution against the provider.
    Live,
}

impl ExecutionMode {
    /// Both modes.
    pub const ALL: [ExecutionMode; 2] = [Self::Rehearsal, Self::Live];
}

closed_enum_strings!(ExecutionMode, "execution mode", {
    Rehearsal => "REHEARSAL",
    Live => "LIVE",
});

// ---------------------------------------------------------------------------
// Commands and results
// ---------------------------------------------------------------------------

/// A request to perform exactly one externally visible side effect.
///
/// `command_id` doubles as the idempotency key: a replayed command with the
/// same id is answered from the dedupe store instead of being re-executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCommand {
    /// Idempotency key, unique per logical attempt.
    pub command_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Lead (opportunity) the side effect concerns.
    pub lead_id: String,
    /// Requested side effect.
    pub action_type: ActionType,
    /// Literal parameters for the adapter.
    #[serde(default)]
    pub payload: Value,
    /// Correlation id threading this command through the audit trail.
    pub correlation_id: String,
}

impl ExecutionCommand {
    /// Read a string field from the payload, ignoring blanks.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Normalized outcome of a single adapter invocation, real or simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Whether the side effect happened (or would have, when simulated).
    pub success: bool,
    /// Command this result answers.
    pub command_id: String,
    /// Identifier assigned by the provider, if any.
    pub external_id: Option<String>,
    /// Failure description when `success` is false.
    pub error: Option<String>,
    /// Adapter and provider annotations (`simulated`, `idempotent`, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// When the result was produced.
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    /// Build a successful result.
    pub fn succeeded(
        command_id: impl Into<String>,
        external_id: Option<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            success: true,
            command_id: command_id.into(),
            external_id,
            error: None,
            metadata,
            timestamp: Utc::now(),
        }
    }

    /// Build a failed result.
    pub fn failed(command_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            command_id: command_id.into(),
            external_id: None,
            error: Some(error.into()),
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Read a boolean metadata flag, treating absence as false.
    pub fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------------

/// Pipeline stage outcome recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionEventType {
    /// A command entered the pipeline.
    ExecutionAttempted,
    /// A live side effect completed.
    ExecutionSucceeded,
    /// The command was rejected or the adapter failed.
    ExecutionFailed,
    /// Live execution was blocked by the provider allowlist.
    SafetyBoundaryViolation,
    /// The adapter was asked to exceed its stateless role.
    AdapterBoundaryViolation,
    /// The command completed as a rehearsal.
    DryRunExecuted,
}

impl ExecutionEventType {
    /// Every event type.
    pub const ALL: [ExecutionEventType; 6] = [
        Self::ExecutionAttempted,
        Self::ExecutionSucceeded,
        Self::ExecutionFailed,
        Self::SafetyBoundaryViolation,
        Self::AdapterBoundaryViolation,
        Self::DryRunExecuted,
    ];

    /// Whether this event closes a command's pipeline run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ExecutionAttempted)
    }
}

closed_enum_strings!(ExecutionEventType, "event type", {
    ExecutionAttempted => "EXECUTION_ATTEMPTED",
    ExecutionSucceeded => "EXECUTION_SUCCEEDED",
    ExecutionFailed => "EXECUTION_FAILED",
    SafetyBoundaryViolation => "SAFETY_BOUNDARY_VIOLATION",
    AdapterBoundaryViolation => "ADAPTER_BOUNDARY_VIOLATION",
    DryRunExecuted => "DRY_RUN_EXECUTED",
});

/// Immutable audit record of one pipeline stage outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    /// Unique event id; terminal event ids are handed to callers as audit refs.
    pub event_id: Uuid,
    /// Stage outcome.
    pub event_type: ExecutionEventType,
    /// Command the event belongs to.
    pub command_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Lead the command concerns.
    pub lead_id: String,
    /// Requested side effect.
    pub action_type: ActionType,
    /// Correlation id copied from the command.
    pub correlation_id: String,
    /// Adapter involved, if one was selected.
    pub adapter: Option<String>,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Stage-specific details.
    pub details: Value,
}

impl ExecutionEvent {
    /// Create an event tagged with the command's identifiers.
    pub fn for_command(
        event_type: ExecutionEventType,
        command: &ExecutionCommand,
        adapter: Option<&str>,
        details: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            command_id: command.command_id.clone(),
            tenant_id: command.tenant_id.clone(),
            lead_id: command.lead_id.clone(),
            action_type: command.action_type,
            correlation_id: command.correlation_id.clone(),
            adapter: adapter.map(str::to_owned),
            timestamp: Utc::now(),
            details,
        }
    }
}
