//! The shared execution contract every adapter runs through.
//!
//! Order is fixed: capability check, boundary scan, shape check, dedupe
//! replay, one provider call, remember on success.

use std::future::Future;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{AdapterCapabilities, AdapterError, BoundaryScanner, KeywordBoundaryScanner};
use crate::idempotency::IdempotencyGuard;
use crate::providers::ProviderResponse;
use crate::types::{ExecutionCommand, ExecutionResult};

static E164: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\+[1-9]\d{7,14}$").ok());

static EMAIL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$").ok()
});

/// Scanner plus dedupe guard, shared by every adapter instance.
#[derive(Clone)]
pub struct AdapterContract {
    scanner: Arc<dyn BoundaryScanner>,
    guard: IdempotencyGuard,
}

impl std::fmt::Debug for AdapterContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterContract")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

impl AdapterContract {
    /// Contract with a custom scanner and guard.
    pub fn new(scanner: Arc<dyn BoundaryScanner>, guard: IdempotencyGuard) -> Self {
        Self { scanner, guard }
    }

    /// Keyword scanner over `guard`.
    pub fn with_guard(guard: IdempotencyGuard) -> Self {
        Self::new(Arc::new(KeywordBoundaryScanner::new()), guard)
    }

    /// Keyword scanner over a private in-memory dedupe store.
    pub fn in_memory() -> Self {
        Self::with_guard(IdempotencyGuard::in_memory())
    }

    /// Capability check, boundary scan, and `validate`. No side effects.
    ///
    /// # Errors
    ///
    /// The first failing check's error.
    pub fn preflight(
        &self,
        caps: &AdapterCapabilities,
        command: &ExecutionCommand,
        validate: impl FnOnce(&ExecutionCommand) -> Result<(), AdapterError>,
    ) -> Result<(), AdapterError> {
        if !caps.supports(command.action_type) {
            return Err(AdapterError::UnsupportedAction {
                adapter: caps.name.clone(),
                action: command.action_type,
            });
        }
        if !command.payload.is_object() {
            return Err(AdapterError::InvalidCommand(
                "payload must be a JSON object".to_owned(),
            ));
        }

        let report = self.scanner.scan(&command.payload);
        if !report.is_clean() {
            warn!(
                adapter = %caps.name,
                command_id = %command.command_id,
                findings = report.findings.len(),
                "adapter boundary violation"
            );
            return Err(AdapterError::BoundaryViolation(report));
        }

        validate(command)
    }

    /// Run the full contract around a single provider call.
    ///
    /// `call` runs at most once, and only when no stored result exists for
    /// the command id.
    ///
    /// # Errors
    ///
    /// Any preflight error, a dedupe store failure on replay, or the
    /// provider error.
    pub async fn execute<F, Fut>(
        &self,
        caps: &AdapterCapabilities,
        command: &ExecutionCommand,
        validate: impl FnOnce(&ExecutionCommand) -> Result<(), AdapterError>,
        call: F,
    ) -> Result<ExecutionResult, AdapterError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ProviderResponse, AdapterError>>,
    {
        self.preflight(caps, command, validate)?;

        if let Some(stored) = self.guard.replay(&command.command_id).await? {
            debug!(adapter = %caps.name, command_id = %command.command_id, "idempotent replay");
            return Ok(stored);
        }

        let response = call().await?;

        let mut metadata = Map::new();
        metadata.insert("adapter".to_owned(), Value::String(caps.name.clone()));
        metadata.insert(
            "adapterVersion".to_owned(),
            Value::String(caps.version.clone()),
        );
        if let Some(status) = response.status {
            metadata.insert("providerStatus".to_owned(), Value::String(status));
        }
        let result =
            ExecutionResult::succeeded(&command.command_id, Some(response.external_id), metadata);

        if let Err(e) = self.guard.remember(&result).await {
            warn!(
                adapter = %caps.name,
                command_id = %command.command_id,
                error = %e,
                "failed to record idempotency key"
            );
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Field checks
// ---------------------------------------------------------------------------

/// A required, non-blank string field.
///
/// # Errors
///
/// [`AdapterError::InvalidCommand`] naming the field.
pub fn require_str<'a>(command: &'a ExecutionCommand, field: &str) -> Result<&'a str, AdapterError> {
    command
        .payload_str(field)
        .ok_or_else(|| AdapterError::InvalidCommand(format!("missing required field: {field}")))
}

/// A required E.164 phone number (`+` then 8 to 15 digits).
///
/// # Errors
///
/// [`AdapterError::InvalidCommand`] if absent or malformed.
pub fn require_phone<'a>(command: &'a ExecutionCommand, field: &str) -> Result<&'a str, AdapterError> {
    let value = require_str(command, field)?;
    if E164.as_ref().is_some_and(|re| re.is_match(value)) {
        Ok(value)
    } else {
        Err(AdapterError::InvalidCommand(format!(
            "{field} is not an E.164 phone number"
        )))
    }
}

/// A required email address.
///
/// # Errors
///
/// [`AdapterError::InvalidCommand`] if absent or malformed.
pub fn require_email<'a>(command: &'a ExecutionCommand, field: &str) -> Result<&'a str, AdapterError> {
    let value = require_str(command, field)?;
    if EMAIL.as_ref().is_some_and(|re| re.is_match(value)) {
        Ok(value)
    } else {
        Err(AdapterError::InvalidCommand(format!(
            "{field} is not an email address"
        )))
    }
}

/// A required RFC 3339 timestamp.
///
/// # Errors
///
/// [`AdapterError::InvalidCommand`] if absent or malformed.
pub fn require_time(command: &ExecutionCommand, field: &str) -> Result<DateTime<Utc>, AdapterError> {
    let value = require_str(command, field)?;
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AdapterError::InvalidCommand(format!("{field} is not an RFC 3339 timestamp")))
}

/// A required identifier that is safe to place in a URL path segment.
///
/// # Errors
///
/// [`AdapterError::InvalidCommand`] if absent or containing path syntax.
pub fn require_identifier<'a>(
    command: &'a ExecutionCommand,
    field: &str,
) -> Result<&'a str, AdapterError> {
    let value = require_str(command, field)?;
    let safe = value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if safe {
        Ok(value)
    } else {
        Err(AdapterError::InvalidCommand(format!(
            "{field} contains unsupported characters"
        )))
    }
}

/// Copy optional literal fields from the payload into a provider body.
pub fn copy_optional(command: &ExecutionCommand, body: &mut Map<String, Value>, fields: &[&str]) {
    for field in fields {
        if let Some(value) = command.payload.get(*field).filter(|v| !v.is_null()) {
            body.insert((*field).to_owned(), value.clone());
        }
    }
}
