//! Execution orchestrator: the single entry point for side effects.
//!
//! ```text
//! command ─▶ schema ─▶ business rules ─▶ adapter ─▶ mode ─┬─ rehearsal ─▶ preflight ─▶ simulated result
//!                                                          └─ live ─▶ allowlist ─▶ adapter.execute ─▶ token used
//! ```
//!
//! Every run publishes `EXECUTION_ATTEMPTED` on entry and exactly one
//! terminal event on exit. The terminal event's id is returned to the
//! caller as `audit_ref`. Failures are values, never panics or errors.

pub mod events;
pub mod safety;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{AdapterError, AdapterRegistry, BoundaryReport};
use crate::lifecycle::{LeadState, LeadStateMachine, TransitionAttempt};
use crate::tokens::{action_requires_token, token_prefix, ExecutionTokenService, TokenScope};
use crate::types::{
    closed_enum_strings, ActionType, ExecutionCommand, ExecutionEvent, ExecutionEventType,
    ExecutionMode, ExecutionResult,
};

pub use self::events::{
    EventPublisher, JsonlEventPublisher, MemoryEventPublisher, PublishError,
    TracingEventPublisher,
};
pub use self::safety::{
    GuardDecision, KillSwitch, ProviderAllowlist, SafetyGate, SafetyGuard, SafetyViolation,
    TargetType, TenantLiveGuard,
};

/// Largest accepted payload, measured as serialized JSON.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// `adapter_used` value when no adapter was selected.
pub const NO_ADAPTER: &str = "none";

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Tenant billing standing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingStatus {
    /// Paying and current.
    #[default]
    Active,
    /// Trial period.
    Trial,
    /// Payment overdue; execution blocked.
    PastDue,
    /// Account suspended; execution blocked.
    Suspended,
}

impl BillingStatus {
    /// Every billing status.
    pub const ALL: [BillingStatus; 4] = [Self::Active, Self::Trial, Self::PastDue, Self::Suspended];

    /// Whether this standing blocks all execution.
    pub fn blocks_execution(&self) -> bool {
        matches!(self, Self::PastDue | Self::Suspended)
    }
}

closed_enum_strings!(BillingStatus, "billing status", {
    Active => "ACTIVE",
    Trial => "TRIAL",
    PastDue => "PAST_DUE",
    Suspended => "SUSPENDED",
});

/// Business context the host supplies alongside each command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionContext {
    /// Tenant billing standing.
    pub billing_status: BillingStatus,
    /// Action types the tenant's plan grants.
    pub capabilities: Vec<ActionType>,
    /// Lead's current lifecycle state, if known.
    pub lead_state: Option<LeadState>,
    /// Lifecycle transition the command accompanies, if any.
    pub transition: Option<TransitionAttempt>,
    /// Execution token authorizing the side effect.
    pub token_id: Option<String>,
    /// Requested mode; the gate's default applies when absent.
    pub mode: Option<ExecutionMode>,
}

impl ExecutionContext {
    /// Active billing and every capability granted.
    pub fn permissive() -> Self {
        Self {
            capabilities: ActionType::ALL.to_vec(),
            ..Self::default()
        }
    }

    /// Set the requested mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Attach a token id.
    pub fn with_token(mut self, token_id: impl Into<String>) -> Self {
        self.token_id = Some(token_id.into());
        self
    }

    /// Set the lead's current state.
    pub fn with_lead_state(mut self, state: LeadState) -> Self {
        self.lead_state = Some(state);
        self
    }

    /// Attach a lifecycle transition.
    pub fn with_transition(mut self, transition: TransitionAttempt) -> Self {
        self.transition = Some(transition);
        self
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Why a command did not complete.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "category", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorFailure {
    /// The command is structurally malformed.
    #[error("schema invalid: {}", errors.join("; "))]
    SchemaInvalid {
        /// Every structural problem found.
        errors: Vec<String>,
    },
    /// Business rules refused the command.
    #[error("blocked by business rules: {}", violations.join("; "))]
    BusinessRuleBlocked {
        /// Every violated rule.
        violations: Vec<String>,
    },
    /// No adapter handles the action type.
    #[error("no adapter registered for {action_type}")]
    NoAdapterRegistered {
        /// Requested action type.
        #[serde(rename = "actionType")]
        action_type: ActionType,
    },
    /// Live execution was blocked by the allowlist.
    #[error("safety boundary violation: {reason}")]
    SafetyBoundaryViolation {
        /// Why the target was refused.
        reason: String,
    },
    /// The payload asked the adapter to exceed its role.
    #[error("adapter boundary violation: {report}")]
    AdapterBoundaryViolation {
        /// Scanner findings.
        report: BoundaryReport,
    },
    /// The adapter or its provider failed.
    #[error("adapter execution error: {message}")]
    AdapterExecutionError {
        /// Error description.
        message: String,
    },
}

/// Everything the caller learns about one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorResult {
    /// Whether the command completed (live or simulated).
    pub success: bool,
    /// Command id.
    pub command_id: String,
    /// Requested action type.
    pub action_type: ActionType,
    /// Adapter name, or `"none"`.
    pub adapter_used: String,
    /// Mode the command ran (or would have run) in.
    pub mode: ExecutionMode,
    /// Correlation id copied from the command.
    pub correlation_id: String,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Id of the terminal audit event.
    pub audit_ref: Uuid,
    /// Normalized adapter result, when one was produced.
    pub execution: Option<ExecutionResult>,
    /// Failure detail, when `success` is false.
    pub failure: Option<OrchestratorFailure>,
}

impl OrchestratorResult {
    /// Failure description, if any.
    pub fn error_message(&self) -> Option<String> {
        self.failure.as_ref().map(ToString::to_string)
    }
}

/// How a run ended, before it is turned into an event and a result.
struct Outcome {
    event_type: ExecutionEventType,
    adapter: Option<String>,
    mode: ExecutionMode,
    execution: Option<ExecutionResult>,
    failure: Option<OrchestratorFailure>,
    details: Value,
}

impl Outcome {
    fn failed(
        event_type: ExecutionEventType,
        adapter: Option<String>,
        mode: ExecutionMode,
        failure: OrchestratorFailure,
    ) -> Self {
        let details = json!({ "failure": &failure, "message": failure.to_string() });
        Self {
            event_type,
            adapter,
            mode,
            execution: None,
            failure: Some(failure),
            details,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Validates, gates, and routes execution commands.
pub struct ExecutionOrchestrator {
    registry: Arc<AdapterRegistry>,
    state_machine: LeadStateMachine,
    safety: SafetyGate,
    publisher: Arc<dyn EventPublisher>,
    tokens: Option<Arc<ExecutionTokenService>>,
}

impl std::fmt::Debug for ExecutionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOrchestrator")
            .field("registry", &self.registry)
            .field("safety", &self.safety)
            .field("tokens", &self.tokens.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecutionOrchestrator {
    /// Create an orchestrator without token enforcement.
    pub fn new(
        registry: Arc<AdapterRegistry>,
        safety: SafetyGate,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            registry,
            state_machine: LeadStateMachine::standard(),
            safety,
            publisher,
            tokens: None,
        }
    }

    /// Require and consume execution tokens for side-effecting actions.
    pub fn with_token_service(mut self, tokens: Arc<ExecutionTokenService>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Use a custom lifecycle table.
    pub fn with_state_machine(mut self, state_machine: LeadStateMachine) -> Self {
        self.state_machine = state_machine;
        self
    }

    /// The adapter registry.
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// The safety gate.
    pub fn safety(&self) -> &SafetyGate {
        &self.safety
    }

    /// Run one command through the full pipeline.
    pub async fn execute(
        &self,
        command: &ExecutionCommand,
        context: &ExecutionContext,
    ) -> OrchestratorResult {
        self.emit(ExecutionEvent::for_command(
            ExecutionEventType::ExecutionAttempted,
            command,
            None,
            json!({
                "requestedMode": context.mode,
                "hasToken": context.token_id.is_some(),
            }),
        ))
        .await;

        let outcome = self.run(command, context).await;
        self.finish(command, outcome).await
    }

    async fn run(&self, command: &ExecutionCommand, context: &ExecutionContext) -> Outcome {
        let requested = context.mode.unwrap_or_else(|| self.safety.default_mode());

        let errors = validate_schema(command);
        if !errors.is_empty() {
            return Outcome::failed(
                ExecutionEventType::ExecutionFailed,
                None,
                requested,
                OrchestratorFailure::SchemaInvalid { errors },
            );
        }

        let violations = self.business_violations(command, context).await;
        if !violations.is_empty() {
            return Outcome::failed(
                ExecutionEventType::ExecutionFailed,
                None,
                requested,
                OrchestratorFailure::BusinessRuleBlocked { violations },
            );
        }

        let Some(adapter) = self.registry.get(command.action_type) else {
            return Outcome::failed(
                ExecutionEventType::ExecutionFailed,
                None,
                requested,
                OrchestratorFailure::NoAdapterRegistered {
                    action_type: command.action_type,
                },
            );
        };
        let adapter_name = adapter.name().to_owned();

        let resolution = self.safety.resolve_mode(command, context.mode).await;
        if let Some(reason) = &resolution.downgrade_reason {
            info!(command_id = %command.command_id, reason = %reason, "live request downgraded to rehearsal");
        }

        if resolution.effective == ExecutionMode::Rehearsal {
            return match adapter.preflight(command) {
                Ok(()) => {
                    let mut metadata = Map::new();
                    metadata.insert("simulated".to_owned(), Value::Bool(true));
                    metadata.insert("adapter".to_owned(), Value::String(adapter_name.clone()));
                    let execution = ExecutionResult::succeeded(
                        &command.command_id,
                        Some(format!("sim-{adapter_name}-{}", command.command_id)),
                        metadata,
                    );
                    Outcome {
                        event_type: ExecutionEventType::DryRunExecuted,
                        adapter: Some(adapter_name),
                        mode: ExecutionMode::Rehearsal,
                        execution: Some(execution),
                        failure: None,
                        details: json!({ "resolution": resolution }),
                    }
                }
                Err(e) => adapter_failure(adapter_name, ExecutionMode::Rehearsal, e, None),
            };
        }

        if let Err(violation) = self.safety.check_target(command) {
            warn!(
                command_id = %command.command_id,
                tenant_id = %command.tenant_id,
                target_type = %violation.target.target_type,
                "live target blocked by allowlist"
            );
            let mut outcome = Outcome::failed(
                ExecutionEventType::SafetyBoundaryViolation,
                Some(adapter_name),
                ExecutionMode::Live,
                OrchestratorFailure::SafetyBoundaryViolation {
                    reason: violation.reason.clone(),
                },
            );
            outcome.details["target"] = json!(violation.target);
            return outcome;
        }

        match adapter.execute(command).await {
            Ok(execution) if execution.success => {
                self.consume_token(command, context).await;
                Outcome {
                    event_type: ExecutionEventType::ExecutionSucceeded,
                    adapter: Some(adapter_name),
                    mode: ExecutionMode::Live,
                    details: json!({
                        "externalId": execution.external_id,
                        "idempotent": execution.flag("idempotent"),
                    }),
                    execution: Some(execution),
                    failure: None,
                }
            }
            Ok(execution) => {
                let message = execution
                    .error
                    .clone()
                    .unwrap_or_else(|| "adapter reported failure".to_owned());
                let mut outcome = Outcome::failed(
                    ExecutionEventType::ExecutionFailed,
                    Some(adapter_name),
                    ExecutionMode::Live,
                    OrchestratorFailure::AdapterExecutionError { message },
                );
                outcome.execution = Some(execution);
                outcome
            }
            Err(e) => {
                let execution = ExecutionResult::failed(&command.command_id, e.to_string());
                adapter_failure(adapter_name, ExecutionMode::Live, e, Some(execution))
            }
        }
    }

    /// Every business rule the command violates.
    async fn business_violations(
        &self,
        command: &ExecutionCommand,
        context: &ExecutionContext,
    ) -> Vec<String> {
        let mut violations = Vec::new();

        if context.billing_status.blocks_execution() {
            violations.push(format!(
                "billing status {} blocks execution",
                context.billing_status
            ));
        }

        if !context.capabilities.contains(&command.action_type) {
            violations.push(format!("capability not granted: {}", command.action_type));
        }

        if let Some(state) = context.lead_state {
            if self.state_machine.is_terminal_state(state) {
                violations.push(format!("lead is in terminal state {state}"));
            }
        }

        if let Some(attempt) = &context.transition {
            if let Some(state) = context.lead_state {
                if attempt.from != state {
                    violations.push(format!(
                        "transition starts from {} but lead is in {state}",
                        attempt.from
                    ));
                }
            }
            let validation = self.state_machine.validate_transition(attempt);
            if let Some(rejection) = validation.rejection {
                violations.push(rejection.to_string());
            }
        }

        if let Some(tokens) = &self.tokens {
            if action_requires_token(command.action_type) {
                match &context.token_id {
                    None => violations.push(format!(
                        "execution token required for {}",
                        command.action_type
                    )),
                    Some(token_id) => {
                        let scope = TokenScope::for_action(command.action_type)
                            .with_tenant(command.tenant_id.clone());
                        match tokens.verify_token(token_id, &scope).await {
                            Ok(verification) if verification.can_use => {
                                debug!(token = token_prefix(token_id), "execution token verified");
                            }
                            Ok(verification) => {
                                // A retry of the command that spent this token
                                // is answered by the adapter's idempotency store.
                                match tokens
                                    .consumed_by(token_id, &command.command_id, &scope)
                                    .await
                                {
                                    Ok(true) => debug!(
                                        command_id = %command.command_id,
                                        token = token_prefix(token_id),
                                        "token already spent by this command; replaying"
                                    ),
                                    Ok(false) => violations.push(format!(
                                        "execution token rejected: {}",
                                        verification
                                            .reason()
                                            .unwrap_or_else(|| "unusable".to_owned())
                                    )),
                                    Err(e) => violations
                                        .push(format!("execution token check failed: {e}")),
                                }
                            }
                            Err(e) => {
                                violations.push(format!("execution token check failed: {e}"));
                            }
                        }
                    }
                }
            }
        }

        violations
    }

    async fn consume_token(&self, command: &ExecutionCommand, context: &ExecutionContext) {
        let (Some(tokens), Some(token_id)) = (&self.tokens, &context.token_id) else {
            return;
        };
        if !action_requires_token(command.action_type) {
            return;
        }
        if let Err(e) = tokens.mark_token_used(token_id, &command.command_id).await {
            // The side effect already happened; the result stands.
            error!(
                command_id = %command.command_id,
                token = token_prefix(token_id),
                error = %e,
                "failed to mark execution token used"
            );
        }
    }

    async fn finish(&self, command: &ExecutionCommand, outcome: Outcome) -> OrchestratorResult {
        let event = ExecutionEvent::for_command(
            outcome.event_type,
            command,
            outcome.adapter.as_deref(),
            outcome.details,
        );
        let audit_ref = event.event_id;
        self.emit(event).await;

        let success = outcome.failure.is_none();
        info!(
            command_id = %command.command_id,
            action_type = %command.action_type,
            mode = %outcome.mode,
            outcome = %outcome.event_type,
            success,
            "execution finished"
        );

        OrchestratorResult {
            success,
            command_id: command.command_id.clone(),
            action_type: command.action_type,
            adapter_used: outcome.adapter.unwrap_or_else(|| NO_ADAPTER.to_owned()),
            mode: outcome.mode,
            correlation_id: command.correlation_id.clone(),
            timestamp: Utc::now(),
            audit_ref,
            execution: outcome.execution,
            failure: outcome.failure,
        }
    }

    async fn emit(&self, event: ExecutionEvent) {
        if let Err(e) = self.publisher.publish(&event).await {
            warn!(
                event_type = %event.event_type,
                command_id = %event.command_id,
                error = %e,
                "failed to publish execution event"
            );
        }
    }
}

fn adapter_failure(
    adapter: String,
    mode: ExecutionMode,
    err: AdapterError,
    execution: Option<ExecutionResult>,
) -> Outcome {
    let mut outcome = match err {
        AdapterError::BoundaryViolation(report) => Outcome::failed(
            ExecutionEventType::AdapterBoundaryViolation,
            Some(adapter),
            mode,
            OrchestratorFailure::AdapterBoundaryViolation { report },
        ),
        other => Outcome::failed(
            ExecutionEventType::ExecutionFailed,
            Some(adapter),
            mode,
            OrchestratorFailure::AdapterExecutionError {
                message: other.to_string(),
            },
        ),
    };
    outcome.execution = execution;
    outcome
}

/// Every structural problem with a command.
pub fn validate_schema(command: &ExecutionCommand) -> Vec<String> {
    let mut errors = Vec::new();
    for (field, value) in [
        ("commandId", &command.command_id),
        ("tenantId", &command.tenant_id),
        ("leadId", &command.lead_id),
        ("correlationId", &command.correlation_id),
    ] {
        if value.trim().is_empty() {
            errors.push(format!("{field} must not be empty"));
        }
    }
    if !command.payload.is_object() {
        errors.push("payload must be a JSON object".to_owned());
    }
    match serde_json::to_vec(&command.payload) {
        Ok(bytes) if bytes.len() > MAX_PAYLOAD_BYTES => errors.push(format!(
            "payload is {} bytes, limit is {MAX_PAYLOAD_BYTES}",
            bytes.len()
        )),
        Ok(_) => {}
        Err(e) => errors.push(format!("payload is not serializable: {e}")),
    }
    errors
}
