//! Rehearsal/live safety controls.
//!
//! Three layers, checked in order for every live request:
//! 1. the process-wide [`KillSwitch`], which forces rehearsal,
//! 2. a pluggable [`SafetyGuard`], which may downgrade to rehearsal,
//! 3. the [`ProviderAllowlist`], which blocks live sends to unlisted targets.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{AllowlistConfig, SafetyConfig};
use crate::types::{Channel, ExecutionCommand, ExecutionMode};

// ---------------------------------------------------------------------------
// Kill switch
// ---------------------------------------------------------------------------

/// Global override that forces every command into rehearsal.
#[derive(Debug, Default)]
pub struct KillSwitch {
    engaged: AtomicBool,
}

impl KillSwitch {
    /// Create a switch in the given position.
    pub fn new(engaged: bool) -> Self {
        Self {
            engaged: AtomicBool::new(engaged),
        }
    }

    /// Force rehearsal for all subsequent commands.
    pub fn engage(&self) {
        self.engaged.store(true, Ordering::SeqCst);
        warn!("kill switch engaged: live execution disabled");
    }

    /// Allow live execution again.
    pub fn release(&self) {
        self.engaged.store(false, Ordering::SeqCst);
        info!("kill switch released");
    }

    /// Whether the switch is engaged.
    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Verdict of a [`SafetyGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Live execution may proceed.
    Permit,
    /// Run as rehearsal instead, for this reason.
    Deny(String),
}

/// Decides whether a command may run live.
#[async_trait]
pub trait SafetyGuard: Send + Sync {
    /// Inspect a command that asked for live mode.
    async fn check_live(&self, command: &ExecutionCommand) -> GuardDecision;
}

/// Permits live execution only for tenants on a list. `*` admits everyone.
#[derive(Debug, Clone, Default)]
pub struct TenantLiveGuard {
    tenants: HashSet<String>,
}

impl TenantLiveGuard {
    /// Guard admitting the listed tenants.
    pub fn new<I, S>(tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tenants: tenants.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl SafetyGuard for TenantLiveGuard {
    async fn check_live(&self, command: &ExecutionCommand) -> GuardDecision {
        if self.tenants.contains("*") || self.tenants.contains(&command.tenant_id) {
            GuardDecision::Permit
        } else {
            GuardDecision::Deny(format!(
                "tenant {} is not enabled for live execution",
                command.tenant_id
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Allowlist
// ---------------------------------------------------------------------------

/// Kind of live target a channel addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    /// E.164 phone number (SMS, voice).
    PhoneNumber,
    /// Email address.
    Email,
    /// Calendar identifier.
    CalendarId,
    /// CRM location (sub-account) identifier.
    CrmLocationId,
}

impl TargetType {
    /// Target type addressed by `channel`.
    pub fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Sms | Channel::Voice => Self::PhoneNumber,
            Channel::Email => Self::Email,
            Channel::Calendar => Self::CalendarId,
            Channel::Crm => Self::CrmLocationId,
        }
    }

    /// Payload field holding the target.
    pub fn payload_field(&self) -> &'static str {
        match self {
            Self::PhoneNumber | Self::Email => "to",
            Self::CalendarId => "calendarId",
            Self::CrmLocationId => "locationId",
        }
    }

    fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match self {
            Self::PhoneNumber => trimmed
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '+')
                .collect(),
            Self::Email => trimmed.to_ascii_lowercase(),
            Self::CalendarId | Self::CrmLocationId => trimmed.to_owned(),
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::PhoneNumber => "phone number",
            Self::Email => "email",
            Self::CalendarId => "calendar id",
            Self::CrmLocationId => "CRM location id",
        })
    }
}

/// The live target a command addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Kind of target.
    pub target_type: TargetType,
    /// Raw value from the payload, if present.
    pub value: Option<String>,
}

/// Pull the live target out of a command's payload.
pub fn extract_target(command: &ExecutionCommand) -> Target {
    let target_type = TargetType::for_channel(command.action_type.channel());
    Target {
        target_type,
        value: command
            .payload_str(target_type.payload_field())
            .map(str::to_owned),
    }
}

/// Per-type sets of targets live execution may touch.
#[derive(Debug, Clone, Default)]
pub struct ProviderAllowlist {
    phone_numbers: HashSet<String>,
    emails: HashSet<String>,
    calendar_ids: HashSet<String>,
    crm_location_ids: HashSet<String>,
}

impl ProviderAllowlist {
    /// Empty allowlist: blocks every live target.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allowlist from a `[safety.allowlist]` section.
    pub fn from_config(config: &AllowlistConfig) -> Self {
        let mut list = Self::new();
        for (target_type, values) in [
            (TargetType::PhoneNumber, &config.phone_numbers),
            (TargetType::Email, &config.emails),
            (TargetType::CalendarId, &config.calendar_ids),
            (TargetType::CrmLocationId, &config.crm_location_ids),
        ] {
            for value in values {
                list.allow(target_type, value);
            }
        }
        list
    }

    /// Admit one target.
    pub fn allow(&mut self, target_type: TargetType, value: &str) {
        let normalized = target_type.normalize(value);
        if !normalized.is_empty() {
            self.set_mut(target_type).insert(normalized);
        }
    }

    /// Builder form of [`ProviderAllowlist::allow`].
    pub fn with(mut self, target_type: TargetType, value: &str) -> Self {
        self.allow(target_type, value);
        self
    }

    /// Whether `value` is admitted for `target_type`.
    pub fn is_allowed(&self, target_type: TargetType, value: &str) -> bool {
        self.set(target_type).contains(&target_type.normalize(value))
    }

    /// Number of admitted targets of one type.
    pub fn len(&self, target_type: TargetType) -> usize {
        self.set(target_type).len()
    }

    fn set(&self, target_type: TargetType) -> &HashSet<String> {
        match target_type {
            TargetType::PhoneNumber => &self.phone_numbers,
            TargetType::Email => &self.emails,
            TargetType::CalendarId => &self.calendar_ids,
            TargetType::CrmLocationId => &self.crm_location_ids,
        }
    }

    fn set_mut(&mut self, target_type: TargetType) -> &mut HashSet<String> {
        match target_type {
            TargetType::PhoneNumber => &mut self.phone_numbers,
            TargetType::Email => &mut self.emails,
            TargetType::CalendarId => &mut self.calendar_ids,
            TargetType::CrmLocationId => &mut self.crm_location_ids,
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Outcome of mode resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeResolution {
    /// Mode the caller asked for (or the default).
    pub requested: ExecutionMode,
    /// Mode the command will run in.
    pub effective: ExecutionMode,
    /// Why live was downgraded, if it was.
    pub downgrade_reason: Option<String>,
}

/// A live target outside the allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{reason}")]
pub struct SafetyViolation {
    /// The offending (or missing) target.
    pub target: Target,
    /// Human-readable reason.
    pub reason: String,
}

/// Kill switch, guard, and allowlist bundled for the orchestrator.
#[derive(Clone)]
pub struct SafetyGate {
    kill_switch: Arc<KillSwitch>,
    guard: Arc<dyn SafetyGuard>,
    allowlist: ProviderAllowlist,
    default_mode: ExecutionMode,
}

impl std::fmt::Debug for SafetyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyGate")
            .field("kill_switch", &self.kill_switch)
            .field("allowlist", &self.allowlist)
            .field("default_mode", &self.default_mode)
            .finish_non_exhaustive()
    }
}

impl Default for SafetyGate {
    /// Rehearsal by default, no tenants enabled for live, empty allowlist.
    fn default() -> Self {
        Self::new(
            Arc::new(KillSwitch::default()),
            Arc::new(TenantLiveGuard::default()),
            ProviderAllowlist::new(),
        )
    }
}

impl SafetyGate {
    /// Gate with rehearsal as the default mode.
    pub fn new(
        kill_switch: Arc<KillSwitch>,
        guard: Arc<dyn SafetyGuard>,
        allowlist: ProviderAllowlist,
    ) -> Self {
        Self {
            kill_switch,
            guard,
            allowlist,
            default_mode: ExecutionMode::Rehearsal,
        }
    }

    /// Gate built from a `[safety]` section.
    pub fn from_config(config: &SafetyConfig) -> Self {
        Self::new(
            Arc::new(KillSwitch::new(config.kill_switch)),
            Arc::new(TenantLiveGuard::new(config.live_tenants.iter().cloned())),
            ProviderAllowlist::from_config(&config.allowlist),
        )
        .with_default_mode(config.default_mode)
    }

    /// Mode used when the caller does not ask for one.
    pub fn with_default_mode(mut self, mode: ExecutionMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Mode used when the caller does not ask for one.
    pub fn default_mode(&self) -> ExecutionMode {
        self.default_mode
    }

    /// Shared kill switch handle.
    pub fn kill_switch(&self) -> Arc<KillSwitch> {
        Arc::clone(&self.kill_switch)
    }

    /// Decide the effective mode for a command.
    pub async fn resolve_mode(
        &self,
        command: &ExecutionCommand,
        requested: Option<ExecutionMode>,
    ) -> ModeResolution {
        let requested = requested.unwrap_or(self.default_mode);
        let downgrade = |reason: String| ModeResolution {
            requested,
            effective: ExecutionMode::Rehearsal,
            downgrade_reason: Some(reason),
        };

        if requested == ExecutionMode::Rehearsal {
            return ModeResolution {
                requested,
                effective: ExecutionMode::Rehearsal,
                downgrade_reason: None,
            };
        }
        if self.kill_switch.is_engaged() {
            return downgrade("kill switch engaged".to_owned());
        }
        match self.guard.check_live(command).await {
            GuardDecision::Permit => ModeResolution {
                requested,
                effective: ExecutionMode::Live,
                downgrade_reason: None,
            },
            GuardDecision::Deny(reason) => downgrade(reason),
        }
    }

    /// Check a live command's target against the allowlist.
    ///
    /// # Errors
    ///
    /// [`SafetyViolation`] if the target is missing or not listed.
    pub fn check_target(&self, command: &ExecutionCommand) -> Result<Target, SafetyViolation> {
        let target = extract_target(command);
        let Some(value) = target.value.as_deref() else {
            return Err(SafetyViolation {
                reason: format!(
                    "live {} requires a {} in payload field {:?}",
                    command.action_type,
                    target.target_type,
                    target.target_type.payload_field()
                ),
                target,
            });
        };
        if self.allowlist.is_allowed(target.target_type, value) {
            Ok(target)
        } else {
            Err(SafetyViolation {
                reason: format!("{} is not on the live allowlist", target.target_type),
                target,
            })
        }
    }
}
