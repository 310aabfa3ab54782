//! Lead lifecycle state machine.
//!
//! A pure, table-driven validator: given a transition attempt it answers
//! whether the move is on the allow-list, whether the actor may make it,
//! and whether the caller supplied every input the transition requires.
//! The tables live in [`table`] as `const` data so validation is
//! deterministic and side-effect free.

pub mod table;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{closed_enum_strings, ActorType};

/// Position of a lead in the sales pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadState {
    /// Freshly ingested, untouched.
    New,
    /// Outreach in progress, no reply yet.
    ContactAttempting,
    /// The lead has responded.
    Contacted,
    /// Fit confirmed by a human.
    Qualified,
    /// Not a fit.
    Unqualified,
    /// A slot has been proposed, awaiting confirmation.
    BookingPending,
    /// Meeting confirmed on the calendar.
    Booked,
    /// The lead missed the meeting.
    NoShow,
    /// Consultation took place.
    ConsultCompleted,
    /// Deal won.
    ClosedWon,
    /// Deal lost after consultation.
    ClosedLost,
    /// Lead dropped before consultation.
    Lost,
    /// Lead opted out; no further outreach allowed.
    DoNotContact,
}

impl LeadState {
    /// Every lead state.
    pub const ALL: [LeadState; 13] = [
        Self::New,
        Self::ContactAttempting,
        Self::Contacted,
        Self::Qualified,
        Self::Unqualified,
        Self::BookingPending,
        Self::Booked,
        Self::NoShow,
        Self::ConsultCompleted,
        Self::ClosedWon,
        Self::ClosedLost,
        Self::Lost,
        Self::DoNotContact,
    ];
}

closed_enum_strings!(LeadState, "lead state", {
    New => "NEW",
    ContactAttempting => "CONTACT_ATTEMPTING",
    Contacted => "CONTACTED",
    Qualified => "QUALIFIED",
    Unqualified => "UNQUALIFIED",
    BookingPending => "BOOKING_PENDING",
    Booked => "BOOKED",
    NoShow => "NO_SHOW",
    ConsultCompleted => "CONSULT_COMPLETED",
    ClosedWon => "CLOSED_WON",
    ClosedLost => "CLOSED_LOST",
    Lost => "LOST",
    DoNotContact => "DO_NOT_CONTACT",
});

/// Who must perform a transition and which inputs it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequirement {
    /// Source state.
    pub from: LeadState,
    /// Target state.
    pub to: LeadState,
    /// The only actor type allowed to perform the transition.
    pub actor: ActorType,
    /// Input field names that must be present and non-null.
    pub required_inputs: &'static [&'static str],
}

/// A request to move a lead from one state to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionAttempt {
    /// Current state.
    pub from: LeadState,
    /// Desired state.
    pub to: LeadState,
    /// Who is asking.
    pub actor: ActorType,
    /// Inputs supplied with the attempt.
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

impl TransitionAttempt {
    /// Build an attempt with no inputs.
    pub fn new(from: LeadState, to: LeadState, actor: ActorType) -> Self {
        Self {
            from,
            to,
            actor,
            inputs: Map::new(),
        }
    }

    /// Add one input value.
    pub fn with_input(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.to_owned(), value.into());
        self
    }
}

/// First reason a transition attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionRejection {
    /// The pair is not on the allow-list.
    #[error("transition not allowed: {from} -> {to}")]
    NotAllowed {
        /// Source state.
        from: LeadState,
        /// Target state.
        to: LeadState,
    },
    /// The pair is reserved for the SYSTEM actor.
    #[error("system-only violation: {from} -> {to} cannot be performed by {actor}")]
    SystemOnly {
        /// Source state.
        from: LeadState,
        /// Target state.
        to: LeadState,
        /// The actor that attempted it.
        actor: ActorType,
    },
    /// The table allows the pair but has no requirement record for it.
    #[error("configuration error: no transition requirement for {from} -> {to}")]
    MissingRequirement {
        /// Source state.
        from: LeadState,
        /// Target state.
        to: LeadState,
    },
    /// Required inputs were absent or null.
    #[error("missing inputs: {}", fields.join(", "))]
    MissingInputs {
        /// Every missing field, in requirement order.
        fields: Vec<String>,
    },
    /// The actor differs from the one the requirement names.
    #[error("actor mismatch: requires {required}, got {actual}")]
    ActorMismatch {
        /// Actor the requirement names.
        required: ActorType,
        /// Actor that attempted the transition.
        actual: ActorType,
    },
}

/// Outcome of [`LeadStateMachine::validate_transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionValidation {
    /// Whether the attempt may proceed.
    pub valid: bool,
    /// The matched requirement, present only on success.
    pub requirement: Option<TransitionRequirement>,
    /// The first failing check, present only on failure.
    pub rejection: Option<TransitionRejection>,
}

impl TransitionValidation {
    fn accept(requirement: TransitionRequirement) -> Self {
        Self {
            valid: true,
            requirement: Some(requirement),
            rejection: None,
        }
    }

    fn reject(rejection: TransitionRejection) -> Self {
        Self {
            valid: false,
            requirement: None,
            rejection: Some(rejection),
        }
    }
}

/// Table-driven validator for lead transitions.
///
/// Holds only `'static` table references, so it is `Copy` and cheap to
/// share between threads.
#[derive(Debug, Clone, Copy)]
pub struct LeadStateMachine {
    allowed: &'static [(LeadState, LeadState)],
    system_only: &'static [(LeadState, LeadState)],
    requirements: &'static [TransitionRequirement],
}

impl Default for LeadStateMachine {
    fn default() -> Self {
        Self::standard()
    }
}

impl LeadStateMachine {
    /// The production transition table.
    pub fn standard() -> Self {
        Self::with_tables(
            table::ALLOWED_TRANSITIONS,
            table::SYSTEM_ONLY_TRANSITIONS,
            table::TRANSITION_REQUIREMENTS,
        )
    }

    /// A machine over custom tables.
    pub fn with_tables(
        allowed: &'static [(LeadState, LeadState)],
        system_only: &'static [(LeadState, LeadState)],
        requirements: &'static [TransitionRequirement],
    ) -> Self {
        Self {
            allowed,
            system_only,
            requirements,
        }
    }

    /// Validate an attempt. Checks run in a fixed order and the first
    /// failure is reported.
    pub fn validate_transition(&self, attempt: &TransitionAttempt) -> TransitionValidation {
        let (from, to) = (attempt.from, attempt.to);

        if !self.is_allowed(from, to) {
            return TransitionValidation::reject(TransitionRejection::NotAllowed { from, to });
        }

        if self.is_system_only(from, to) && attempt.actor != ActorType::System {
            return TransitionValidation::reject(TransitionRejection::SystemOnly {
                from,
                to,
                actor: attempt.actor,
            });
        }

        let Some(requirement) = self.requirement(from, to) else {
            return TransitionValidation::reject(TransitionRejection::MissingRequirement {
                from,
                to,
            });
        };

        let missing: Vec<String> = requirement
            .required_inputs
            .iter()
            .filter(|field| attempt.inputs.get(**field).map_or(true, Value::is_null))
            .map(|field| (*field).to_owned())
            .collect();
        if !missing.is_empty() {
            return TransitionValidation::reject(TransitionRejection::MissingInputs {
                fields: missing,
            });
        }

        if attempt.actor != requirement.actor {
            return TransitionValidation::reject(TransitionRejection::ActorMismatch {
                required: requirement.actor,
                actual: attempt.actor,
            });
        }

        TransitionValidation::accept(requirement)
    }

    /// States reachable from `from` in one step.
    pub fn next_states(&self, from: LeadState) -> Vec<LeadState> {
        self.allowed
            .iter()
            .filter(|(f, _)| *f == from)
            .map(|(_, t)| *t)
            .collect()
    }

    /// True iff `state` has no outgoing transitions.
    pub fn is_terminal_state(&self, state: LeadState) -> bool {
        !self.allowed.iter().any(|(f, _)| *f == state)
    }

    /// Whether `actor` may perform `from -> to`, ignoring inputs.
    pub fn can_actor_perform_transition(
        &self,
        from: LeadState,
        to: LeadState,
        actor: ActorType,
    ) -> bool {
        if !self.is_allowed(from, to) {
            return false;
        }
        if self.is_system_only(from, to) && actor != ActorType::System {
            return false;
        }
        self.requirement(from, to)
            .is_some_and(|req| req.actor == actor)
    }

    /// Requirement record for a pair, if one exists.
    pub fn requirement(&self, from: LeadState, to: LeadState) -> Option<TransitionRequirement> {
        self.requirements
            .iter()
            .find(|r| r.from == from && r.to == to)
            .copied()
    }

    /// Whether the pair is on the allow-list.
    pub fn is_allowed(&self, from: LeadState, to: LeadState) -> bool {
        self.allowed.contains(&(from, to))
    }

    /// Whether the pair is reserved for the SYSTEM actor.
    pub fn is_system_only(&self, from: LeadState, to: LeadState) -> bool {
        self.system_only.contains(&(from, to))
    }

    /// Check the tables for internal consistency.
    ///
    /// Every allowed pair must have exactly one requirement, every
    /// requirement must describe an allowed pair, and SYSTEM-only pairs
    /// must be allowed pairs whose requirement names SYSTEM.
    ///
    /// # Errors
    ///
    /// Returns every inconsistency found.
    pub fn validate_table(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        for &(from, to) in self.allowed {
            let count = self
                .requirements
                .iter()
                .filter(|r| r.from == from && r.to == to)
                .count();
            if count != 1 {
                problems.push(format!(
                    "{from} -> {to} has {count} requirement records, expected 1"
                ));
            }
        }

        for req in self.requirements {
            if !self.is_allowed(req.from, req.to) {
                problems.push(format!(
                    "requirement for {} -> {} describes a transition that is not allowed",
                    req.from, req.to
                ));
            }
        }

        for &(from, to) in self.system_only {
            if !self.is_allowed(from, to) {
                problems.push(format!("system-only pair {from} -> {to} is not allowed"));
            }
            if let Some(req) = self.requirement(from, to) {
                if req.actor != ActorType::System {
                    problems.push(format!(
                        "system-only pair {from} -> {to} requires {} instead of SYSTEM",
                        req.actor
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
