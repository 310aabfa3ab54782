//! The production lead transition table.
//!
//! Three parallel tables: the allow-list, the SYSTEM-only subset, and one
//! requirement record per allowed pair. `LeadStateMachine::validate_table`
//! checks they stay in sync.

use super::{LeadState, TransitionRequirement};
use crate::types::ActorType;

use super::LeadState::*;

/// Every permitted `(from, to)` pair.
pub const ALLOWED_TRANSITIONS: &[(LeadState, LeadState)] = &[
    (New, ContactAttempting),
    (New, DoNotContact),
    (ContactAttempting, Contacted),
    (ContactAttempting, Lost),
    (ContactAttempting, DoNotContact),
    (Contacted, Qualified),
    (Contacted, Unqualified),
    (Contacted, DoNotContact),
    (Qualified, BookingPending),
    (Qualified, Lost),
    (BookingPending, Booked),
    (BookingPending, Qualified),
    (Booked, ConsultCompleted),
    (Booked, NoShow),
    (NoShow, BookingPending),
    (NoShow, Lost),
    (ConsultCompleted, ClosedWon),
    (ConsultCompleted, ClosedLost),
];

/// Pairs only the platform itself may perform: they record facts
/// observed by integrations, not judgements.
pub const SYSTEM_ONLY_TRANSITIONS: &[(LeadState, LeadState)] = &[
    (ContactAttempting, Lost),
    (BookingPending, Booked),
    (BookingPending, Qualified),
    (Booked, NoShow),
];

const fn req(
    from: LeadState,
    to: LeadState,
    actor: ActorType,
    required_inputs: &'static [&'static str],
) -> TransitionRequirement {
    TransitionRequirement {
        from,
        to,
        actor,
        required_inputs,
    }
}

/// One requirement per allowed pair.
pub const TRANSITION_REQUIREMENTS: &[TransitionRequirement] = &[
    req(New, ContactAttempting, ActorType::Ai, &["channel"]),
    req(New, DoNotContact, ActorType::Human, &["reason"]),
    req(
        ContactAttempting,
        Contacted,
        ActorType::Ai,
        &["channel", "contactedAt"],
    ),
    req(
        ContactAttempting,
        Lost,
        ActorType::System,
        &["reason", "attemptCount"],
    ),
    req(ContactAttempting, DoNotContact, ActorType::Human, &["reason"]),
    req(Contacted, Qualified, ActorType::Human, &["qualificationNotes"]),
    req(Contacted, Unqualified, ActorType::Human, &["reason"]),
    req(Contacted, DoNotContact, ActorType::Human, &["reason"]),
    req(Qualified, BookingPending, ActorType::Ai, &["proposedSlot"]),
    req(Qualified, Lost, ActorType::Human, &["reason"]),
    req(
        BookingPending,
        Booked,
        ActorType::System,
        &["bookingId", "scheduledAt"],
    ),
    req(BookingPending, Qualified, ActorType::System, &["reason"]),
    req(Booked, ConsultCompleted, ActorType::Human, &["consultNotes"]),
    req(Booked, NoShow, ActorType::System, &["scheduledAt"]),
    req(NoShow, BookingPending, ActorType::Ai, &["proposedSlot"]),
    req(NoShow, Lost, ActorType::Human, &["reason"]),
    req(ConsultCompleted, ClosedWon, ActorType::Human, &["dealValue"]),
    req(ConsultCompleted, ClosedLost, ActorType::Human, &["reason"]),
];
