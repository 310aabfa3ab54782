//! Protocol adapters: stateless executors for one channel family each.
//!
//! An adapter turns a validated [`ExecutionCommand`] into exactly one
//! provider call and normalizes the answer into an [`ExecutionResult`].
//! It must not read lead state, evaluate conditions, or choose between
//! alternative actions; the shared [`contract::AdapterContract`] enforces
//! that with a boundary scan before anything else runs.
//!
//! Four adapters ship:
//! - [`message::MessageAdapter`]: `SEND_MESSAGE`, `SEND_EMAIL`
//! - [`voice::VoiceAdapter`]: `MAKE_CALL`
//! - [`calendar::CalendarAdapter`]: `BOOK_MEETING`, `CANCEL_MEETING`, `CHECK_AVAILABILITY`
//! - [`crm::CrmAdapter`]: `UPDATE_CRM_RECORD`

use async_trait::async_trait;
use serde::Serialize;

use crate::providers::ProviderError;
use crate::storage::RepositoryError;
use crate::types::{ActionType, ExecutionCommand, ExecutionResult};

pub mod boundary;
pub mod calendar;
pub mod contract;
pub mod crm;
pub mod message;
pub mod registry;
pub mod voice;

pub use self::boundary::{BoundaryReport, BoundaryScanner, KeywordBoundaryScanner};
pub use self::contract::AdapterContract;
pub use self::registry::{AdapterRegistry, RegistryError};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// What an adapter declares about itself at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterCapabilities {
    /// Unique adapter name (`message`, `voice`, ...).
    pub name: String,
    /// Adapter version, reported in result metadata.
    pub version: String,
    /// Action types this adapter executes.
    pub action_types: Vec<ActionType>,
}

impl AdapterCapabilities {
    /// Build a capability declaration.
    pub fn new(name: &str, version: &str, action_types: &[ActionType]) -> Self {
        Self {
            name: name.to_owned(),
            version: version.to_owned(),
            action_types: action_types.to_vec(),
        }
    }

    /// Whether `action` is declared.
    pub fn supports(&self, action: ActionType) -> bool {
        self.action_types.contains(&action)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The payload asked the adapter to read state, branch, or evaluate
    /// conditions.
    #[error("adapter boundary violation: {0}")]
    BoundaryViolation(BoundaryReport),
    /// The payload is structurally invalid for this action.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    /// The adapter does not declare this action type.
    #[error("adapter {adapter} does not support {action}")]
    UnsupportedAction {
        /// Adapter name.
        adapter: String,
        /// Requested action type.
        action: ActionType,
    },
    /// The provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The dedupe store failed.
    #[error("idempotency store error: {0}")]
    Idempotency(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A stateless executor for one channel family.
///
/// `preflight` must be free of side effects; the orchestrator runs it in
/// rehearsal mode instead of `execute`.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Declared name, version, and action types.
    fn capabilities(&self) -> &AdapterCapabilities;

    /// Adapter name.
    fn name(&self) -> &str {
        &self.capabilities().name
    }

    /// Whether this adapter executes `action`.
    fn supports(&self, action: ActionType) -> bool {
        self.capabilities().supports(action)
    }

    /// Boundary scan and shape check without touching the provider.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::BoundaryViolation`] or
    /// [`AdapterError::InvalidCommand`] when the command cannot execute.
    fn preflight(&self, command: &ExecutionCommand) -> Result<(), AdapterError>;

    /// Perform the side effect. Exactly one provider call per new command id.
    ///
    /// # Errors
    ///
    /// Returns any preflight error, or a provider/idempotency failure.
    async fn execute(&self, command: &ExecutionCommand) -> Result<ExecutionResult, AdapterError>;
}
