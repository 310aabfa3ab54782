//! Action-type routing table for adapters.
//!
//! Populated once at startup, then shared read-only behind an `Arc`. Each
//! action type maps to exactly one adapter; a second adapter claiming an
//! already routed action type is refused.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::{Adapter, AdapterCapabilities};
use crate::types::ActionType;

/// Registration failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Another adapter already handles this action type.
    #[error("{action} is already handled by adapter {existing}; refusing {incoming}")]
    Conflict {
        /// Contested action type.
        action: ActionType,
        /// Adapter that registered first.
        existing: String,
        /// Adapter that tried to register.
        incoming: String,
    },
    /// The adapter declares no action types.
    #[error("adapter {0} declares no action types")]
    EmptyCapabilities(String),
}

/// Maps action types to the adapter that executes them.
#[derive(Default)]
pub struct AdapterRegistry {
    by_action: HashMap<ActionType, Arc<dyn Adapter>>,
    adapters: Vec<Arc<dyn Adapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.adapters.iter().map(|a| a.name()).collect();
        f.debug_struct("AdapterRegistry")
            .field("adapters", &names)
            .finish()
    }
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for every action type it declares.
    ///
    /// All-or-nothing: on conflict nothing is registered.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Conflict`] if any declared action type is taken,
    /// [`RegistryError::EmptyCapabilities`] if none are declared.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) -> Result<(), RegistryError> {
        let caps = adapter.capabilities();
        if caps.action_types.is_empty() {
            return Err(RegistryError::EmptyCapabilities(caps.name.clone()));
        }
        for action in &caps.action_types {
            if let Some(existing) = self.by_action.get(action) {
                return Err(RegistryError::Conflict {
                    action: *action,
                    existing: existing.name().to_owned(),
                    incoming: caps.name.clone(),
                });
            }
        }

        for action in &caps.action_types {
            self.by_action.insert(*action, Arc::clone(&adapter));
        }
        info!(
            adapter = %caps.name,
            version = %caps.version,
            actions = ?caps.action_types,
            "adapter registered"
        );
        self.adapters.push(adapter);
        Ok(())
    }

    /// Adapter for `action`, if one is registered.
    pub fn get(&self, action: ActionType) -> Option<Arc<dyn Adapter>> {
        self.by_action.get(&action).cloned()
    }

    /// Whether any adapter handles `action`.
    pub fn is_action_supported(&self, action: ActionType) -> bool {
        self.by_action.contains_key(&action)
    }

    /// Capabilities of every registered adapter, in registration order.
    pub fn registered_adapters(&self) -> Vec<AdapterCapabilities> {
        self.adapters
            .iter()
            .map(|a| a.capabilities().clone())
            .collect()
    }

    /// Action types with no adapter.
    pub fn unsupported_actions(&self) -> Vec<ActionType> {
        ActionType::ALL
            .iter()
            .copied()
            .filter(|a| !self.is_action_supported(*a))
            .collect()
    }
}
