//! CRM contact record updates.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::contract::require_identifier;
use super::{Adapter, AdapterCapabilities, AdapterContract, AdapterError};
use crate::providers::{ProviderClient, ProviderRequest};
use crate::types::{ActionType, ExecutionCommand, ExecutionResult};

/// Adapter name.
pub const NAME: &str = "crm";

/// Writes literal field values onto a CRM contact.
pub struct CrmAdapter {
    caps: AdapterCapabilities,
    contract: AdapterContract,
    provider: Arc<dyn ProviderClient>,
}

impl std::fmt::Debug for CrmAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrmAdapter")
            .field("caps", &self.caps)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl CrmAdapter {
    /// Create the adapter over a CRM provider.
    pub fn new(contract: AdapterContract, provider: Arc<dyn ProviderClient>) -> Self {
        Self {
            caps: AdapterCapabilities::new(
                NAME,
                env!("CARGO_PKG_VERSION"),
                &[ActionType::UpdateCrmRecord],
            ),
            contract,
            provider,
        }
    }

    fn fields(command: &ExecutionCommand) -> Result<&Map<String, Value>, AdapterError> {
        command
            .payload
            .get("fields")
            .and_then(Value::as_object)
            .filter(|fields| !fields.is_empty())
            .ok_or_else(|| {
                AdapterError::InvalidCommand("fields must be a non-empty object".to_owned())
            })
    }

    fn validate(command: &ExecutionCommand) -> Result<(), AdapterError> {
        require_identifier(command, "locationId")?;
        require_identifier(command, "contactId")?;
        Self::fields(command)?;
        Ok(())
    }
}

#[async_trait]
impl Adapter for CrmAdapter {
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
                let location_id = require_identifier(command, "locationId")?;
                let contact_id = require_identifier(command, "contactId")?;
                let mut body = Map::new();
                body.insert(
                    "fields".to_owned(),
                    Value::Object(Self::fields(command)?.clone()),
                );
                let request = ProviderRequest {
                    operation: format!("locations/{location_id}/contacts/{contact_id}"),
                    idempotency_key: command.command_id.clone(),
                    tenant_id: command.tenant_id.clone(),
                    body: Value::Object(body),
                };
                Ok(provider.call(request).await?)
            })
            .await
    }
}
