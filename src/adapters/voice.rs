//! Outbound calls.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::contract::{copy_optional, require_phone};
use super::{Adapter, AdapterCapabilities, AdapterContract, AdapterError};
use crate::providers::{ProviderClient, ProviderRequest};
use crate::types::{ActionType, ExecutionCommand, ExecutionResult};

/// Adapter name.
pub const NAME: &str = "voice";

/// Places calls through a voice provider.
pub struct VoiceAdapter {
    caps: AdapterCapabilities,
    contract: AdapterContract,
    provider: Arc<dyn ProviderClient>,
}

impl std::fmt::Debug for VoiceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceAdapter")
            .field("caps", &self.caps)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl VoiceAdapter {
    /// Create the adapter over a voice provider.
    pub fn new(contract: AdapterContract, provider: Arc<dyn ProviderClient>) -> Self {
        Self {
            caps: AdapterCapabilities::new(NAME, env!("CARGO_PKG_VERSION"), &[ActionType::MakeCall]),
            contract,
            provider,
        }
    }

    fn validate(command: &ExecutionCommand) -> Result<(), AdapterError> {
        require_phone(command, "to")?;
        if command.payload.get("from").is_some_and(|v| !v.is_null()) {
            require_phone(command, "from")?;
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for VoiceAdapter {
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
                let mut body = Map::new();
                body.insert("to".to_owned(), Value::from(require_phone(command, "to")?));
                copy_optional(command, &mut body, &["from", "script", "voicemailMessage"]);
                let request = ProviderRequest {
                    operation: "calls".to_owned(),
                    idempotency_key: command.command_id.clone(),
                    tenant_id: command.tenant_id.clone(),
                    body: Value::Object(body),
                };
                Ok(provider.call(request).await?)
            })
            .await
    }
}
