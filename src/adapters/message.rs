//! Text message and email delivery.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::contract::{copy_optional, require_email, require_phone, require_str};
use super::{Adapter, AdapterCapabilities, AdapterContract, AdapterError};
use crate::providers::{ProviderClient, ProviderRequest};
use crate::types::{ActionType, ExecutionCommand, ExecutionResult};

/// Adapter name.
pub const NAME: &str = "message";

/// Sends SMS through one provider and email through another.
pub struct MessageAdapter {
    caps: AdapterCapabilities,
    contract: AdapterContract,
    sms: Arc<dyn ProviderClient>,
    email: Arc<dyn ProviderClient>,
}

impl std::fmt::Debug for MessageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageAdapter")
            .field("caps", &self.caps)
            .field("sms", &self.sms.name())
            .field("email", &self.email.name())
            .finish_non_exhaustive()
    }
}

impl MessageAdapter {
    /// Create the adapter over an SMS provider and an email provider.
    pub fn new(
        contract: AdapterContract,
        sms: Arc<dyn ProviderClient>,
        email: Arc<dyn ProviderClient>,
    ) -> Self {
        Self {
            caps: AdapterCapabilities::new(
                NAME,
                env!("CARGO_PKG_VERSION"),
                &[ActionType::SendMessage, ActionType::SendEmail],
            ),
            contract,
            sms,
            email,
        }
    }

    fn validate(command: &ExecutionCommand) -> Result<(), AdapterError> {
        match command.action_type {
            ActionType::SendEmail => {
                require_email(command, "to")?;
                require_str(command, "subject")?;
                require_str(command, "body")?;
            }
            _ => {
                require_phone(command, "to")?;
                require_str(command, "body")?;
            }
        }
        Ok(())
    }

    fn build_request(command: &ExecutionCommand) -> Result<ProviderRequest, AdapterError> {
        let mut body = Map::new();
        body.insert("to".to_owned(), Value::from(require_str(command, "to")?));
        body.insert("body".to_owned(), Value::from(require_str(command, "body")?));
        let operation = if command.action_type == ActionType::SendEmail {
            body.insert(
                "subject".to_owned(),
                Value::from(require_str(command, "subject")?),
            );
            copy_optional(command, &mut body, &["from", "replyTo", "cc"]);
            "emails"
        } else {
            copy_optional(command, &mut body, &["from", "mediaUrl"]);
            "messages"
        };
        Ok(ProviderRequest {
            operation: operation.to_owned(),
            idempotency_key: command.command_id.clone(),
            tenant_id: command.tenant_id.clone(),
            body: Value::Object(body),
        })
    }
}

#[async_trait]
impl Adapter for MessageAdapter {
    fn capabilities(&self) -> &AdapterCapabilities {
        &self.caps
    }

    fn preflight(&self, command: &ExecutionCommand) -> Result<(), AdapterError> {
        self.contract.preflight(&self.caps, command, Self::validate)
    }

    async fn execute(&self, command: &ExecutionCommand) -> Result<ExecutionResult, AdapterError> {
        let provider = if command.action_type == ActionType::SendEmail {
            &self.email
        } else {
            &self.sms
        };
        self.contract
            .execute(&self.caps, command, Self::validate, || async move {
                let request = Self::build_request(command)?;
                Ok(provider.call(request).await?)
            })
            .await
    }
}
