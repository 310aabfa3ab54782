//! JSON-over-HTTP provider client.
//!
//! Every operation is a `POST {base_url}/{operation}` with the request body
//! as JSON, an `Idempotency-Key` header, and bearer auth when a key is
//! configured. The response must be a JSON object with an `id`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{
    check_http_response, parse_response, ProviderClient, ProviderError, ProviderRequest,
    ProviderResponse,
};
use crate::config::ProviderConfig;

/// Header carrying the command id so the provider can dedupe retries.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Generic HTTP provider.
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    name: String,
    base_url: Url,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpProviderClient {
    /// Create a client rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unavailable`] if the URL is invalid, or
    /// [`ProviderError::Request`] if the HTTP client cannot be built.
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let name = name.into();
        // A trailing slash makes `join` append instead of replacing the last segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_owned()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized).map_err(|e| {
            ProviderError::Unavailable(format!("invalid base_url for provider {name}: {e}"))
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name,
            base_url,
            api_key,
            client,
        })
    }

    /// Build a client from a `[providers.<name>]` config section, reading
    /// the API key from the environment variable the section names.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unavailable`] if a key variable is named but
    /// unset, or if the URL is invalid.
    pub fn from_config(
        name: &str,
        config: &ProviderConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ProviderError> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(env(var).ok_or_else(|| {
                ProviderError::Unavailable(format!("provider {name}: {var} is not set"))
            })?),
            None => None,
        };
        Self::new(
            name,
            &config.base_url,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Base URL every operation is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = self
            .base_url
            .join(request.operation.trim_start_matches('/'))
            .map_err(|e| ProviderError::Unavailable(format!("invalid operation path: {e}")))?;

        debug!(
            provider = %self.name,
            operation = %request.operation,
            tenant_id = %request.tenant_id,
            "provider call"
        );

        let mut builder = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.json(&request.body).send().await?;
        let payload = check_http_response(response).await?;
        parse_response(&payload)
    }
}
