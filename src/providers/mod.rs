//! Outbound provider abstraction.
//!
//! Adapters translate a command into exactly one [`ProviderRequest`] and
//! hand it to a [`ProviderClient`]. The client owns transport, auth, and
//! status handling; adapters never see HTTP.
//!
//! One implementation ships: [`http::HttpProviderClient`], a JSON-over-HTTP
//! client for SMS, voice, email, calendar, and CRM providers.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod http;

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// One provider operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    /// Operation path relative to the provider base URL (`messages`, `calls`, ...).
    pub operation: String,
    /// Forwarded to the provider so its own dedupe can catch retries.
    pub idempotency_key: String,
    /// Tenant on whose behalf the call is made.
    pub tenant_id: String,
    /// JSON body, built from literal command payload fields only.
    pub body: Value,
}

/// What the provider said back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    /// Provider-assigned identifier for the created resource.
    pub external_id: String,
    /// Provider status string, if reported.
    pub status: Option<String>,
    /// Full response body.
    pub body: Value,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by provider clients.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match the expected shape.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// Provider cannot satisfy the request with current configuration.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure, `ProviderError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Collapse whitespace, redact credentials, and cap length of an error body.
pub fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"(?i)bearer\s+[A-Za-z0-9._\-]{10,}",
        r"\bAC[0-9a-f]{32}\b",
        r"\bSK[0-9a-f]{32}\b",
        r"\bSG\.[A-Za-z0-9_\-]{16,}\.[A-Za-z0-9_\-]{16,}",
        r"\bpit-[A-Za-z0-9\-]{20,}",
        r"\+\d{10,15}\b",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

/// Parse a provider response body. The body must be a JSON object carrying
/// a string or numeric `id`.
///
/// # Errors
///
/// Returns [`ProviderError::Parse`] if the body is not JSON or has no id.
pub fn parse_response(raw: &str) -> Result<ProviderResponse, ProviderError> {
    let body: Value =
        serde_json::from_str(raw).map_err(|e| ProviderError::Parse(e.to_string()))?;
    let external_id = match body.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(ProviderError::Parse("response has no id".to_owned())),
    };
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_owned);
    Ok(ProviderResponse {
        external_id,
        status,
        body,
    })
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A single outbound integration.
///
/// Implementations must be `Send + Sync` so adapters can share them across
/// concurrent executions.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Short provider name used in logs and result metadata.
    fn name(&self) -> &str;

    /// Perform one operation.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport, status, or parse failure.
    async fn call(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}
