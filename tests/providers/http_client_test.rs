//! `HttpProviderClient` against a one-shot local HTTP server.

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use leadgate::config::ProviderConfig;
use leadgate::providers::http::HttpProviderClient;
use leadgate::providers::{ProviderClient, ProviderError, ProviderRequest};

/// Serve one response and hand back the raw request text.
async fn serve_once(status_line: &str, body: &str) -> (String, oneshot::Receiver<String>) {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) => panic!("listener should bind: {err}"),
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => panic!("listener should expose local addr: {err}"),
    };

    let (tx, rx) = oneshot::channel();
    let status_line_owned = status_line.to_owned();
    let body_owned = body.to_owned();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut raw = Vec::new();
            let mut buf = [0_u8; 4096];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                raw.extend_from_slice(&buf[..n]);
                if request_complete(&raw) {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {status_line_owned}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body_owned}",
                body_owned.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = tx.send(String::from_utf8_lossy(&raw).into_owned());
        }
    });

    (format!("http://{addr}/v1"), rx)
}

fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    text.len() >= header_end + 4 + content_length
}

fn request() -> ProviderRequest {
    ProviderRequest {
        operation: "messages".to_owned(),
        idempotency_key: "cmd-42".to_owned(),
        tenant_id: "tenant-1".to_owned(),
        body: json!({"to": "+15551234567", "body": "See you Tuesday."}),
    }
}

#[tokio::test]
async fn posts_json_with_idempotency_key_and_bearer_auth() {
    let (base_url, captured) = serve_once("201 Created", r#"{"id":"SM-1","status":"queued"}"#).await;
    let config = ProviderConfig {
        base_url,
        api_key_env: Some("LEADGATE_SMS_KEY".to_owned()),
        timeout_secs: 5,
    };
    let client = match HttpProviderClient::from_config("sms", &config, |key| {
        (key == "LEADGATE_SMS_KEY").then(|| "test-key-123".to_owned())
    }) {
        Ok(client) => client,
        Err(err) => panic!("client should build: {err}"),
    };

    let response = match client.call(request()).await {
        Ok(response) => response,
        Err(err) => panic!("call should succeed: {err}"),
    };
    assert_eq!(response.external_id, "SM-1");
    assert_eq!(response.status.as_deref(), Some("queued"));

    let raw = match captured.await {
        Ok(raw) => raw,
        Err(err) => panic!("server should capture the request: {err}"),
    };
    let lowered = raw.to_ascii_lowercase();
    assert!(raw.starts_with("POST /v1/messages "), "{raw}");
    assert!(lowered.contains("idempotency-key: cmd-42"), "{raw}");
    assert!(lowered.contains("authorization: bearer test-key-123"), "{raw}");
    assert!(raw.contains("See you Tuesday."));
}

#[tokio::test]
async fn error_status_is_sanitized() {
    let (base_url, _captured) = serve_once(
        "401 Unauthorized",
        r#"{"error":"bad credentials Bearer abcdefghijklmnopqrstuvwxyz"}"#,
    )
    .await;
    let client = match HttpProviderClient::new("sms", &base_url, None, Duration::from_secs(5)) {
        Ok(client) => client,
        Err(err) => panic!("client should build: {err}"),
    };

    match client.call(request()).await {
        Err(ProviderError::HttpStatus { status, body }) => {
            assert_eq!(status, 401);
            assert!(!body.contains("abcdefghijklmnopqrstuvwxyz"), "{body}");
            assert!(body.contains("[REDACTED]"));
        }
        other => panic!("expected HTTP status error, got {other:?}"),
    }
}

#[tokio::test]
async fn response_without_id_is_a_parse_error() {
    let (base_url, _captured) = serve_once("200 OK", r#"{"status":"queued"}"#).await;
    let client = match HttpProviderClient::new("sms", &base_url, None, Duration::from_secs(5)) {
        Ok(client) => client,
        Err(err) => panic!("client should build: {err}"),
    };

    assert!(matches!(
        client.call(request()).await,
        Err(ProviderError::Parse(_))
    ));
}
