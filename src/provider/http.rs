//! Shared HTTP client, auth headers, and status mapping.

use std::sync::OnceLock;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::error::{ErrorDetails, SidestreamError};

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// No overall request timeout is set: foreground streams run until the
/// backend finishes or the client disconnects.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str, streaming: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if streaming {
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    }
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Map a non-success HTTP status and body to a classified error.
pub fn status_to_error(status: u16, body: &str) -> SidestreamError {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or(body)
        .to_string();
    let provider_code = error
        .and_then(|e| e.get("code").or_else(|| e.get("type")))
        .and_then(|c| c.as_str())
        .map(str::to_string);

    match status {
        401 | 403 => SidestreamError::Authentication(message),
        429 if provider_code.as_deref() == Some("insufficient_quota") => {
            SidestreamError::Quota(message)
        }
        429 => SidestreamError::RateLimited {
            retry_after_ms: extract_retry_after(error),
        },
        503 | 529 => SidestreamError::Overloaded(message),
        _ => SidestreamError::api_with_details(
            status,
            message,
            ErrorDetails {
                provider_code,
                request_id: None,
            },
        ),
    }
}

fn extract_retry_after(error: Option<&serde_json::Value>) -> Option<u64> {
    error
        .and_then(|e| e.get("retry_after"))
        .and_then(|r| r.as_f64())
        .map(|s| (s * 1000.0) as u64)
}
