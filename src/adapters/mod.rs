//! Concrete backend adapters. Each owns its vendor-specific request and
//! response shapes; the core only sees the `Backend` trait.

pub mod anthropic;
pub mod ollama;
pub mod openai;

use std::time::Duration;

use reqwest::Client;

use crate::config::AppConfig;
use crate::error::DerechoError;
use crate::registry::BackendDescriptor;

/// Cap on response bodies (and error bodies) read into memory.
pub const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Shared reqwest client settings for all HTTP adapters.
pub(crate) fn http_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(4)
        .build()
        .expect("failed to build HTTP client")
}

/// Map a non-success HTTP status into the error taxonomy: 429 → rate
/// limited, 401/403 → auth failure, anything else → upstream error with
/// a capped body preview.
pub(crate) async fn check_status(
    response: reqwest::Response,
    provider: &str,
) -> Result<reqwest::Response, DerechoError> {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(DerechoError::RateLimited {
            provider: provider.to_string(),
        });
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(DerechoError::AuthFailed {
            provider: provider.to_string(),
            message: status.to_string(),
        });
    }
    if !status.is_success() {
        let error_bytes = response.bytes().await.unwrap_or_default();
        let truncated = &error_bytes[..error_bytes.len().min(MAX_RESPONSE_BYTES)];
        let text = String::from_utf8_lossy(truncated);
        return Err(DerechoError::Upstream {
            provider: provider.to_string(),
            message: format!("{status}: {text}"),
            status: Some(status.as_u16()),
        });
    }

    Ok(response)
}

/// Translate reqwest's timeout error into the taxonomy's Timeout so the
/// retry shell treats it uniformly with other deadline misses.
pub(crate) fn map_request_error(e: reqwest::Error, timeout: Duration) -> DerechoError {
    if e.is_timeout() {
        DerechoError::Timeout(timeout.as_millis() as u64)
    } else {
        DerechoError::Request(e)
    }
}

/// Read a body with the size cap enforced before parsing.
pub(crate) async fn read_capped(
    response: reqwest::Response,
    provider: &str,
) -> Result<bytes::Bytes, DerechoError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| DerechoError::Upstream {
            provider: provider.to_string(),
            message: format!("failed to read response body: {e}"),
            status: None,
        })?;
    if bytes.len() > MAX_RESPONSE_BYTES {
        return Err(DerechoError::Upstream {
            provider: provider.to_string(),
            message: format!(
                "response too large: {} bytes (max {MAX_RESPONSE_BYTES})",
                bytes.len()
            ),
            status: None,
        });
    }
    Ok(bytes)
}

/// Descriptors for the stock backends, wired from persisted settings.
/// Registration is an explicit startup call by the embedding application.
pub fn builtin_descriptors(config: &AppConfig) -> Vec<BackendDescriptor> {
    let openai_key = config
        .backend_settings("openai")
        .and_then(|s| s.api_key.clone())
        .unwrap_or_default();
    let openai_url = config
        .backend_settings("openai")
        .and_then(|s| s.base_url.clone())
        .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string());

    let anthropic_key = config
        .backend_settings("anthropic")
        .and_then(|s| s.api_key.clone())
        .unwrap_or_default();
    let anthropic_url = config
        .backend_settings("anthropic")
        .and_then(|s| s.base_url.clone())
        .unwrap_or_else(|| anthropic::DEFAULT_BASE_URL.to_string());

    let ollama_url = config
        .backend_settings("ollama")
        .and_then(|s| s.base_url.clone())
        .unwrap_or_else(|| ollama::DEFAULT_BASE_URL.to_string());

    vec![
        openai::descriptor(openai_key, openai_url),
        anthropic::descriptor(anthropic_key, anthropic_url),
        ollama::descriptor(ollama_url),
    ]
}
