use thiserror::Error;

#[derive(Debug, Error)]
pub enum DerechoError {
    #[error("invalid generation config: {0}")]
    InvalidConfig(String),

    #[error("unknown backend: {name}")]
    UnknownBackend {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("backend already registered: {0}")]
    DuplicateBackend(String),

    #[error("no backend available")]
    NoBackendAvailable,

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("cancelled after {0}ms")]
    Cancelled(u64),

    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("upstream error from {provider}: {message}")]
    Upstream {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("auth failed for {provider}: {message}")]
    AuthFailed { provider: String, message: String },

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("transcript io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl DerechoError {
    /// Extract provider name from structured error variants.
    /// Returns None for variants that don't carry provider context.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::RateLimited { provider } => Some(provider),
            Self::Upstream { provider, .. } => Some(provider),
            Self::AuthFailed { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Returns true for transient errors that may succeed on retry.
    /// The retry shell uses this to skip pointless attempts: an invalid
    /// credential or a rejected request body will not heal with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Timeout(_) => true,
            Self::Upstream { status, .. } => {
                // 5xx = server error (retryable), 4xx = client error (not retryable)
                // status: None = ambiguous (not from HTTP) → safe default: NOT retryable
                status.is_some_and(|s| s >= 500)
            }
            Self::Request(_) => true, // connection errors may be transient
            _ => false,
        }
    }

    /// Produce a sanitized error message safe for embedding in a TaskOutcome.
    /// Does not leak API keys, internal URLs, or raw upstream error bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidConfig(msg) => format!("invalid configuration: {msg}"),
            Self::UnknownBackend { name, suggestions } => {
                if suggestions.is_empty() {
                    format!("unknown backend: {name}")
                } else {
                    format!(
                        "unknown backend: {name}. Did you mean: {}?",
                        suggestions.join(", ")
                    )
                }
            }
            Self::DuplicateBackend(name) => format!("backend already registered: {name}"),
            Self::NoBackendAvailable => "no backend available".to_string(),
            Self::TemplateNotFound(name) => format!("template not found: {name}"),
            Self::Timeout(ms) => format!("request timed out after {ms}ms"),
            Self::Cancelled(ms) => format!("cancelled after {ms}ms"),
            Self::RateLimited { provider } => {
                format!("rate limited by {provider} — try again shortly")
            }
            Self::Upstream {
                provider, message, ..
            } => {
                format!("upstream error from {provider}: {message}")
            }
            Self::AuthFailed { provider, message } => {
                format!("authentication failed for {provider}: {message}")
            }
            Self::SchemaParse(_) => "failed to parse provider response".to_string(),
            Self::Request(_) => "request to provider failed".to_string(),
            Self::Io(e) => format!("transcript io error: {e}"),
            Self::Other(msg) => msg.clone(),
        }
    }
}
