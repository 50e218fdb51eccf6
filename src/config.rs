use std::collections::HashMap;
use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::message::GenerationConfig;

/// Nested application configuration, keyed by backend name and by task
/// type. Every lookup falls back to a built-in default — a missing key is
/// never an error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Process-wide default backend. The registry validates it on use.
    pub default_backend: Option<String>,
    /// Per-backend overrides merged over descriptor defaults.
    #[serde(default)]
    pub backends: HashMap<String, BackendSettings>,
    /// Per-task-type backend override (e.g. `code_review = "anthropic"`).
    #[serde(default)]
    pub task_backends: HashMap<String, String>,
}

/// Persisted per-backend settings. Only set fields override descriptor
/// defaults; merge order is descriptor defaults → these → call-site
/// overrides, later wins.
#[derive(Clone, Default, Deserialize)]
pub struct BackendSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub system_prompt: Option<String>,
    pub timeout_secs: Option<u64>,
    pub retry_count: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl std::fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("top_p", &self.top_p)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry_count", &self.retry_count)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

impl BackendSettings {
    /// Overlay the set fields onto `config`. Model is handled separately
    /// by the registry since it participates in the cache key.
    pub fn apply_to(&self, config: &mut GenerationConfig) {
        if let Some(t) = self.temperature {
            config.temperature = t;
        }
        if let Some(m) = self.max_tokens {
            config.max_tokens = m;
        }
        if let Some(p) = self.top_p {
            config.top_p = p;
        }
        if let Some(ref s) = self.system_prompt {
            config.system_prompt = Some(s.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = std::time::Duration::from_secs(secs);
        }
        if let Some(r) = self.retry_count {
            config.retry_count = r;
        }
        if let Some(ms) = self.retry_delay_ms {
            config.retry_delay = std::time::Duration::from_millis(ms);
        }
    }
}

impl AppConfig {
    /// Load configuration: `DERECHO_CONFIG` path if set, else
    /// `derecho.toml` in the working directory, else built-in defaults.
    /// A malformed file is logged and ignored rather than fatal.
    pub fn load() -> Self {
        let mut config = match env::var("DERECHO_CONFIG") {
            Ok(path) => Self::from_file(&path),
            Err(_) if Path::new("derecho.toml").exists() => Self::from_file("derecho.toml"),
            Err(_) => Self::default(),
        };
        config.overlay_env_keys();
        config
    }

    fn from_file(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => {
                    tracing::info!(path, "loaded config file");
                    config
                }
                Err(e) => {
                    tracing::warn!(path, error = %e, "malformed config file — using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path, error = %e, "cannot read config file — using defaults");
                Self::default()
            }
        }
    }

    /// Environment API keys take effect only when the config file did not
    /// already set one for that backend.
    fn overlay_env_keys(&mut self) {
        for (backend, var) in [
            ("openai", "OPENAI_API_KEY"),
            ("anthropic", "ANTHROPIC_API_KEY"),
        ] {
            if let Ok(key) = env::var(var) {
                let settings = self.backends.entry(backend.to_string()).or_default();
                if settings.api_key.is_none() {
                    settings.api_key = Some(key);
                }
            } else if !self.has_api_key(backend) {
                tracing::warn!("{var} not set — {backend} requires a configured key");
            }
        }
    }

    pub fn backend_settings(&self, name: &str) -> Option<&BackendSettings> {
        self.backends.get(name)
    }

    pub fn has_api_key(&self, name: &str) -> bool {
        self.backends
            .get(name)
            .is_some_and(|s| s.api_key.as_ref().is_some_and(|k| !k.is_empty()))
    }

    /// Per-task-type backend override, if one is configured.
    pub fn task_backend(&self, task_type: &str) -> Option<&str> {
        self.task_backends.get(task_type).map(String::as_str)
    }
}
