//! Ollama adapter for locally hosted models. No credentials; availability
//! is a reachability probe against the local server. Streaming responses
//! are newline-delimited JSON rather than SSE.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, FragmentStream, ModelInfo};
use crate::config::BackendSettings;
use crate::error::DerechoError;
use crate::message::{GenerationConfig, GenerationResult, Message, TokenUsage};
use crate::registry::BackendDescriptor;

use super::{check_status, http_client, map_request_error, read_capped};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama2";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const SUPPORTED_MODELS: &[&str] = &["llama2", "codellama", "mistral"];

pub struct OllamaAdapter {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    message: ChatMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
}

impl OllamaAdapter {
    pub fn new(base_url: String) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request_body(
        messages: &[Message],
        config: &GenerationConfig,
        stream: bool,
    ) -> serde_json::Value {
        let wire_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let mut options = json!({
            "temperature": config.temperature,
            "top_p": config.top_p,
            "num_predict": config.max_tokens,
        });
        if !config.stop_sequences.is_empty() {
            options["stop"] = json!(config.stop_sequences);
        }
        json!({
            "model": config.model,
            "messages": wire_messages,
            "stream": stream,
            "options": options,
        })
    }

    async fn post(
        &self,
        config: &GenerationConfig,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, DerechoError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(config.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| map_request_error(e, config.timeout))?;
        check_status(response, "ollama").await
    }
}

#[async_trait]
impl Backend for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "ollama".to_string(),
            models: SUPPORTED_MODELS.iter().map(|m| m.to_string()).collect(),
            context_window: 4096,
            supports_streaming: true,
            supports_functions: false,
        }
    }

    async fn generate(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> Result<GenerationResult, DerechoError> {
        let started = Instant::now();
        let body = Self::request_body(messages, config, false);
        let response = self.post(config, &body).await?;
        let bytes = read_capped(response, "ollama").await?;
        let parsed: ChatResponse =
            serde_json::from_slice(&bytes).map_err(|e| DerechoError::SchemaParse(e.to_string()))?;

        Ok(GenerationResult {
            content: parsed.message.content,
            model: parsed.model.unwrap_or_else(|| config.model.clone()),
            usage: TokenUsage {
                prompt_tokens: parsed.prompt_eval_count,
                completion_tokens: parsed.eval_count,
                total_tokens: parsed.prompt_eval_count + parsed.eval_count,
            },
            finish_reason: parsed.done_reason.unwrap_or_default(),
            latency: started.elapsed(),
            timestamp: Utc::now(),
            metadata: Default::default(),
        })
    }

    async fn generate_streaming(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, DerechoError> {
        let body = Self::request_body(messages, config, true);
        let response = self.post(config, &body).await?;

        // NDJSON: buffer partial chunks until a newline completes a line.
        let mut buffer = String::new();
        let fragments = response
            .bytes_stream()
            .map(move |chunk| {
                let mut out: Vec<Result<String, DerechoError>> = Vec::new();
                match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buffer.find('\n') {
                            let line = buffer[..pos].trim().to_string();
                            buffer.drain(..=pos);
                            if line.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<StreamLine>(&line) {
                                Ok(parsed) => {
                                    let fragment = parsed
                                        .message
                                        .map(|m| m.content)
                                        .filter(|c| !c.is_empty());
                                    if let Some(fragment) = fragment {
                                        out.push(Ok(fragment));
                                    }
                                    if parsed.done {
                                        break;
                                    }
                                }
                                Err(e) => out.push(Err(DerechoError::SchemaParse(format!(
                                    "bad stream line: {e}"
                                )))),
                            }
                        }
                    }
                    Err(e) => out.push(Err(DerechoError::Upstream {
                        provider: "ollama".to_string(),
                        message: format!("stream error: {e}"),
                        status: None,
                    })),
                }
                futures_util::stream::iter(out)
            })
            .flatten()
            .take_until(cancel.cancelled_owned())
            .boxed();

        Ok(fragments)
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

pub fn descriptor(base_url: String) -> BackendDescriptor {
    BackendDescriptor {
        name: "ollama".to_string(),
        display_name: "Ollama".to_string(),
        description: "Locally hosted models via the Ollama server".to_string(),
        supported_models: SUPPORTED_MODELS.iter().map(|m| m.to_string()).collect(),
        default_model: DEFAULT_MODEL.to_string(),
        requires_api_key: false,
        supports_streaming: true,
        supports_functions: false,
        defaults: BackendSettings::default(),
        constructor: std::sync::Arc::new(move |_config| {
            Ok(Box::new(OllamaAdapter::new(base_url.clone())) as Box<dyn Backend>)
        }),
    }
}
