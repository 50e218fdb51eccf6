//! OpenAI chat-completions adapter: JSON request/response for blocking
//! calls, SSE deltas for streaming.

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use eventsource_stream::Eventsource;
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

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

const SUPPORTED_MODELS: &[&str] = &[
    "gpt-4",
    "gpt-4-turbo",
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-3.5-turbo",
];

pub struct OpenAiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageBody>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiAdapter {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: http_client(),
            api_key,
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
        let mut body = json!({
            "model": config.model,
            "messages": wire_messages,
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
            "top_p": config.top_p,
            "frequency_penalty": config.frequency_penalty,
            "presence_penalty": config.presence_penalty,
            "stream": stream,
        });
        if !config.stop_sequences.is_empty() {
            body["stop"] = json!(config.stop_sequences);
        }
        body
    }

    async fn post(
        &self,
        config: &GenerationConfig,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, DerechoError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(config.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| map_request_error(e, config.timeout))?;
        check_status(response, "openai").await
    }
}

#[async_trait]
impl Backend for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "openai".to_string(),
            models: SUPPORTED_MODELS.iter().map(|m| m.to_string()).collect(),
            context_window: 128_000,
            supports_streaming: true,
            supports_functions: true,
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
        let bytes = read_capped(response, "openai").await?;
        let parsed: ChatResponse =
            serde_json::from_slice(&bytes).map_err(|e| DerechoError::SchemaParse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DerechoError::SchemaParse("response had no choices".to_string()))?;

        Ok(GenerationResult {
            content: choice.message.content.unwrap_or_default(),
            model: parsed.model.unwrap_or_else(|| config.model.clone()),
            usage: parsed
                .usage
                .map(|u| TokenUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                })
                .unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_default(),
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

        let fragments = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                let done = matches!(event, Ok(e) if e.data.trim() == "[DONE]");
                futures_util::future::ready(!done)
            })
            .filter_map(|event| async move {
                match event {
                    Ok(event) => {
                        if event.data.is_empty() {
                            return None;
                        }
                        match serde_json::from_str::<StreamChunk>(&event.data) {
                            Ok(chunk) => chunk
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content)
                                .filter(|s| !s.is_empty())
                                .map(Ok),
                            Err(e) => Some(Err(DerechoError::SchemaParse(format!(
                                "bad stream chunk: {e}"
                            )))),
                        }
                    }
                    Err(e) => Some(Err(DerechoError::Upstream {
                        provider: "openai".to_string(),
                        message: format!("stream error: {e}"),
                        status: None,
                    })),
                }
            })
            .take_until(cancel.cancelled_owned())
            .boxed();

        Ok(fragments)
    }

    async fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

pub fn descriptor(api_key: String, base_url: String) -> BackendDescriptor {
    BackendDescriptor {
        name: "openai".to_string(),
        display_name: "OpenAI".to_string(),
        description: "OpenAI chat completions API".to_string(),
        supported_models: SUPPORTED_MODELS.iter().map(|m| m.to_string()).collect(),
        default_model: DEFAULT_MODEL.to_string(),
        requires_api_key: true,
        supports_streaming: true,
        supports_functions: true,
        defaults: BackendSettings::default(),
        constructor: std::sync::Arc::new(move |_config| {
            Ok(Box::new(OpenAiAdapter::new(
                api_key.clone(),
                base_url.clone(),
            )) as Box<dyn Backend>)
        }),
    }
}
