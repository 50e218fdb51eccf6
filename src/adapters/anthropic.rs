//! Anthropic messages adapter. System turns travel in a dedicated
//! `system` field rather than the message list, and streaming uses typed
//! SSE events instead of a `[DONE]` sentinel.

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
use crate::message::{GenerationConfig, GenerationResult, Message, Role, TokenUsage};
use crate::registry::BackendDescriptor;

use super::{check_status, http_client, map_request_error, read_capped};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-3-sonnet";

const API_VERSION: &str = "2023-06-01";

const SUPPORTED_MODELS: &[&str] = &["claude-3-opus", "claude-3-sonnet", "claude-3-haiku"];

pub struct AnthropicAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsageBody {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicAdapter {
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
        // System turns are hoisted out of the conversation into the
        // top-level system field, joined in order.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let wire_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": config.model,
            "messages": wire_messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if !config.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(config.stop_sequences);
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
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(config.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| map_request_error(e, config.timeout))?;
        check_status(response, "anthropic").await
    }
}

#[async_trait]
impl Backend for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "anthropic".to_string(),
            models: SUPPORTED_MODELS.iter().map(|m| m.to_string()).collect(),
            context_window: 200_000,
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
        let bytes = read_capped(response, "anthropic").await?;
        let parsed: MessagesResponse =
            serde_json::from_slice(&bytes).map_err(|e| DerechoError::SchemaParse(e.to_string()))?;

        let content: String = parsed
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            })
            .unwrap_or_default();

        Ok(GenerationResult {
            content,
            model: parsed.model.unwrap_or_else(|| config.model.clone()),
            usage,
            finish_reason: parsed.stop_reason.unwrap_or_default(),
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
                let stopped = matches!(event, Ok(e) if e.event == "message_stop");
                futures_util::future::ready(!stopped)
            })
            .filter_map(|event| async move {
                match event {
                    Ok(event) => {
                        if event.data.is_empty() {
                            return None;
                        }
                        match serde_json::from_str::<StreamEvent>(&event.data) {
                            Ok(ev) if ev.event_type == "content_block_delta" => ev
                                .delta
                                .and_then(|d| d.text)
                                .filter(|s| !s.is_empty())
                                .map(Ok),
                            Ok(_) => None,
                            Err(e) => Some(Err(DerechoError::SchemaParse(format!(
                                "bad stream event: {e}"
                            )))),
                        }
                    }
                    Err(e) => Some(Err(DerechoError::Upstream {
                        provider: "anthropic".to_string(),
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
        name: "anthropic".to_string(),
        display_name: "Anthropic".to_string(),
        description: "Anthropic messages API".to_string(),
        supported_models: SUPPORTED_MODELS.iter().map(|m| m.to_string()).collect(),
        default_model: DEFAULT_MODEL.to_string(),
        requires_api_key: true,
        supports_streaming: true,
        supports_functions: false,
        defaults: BackendSettings::default(),
        constructor: std::sync::Arc::new(move |_config| {
            Ok(Box::new(AnthropicAdapter::new(
                api_key.clone(),
                base_url.clone(),
            )) as Box<dyn Backend>)
        }),
    }
}
