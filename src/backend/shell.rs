use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::backend::metrics::{Metrics, MetricsSnapshot};
use crate::backend::{Backend, BackendStatus, FragmentStream, ModelInfo};
use crate::error::DerechoError;
use crate::events::{Event, EventBus};
use crate::message::{GenerationConfig, GenerationResult, Message, Role};
use crate::transcript::Transcript;

/// Retry-and-instrumentation shell around a concrete adapter. All calls
/// into a backend go through here: config validation, linear-backoff
/// retries, status transitions, metrics, and notifications are uniform
/// across adapters.
///
/// Locks guard short, non-await critical sections only; the adapter call
/// itself runs with no lock held.
pub struct BackendClient {
    adapter: Box<dyn Backend>,
    config: Mutex<GenerationConfig>,
    status: Mutex<BackendStatus>,
    metrics: Mutex<Metrics>,
    conversation: Mutex<Vec<Message>>,
    events: EventBus,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    /// Wrap an adapter. Fails fast on an invalid config — a config
    /// violation is never retried.
    pub fn new(
        adapter: Box<dyn Backend>,
        config: GenerationConfig,
        events: EventBus,
    ) -> Result<Self, DerechoError> {
        config.validate()?;
        tracing::info!(backend = adapter.name(), model = %config.model, "backend client created");
        Ok(Self {
            adapter,
            config: Mutex::new(config),
            status: Mutex::new(BackendStatus::Idle),
            metrics: Mutex::new(Metrics::new()),
            conversation: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn model_info(&self) -> ModelInfo {
        self.adapter.model_info()
    }

    pub fn config(&self) -> GenerationConfig {
        self.config.lock().expect("config lock").clone()
    }

    /// Replace the config. Validation failure leaves the old config in place.
    pub fn update_config(&self, config: GenerationConfig) -> Result<(), DerechoError> {
        config.validate()?;
        *self.config.lock().expect("config lock") = config;
        Ok(())
    }

    pub fn status(&self) -> BackendStatus {
        *self.status.lock().expect("status lock")
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.lock().expect("metrics lock").snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.lock().expect("metrics lock").reset();
    }

    pub async fn is_available(&self) -> bool {
        self.adapter.is_available().await
    }

    pub async fn shutdown(&self) {
        self.adapter.shutdown().await;
    }

    fn set_status(&self, new: BackendStatus) {
        let old = {
            let mut status = self.status.lock().expect("status lock");
            std::mem::replace(&mut *status, new)
        };
        if old != new {
            self.events.emit(Event::BackendStatusChanged {
                backend: self.adapter.name().to_string(),
                old_status: old.as_str().to_string(),
                new_status: new.as_str().to_string(),
            });
        }
    }

    fn record_request(&self, success: bool, tokens: u32, latency: std::time::Duration) {
        self.metrics
            .lock()
            .expect("metrics lock")
            .record(success, tokens, latency);
        self.events.emit(Event::BackendRequestCompleted {
            backend: self.adapter.name().to_string(),
            success,
            tokens,
            latency_ms: latency.as_millis() as u64,
        });
    }

    /// Run one generation call through the retry shell.
    ///
    /// Retries up to `retry_count` times with linear backoff
    /// (`retry_delay × attempt` between attempts). Non-retryable errors
    /// (auth failures, 4xx upstream) short-circuit; the last error is
    /// surfaced unchanged.
    pub async fn generate(
        &self,
        messages: &[Message],
        config_override: Option<&GenerationConfig>,
    ) -> Result<GenerationResult, DerechoError> {
        let config = match config_override {
            Some(c) => {
                c.validate()?;
                c.clone()
            }
            None => self.config(),
        };

        let start = Instant::now();
        self.set_status(BackendStatus::Processing);

        let mut last_error = DerechoError::Other("no attempts made".to_string());
        for attempt in 0..=config.retry_count {
            if attempt > 0 {
                let delay = config.retry_delay * attempt;
                tracing::info!(
                    backend = self.adapter.name(),
                    attempt,
                    retry_count = config.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "retrying generation"
                );
                tokio::time::sleep(delay).await;
            }

            match self.adapter.generate(messages, &config).await {
                Ok(result) => {
                    self.set_status(BackendStatus::Idle);
                    self.record_request(true, result.usage.total_tokens, start.elapsed());
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!(
                        backend = self.adapter.name(),
                        attempt = attempt + 1,
                        error = %e,
                        "generation attempt failed"
                    );
                    let retryable = e.is_retryable();
                    last_error = e;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        self.set_status(BackendStatus::Error);
        self.record_request(false, 0, start.elapsed());
        Err(last_error)
    }

    /// Start a streaming call. Streams are single-consumption and not
    /// restartable, so the shell does not retry them; a setup failure is
    /// recorded like any other failed request. Cancelling `cancel` stops
    /// fragment production and closes the connection.
    pub async fn generate_streaming(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<FragmentStream, DerechoError> {
        let config = self.config();
        let start = Instant::now();
        self.set_status(BackendStatus::Processing);

        match self
            .adapter
            .generate_streaming(messages, &config, cancel)
            .await
        {
            Ok(stream) => {
                self.set_status(BackendStatus::Idle);
                Ok(stream)
            }
            Err(e) => {
                self.set_status(BackendStatus::Error);
                self.record_request(false, 0, start.elapsed());
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------
    // Conversation convenience
    // -----------------------------------------------------------------

    /// Append a user turn, run generation over the full history (with the
    /// configured system prompt injected once, at the front), and append
    /// the assistant reply.
    pub async fn chat(&self, text: impl Into<String>) -> Result<GenerationResult, DerechoError> {
        let user_message = Message::user(text);
        self.conversation
            .lock()
            .expect("conversation lock")
            .push(user_message);

        let config = self.config();
        let mut messages = Vec::new();
        if let Some(ref system) = config.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.extend(self.conversation.lock().expect("conversation lock").clone());

        let result = self.generate(&messages, None).await?;

        self.conversation
            .lock()
            .expect("conversation lock")
            .push(Message::assistant(result.content.clone()));

        Ok(result)
    }

    pub fn conversation(&self) -> Vec<Message> {
        self.conversation.lock().expect("conversation lock").clone()
    }

    pub fn set_conversation(&self, messages: Vec<Message>) {
        *self.conversation.lock().expect("conversation lock") = messages;
    }

    pub fn clear_conversation(&self) {
        self.conversation.lock().expect("conversation lock").clear();
    }

    /// Export the running conversation as a self-describing transcript.
    pub fn export_conversation(&self, path: impl AsRef<Path>) -> Result<(), DerechoError> {
        let transcript =
            Transcript::new(self.conversation(), self.adapter.model_info(), self.config());
        transcript.save(path)
    }

    /// Replace the running conversation with one loaded from a transcript.
    pub fn import_conversation(&self, path: impl AsRef<Path>) -> Result<(), DerechoError> {
        let transcript = Transcript::load(path)?;
        self.set_conversation(transcript.messages);
        Ok(())
    }

    /// Append an assistant turn directly. Used when a caller drives a
    /// streaming response and accumulates the fragments itself.
    pub fn push_assistant_turn(&self, content: impl Into<String>) {
        self.conversation
            .lock()
            .expect("conversation lock")
            .push(Message::assistant(content));
    }

    /// Count conversation turns by role, for display layers.
    pub fn turn_counts(&self) -> (usize, usize) {
        let conversation = self.conversation.lock().expect("conversation lock");
        let user = conversation.iter().filter(|m| m.role == Role::User).count();
        let assistant = conversation
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count();
        (user, assistant)
    }
}
