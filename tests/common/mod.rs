//! Shared test fixtures: a scripted in-memory backend driven through the
//! same `Backend` seam the real adapters use.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use derecho::backend::{Backend, FragmentStream, ModelInfo};
use derecho::config::BackendSettings;
use derecho::error::DerechoError;
use derecho::message::{GenerationConfig, GenerationResult, Message, TokenUsage};
use derecho::registry::BackendDescriptor;

/// Shared state between a test and every adapter instance the registry
/// constructs for it.
pub struct ScriptState {
    /// Replies consumed front to back; an empty queue yields a stock
    /// success so tests only script what they care about.
    pub replies: Mutex<VecDeque<Result<GenerationResult, DerechoError>>>,
    /// Fragment sequences for streaming calls.
    pub fragments: Mutex<Vec<String>>,
    /// Message sequences received by `generate`, call by call.
    pub received: Mutex<Vec<Vec<Message>>>,
    pub calls: AtomicUsize,
    pub constructed: AtomicUsize,
    pub available: AtomicBool,
}

impl ScriptState {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fragments: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            constructed: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        })
    }

    pub fn push_ok(&self, content: &str, model: &str, tokens: u32) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(reply(content, model, tokens)));
    }

    pub fn push_err(&self, error: DerechoError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }
}

/// A canned successful generation result.
pub fn reply(content: &str, model: &str, tokens: u32) -> GenerationResult {
    GenerationResult {
        content: content.to_string(),
        model: model.to_string(),
        usage: TokenUsage {
            prompt_tokens: tokens / 2,
            completion_tokens: tokens - tokens / 2,
            total_tokens: tokens,
        },
        finish_reason: "stop".to_string(),
        latency: std::time::Duration::from_millis(1),
        timestamp: Utc::now(),
        metadata: Default::default(),
    }
}

pub struct ScriptedBackend {
    name: String,
    state: Arc<ScriptState>,
}

impl ScriptedBackend {
    pub fn new(name: &str, state: Arc<ScriptState>) -> Self {
        Self {
            name: name.to_string(),
            state,
        }
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: self.name.clone(),
            models: vec!["scripted-1".to_string(), "scripted-2".to_string()],
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
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.received.lock().unwrap().push(messages.to_vec());
        match self.state.replies.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(reply("scripted reply", &config.model, 10)),
        }
    }

    async fn generate_streaming(
        &self,
        _messages: &[Message],
        _config: &GenerationConfig,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, DerechoError> {
        let fragments: Vec<Result<String, DerechoError>> = self
            .state
            .fragments
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(Ok)
            .collect();
        Ok(futures_util::stream::iter(fragments)
            .take_until(cancel.cancelled_owned())
            .boxed())
    }

    async fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }
}

/// Descriptor whose constructor hands out adapters sharing `state`.
pub fn scripted_descriptor(name: &str, state: Arc<ScriptState>) -> BackendDescriptor {
    let backend_name = name.to_string();
    BackendDescriptor {
        name: name.to_string(),
        display_name: name.to_string(),
        description: format!("scripted {name} backend"),
        supported_models: vec!["scripted-1".to_string(), "scripted-2".to_string()],
        default_model: "scripted-1".to_string(),
        requires_api_key: false,
        supports_streaming: true,
        supports_functions: false,
        defaults: BackendSettings::default(),
        constructor: Arc::new(move |_config| {
            state.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedBackend::new(&backend_name, Arc::clone(&state))) as Box<dyn Backend>)
        }),
    }
}
