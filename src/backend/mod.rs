pub mod metrics;
pub mod shell;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::DerechoError;
use crate::message::{GenerationConfig, GenerationResult, Message};

/// A lazy, finite, single-consumption sequence of generated text fragments.
/// Dropping the stream (or cancelling the token passed to
/// [`Backend::generate_streaming`]) closes the underlying connection.
pub type FragmentStream = BoxStream<'static, Result<String, DerechoError>>;

/// Static metadata describing what an adapter can do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub models: Vec<String>,
    pub context_window: u32,
    pub supports_streaming: bool,
    pub supports_functions: bool,
}

/// Adapter lifecycle state. Transitions are idle → processing → (idle | error);
/// every transition emits a `backend_status_changed` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Idle,
    Processing,
    Error,
    Unavailable,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Idle => "idle",
            BackendStatus::Processing => "processing",
            BackendStatus::Error => "error",
            BackendStatus::Unavailable => "unavailable",
        }
    }
}

/// The contract every text-generation backend must satisfy. The core never
/// looks past this seam — each adapter owns its vendor-specific request and
/// response shapes, auth headers, and network handles.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Adapter identity used in events, metrics, and error messages.
    fn name(&self) -> &str;

    /// Supported models, context size, capability flags.
    fn model_info(&self) -> ModelInfo;

    /// Run one generation call to completion.
    async fn generate(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> Result<GenerationResult, DerechoError>;

    /// Start a streaming generation call. The producer blocks between
    /// fragments on network reads; cancelling `cancel` must stop fragment
    /// production and release the connection.
    async fn generate_streaming(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, DerechoError>;

    /// Best-effort reachability/credential probe. Never errors; any
    /// failure is reported as `false`.
    async fn is_available(&self) -> bool;

    /// Release adapter-owned resources. Default: nothing to do — reqwest
    /// pools close on drop.
    async fn shutdown(&self) {}
}
