//! derecho — a provider-orchestration core for chat assistants.
//!
//! The crate separates four concerns:
//! - [`backend`]: the adapter contract plus the retry/metrics shell
//!   wrapped around every adapter
//! - [`registry`]: explicit backend registration, config merging, and
//!   per-(backend, model) client caching
//! - [`orchestrator`]: typed tasks dispatched to backends, with history
//!   and service statistics
//! - [`classify`]: structural classification of responses into typed
//!   payloads (code, structured data, documents, reviews)
//!
//! Concrete adapters for OpenAI, Anthropic, and Ollama live in
//! [`adapters`]; everything else is provider-agnostic.

pub mod adapters;
pub mod backend;
pub mod classify;
pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod orchestrator;
pub mod registry;
pub mod template;
pub mod transcript;

pub use backend::shell::BackendClient;
pub use backend::{Backend, BackendStatus, FragmentStream, ModelInfo};
pub use classify::{ContentKind, ParsedResponse};
pub use config::AppConfig;
pub use error::DerechoError;
pub use events::{Event, EventBus};
pub use message::{GenerationConfig, GenerationResult, Message, Role, TokenUsage};
pub use orchestrator::{Orchestrator, Task, TaskOutcome, TaskSpec, TaskType};
pub use registry::{BackendDescriptor, BackendRegistry};
