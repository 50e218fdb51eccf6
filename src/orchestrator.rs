use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{classify, ContentKind, ParsedResponse};
use crate::error::DerechoError;
use crate::events::{Event, EventBus};
use crate::message::{GenerationConfig, GenerationResult, Message};
use crate::registry::BackendRegistry;
use crate::template::TemplateSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    General,
    Chat,
    CodeGeneration,
    CodeReview,
    CodeRefactor,
    Documentation,
    Translation,
    Analysis,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::General => "general",
            TaskType::Chat => "chat",
            TaskType::CodeGeneration => "code_generation",
            TaskType::CodeReview => "code_review",
            TaskType::CodeRefactor => "code_refactor",
            TaskType::Documentation => "documentation",
            TaskType::Translation => "translation",
            TaskType::Analysis => "analysis",
        }
    }

    /// Fixed system preamble for this task type, when one is defined.
    pub fn system_preamble(&self) -> Option<&'static str> {
        match self {
            TaskType::CodeGeneration => Some(
                "You are an expert software developer. Produce high-quality, \
                 readable, maintainable code.",
            ),
            TaskType::CodeReview => Some(
                "You are an experienced code reviewer. Review the code in \
                 detail for quality, security, and performance.",
            ),
            TaskType::CodeRefactor => Some(
                "You are a refactoring specialist. Propose improvements to \
                 readability, maintainability, and performance.",
            ),
            TaskType::Documentation => Some(
                "You are a technical writer. Produce clear, comprehensive, \
                 easy-to-follow documentation.",
            ),
            TaskType::Translation => Some(
                "You are a professional translator. Understand the context \
                 and provide natural, accurate translations.",
            ),
            TaskType::Analysis => Some(
                "You are an analysis specialist. Examine the data or \
                 information in detail and provide insightful results.",
            ),
            TaskType::General | TaskType::Chat => None,
        }
    }

    /// Content kind the classifier should prefer for this task type.
    pub fn expected_kind(&self) -> Option<ContentKind> {
        match self {
            TaskType::CodeGeneration | TaskType::CodeRefactor => Some(ContentKind::Code),
            TaskType::CodeReview => Some(ContentKind::Review),
            TaskType::Documentation => Some(ContentKind::Documentation),
            TaskType::Analysis => Some(ContentKind::Explanation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// One unit of orchestrated work. Immutable; create via
/// [`Orchestrator::create_task`].
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub prompt: String,
    pub template_name: Option<String>,
    pub template_vars: HashMap<String, String>,
    pub backend: Option<String>,
    pub model: Option<String>,
    pub config: Option<GenerationConfig>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields of a task; everything else is assigned by the
/// orchestrator.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_type: TaskType,
    pub prompt: String,
    pub priority: TaskPriority,
    pub template_name: Option<String>,
    pub template_vars: HashMap<String, String>,
    pub backend: Option<String>,
    pub model: Option<String>,
    pub config: Option<GenerationConfig>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskSpec {
    pub fn new(task_type: TaskType, prompt: impl Into<String>) -> Self {
        Self {
            task_type,
            prompt: prompt.into(),
            priority: TaskPriority::Normal,
            template_name: None,
            template_vars: HashMap::new(),
            backend: None,
            model: None,
            config: None,
            metadata: HashMap::new(),
        }
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn template(mut self, name: impl Into<String>, vars: HashMap<String, String>) -> Self {
        self.template_name = Some(name.into());
        self.template_vars = vars;
        self
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn config(mut self, config: GenerationConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Result record for one executed task. Exactly one per task, success or
/// failure.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub success: bool,
    pub content: String,
    pub parsed: Option<ParsedResponse>,
    pub response: Option<GenerationResult>,
    pub error: Option<String>,
    pub execution_time: Duration,
    pub tokens_used: u32,
    pub cost_estimate: f64,
    pub completed_at: DateTime<Utc>,
}

/// Running service statistics; derived values computed in
/// [`Orchestrator::stats`].
#[derive(Debug)]
struct ServiceStats {
    successful_requests: u64,
    failed_requests: u64,
    total_tokens: u64,
    total_cost: f64,
    average_response_time: Duration,
    started_at: DateTime<Utc>,
}

impl ServiceStats {
    fn new() -> Self {
        Self {
            successful_requests: 0,
            failed_requests: 0,
            total_tokens: 0,
            total_cost: 0.0,
            average_response_time: Duration::ZERO,
            started_at: Utc::now(),
        }
    }

    /// Rolling average over all completed tasks, success or failure.
    fn record(&mut self, outcome: &TaskOutcome) {
        if outcome.success {
            self.successful_requests += 1;
            self.total_tokens += u64::from(outcome.tokens_used);
            self.total_cost += outcome.cost_estimate;
        } else {
            self.failed_requests += 1;
        }
        let completed = self.successful_requests + self.failed_requests;
        let prior = self.average_response_time.as_secs_f64() * (completed - 1) as f64;
        self.average_response_time =
            Duration::from_secs_f64((prior + outcome.execution_time.as_secs_f64()) / completed as f64);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_response_time_ms: f64,
    pub requests_per_minute: f64,
    pub uptime_seconds: f64,
    pub task_history_size: usize,
    pub result_history_size: usize,
}

/// Service core: accepts tasks, selects a backend and model, assembles
/// the message sequence, invokes the adapter through the retry shell,
/// classifies the result, and records statistics. A single failed task
/// never aborts the orchestrator — the caller always receives a
/// [`TaskOutcome`].
pub struct Orchestrator {
    registry: Arc<BackendRegistry>,
    templates: Option<Arc<dyn TemplateSource>>,
    events: EventBus,
    stats: Mutex<ServiceStats>,
    task_history: Mutex<Vec<Task>>,
    result_history: Mutex<Vec<TaskOutcome>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<BackendRegistry>, events: EventBus) -> Self {
        Self {
            registry,
            templates: None,
            events,
            stats: Mutex::new(ServiceStats::new()),
            task_history: Mutex::new(Vec::new()),
            result_history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateSource>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Build a task from its spec, assign its identifier, and append it to
    /// the task history. Ids are time-based, tie-broken by history length,
    /// so ids are unique and sort in submission order.
    pub fn create_task(&self, spec: TaskSpec) -> Task {
        let mut history = self.task_history.lock().expect("task history lock");
        let task = Task {
            id: format!("task_{}_{}", Utc::now().timestamp_millis(), history.len()),
            task_type: spec.task_type,
            priority: spec.priority,
            prompt: spec.prompt,
            template_name: spec.template_name,
            template_vars: spec.template_vars,
            backend: spec.backend,
            model: spec.model,
            config: spec.config,
            metadata: spec.metadata,
            created_at: Utc::now(),
        };
        tracing::info!(task_id = %task.id, task_type = task.task_type.as_str(), "created task");
        history.push(task.clone());
        task
    }

    /// Execute one task end to end. Errors between prompt preparation and
    /// generation are caught at this boundary and converted into a failed
    /// outcome — they are recorded, not propagated.
    pub async fn execute_task(&self, task: &Task) -> TaskOutcome {
        let start = Instant::now();
        tracing::info!(task_id = %task.id, task_type = task.task_type.as_str(), "task started");
        self.events.emit(Event::TaskStarted {
            task_id: task.id.clone(),
            task_type: task.task_type.as_str().to_string(),
        });

        let outcome = match self.run(task).await {
            Ok((result, parsed)) => {
                let cost = estimate_cost(&result.model, result.usage.total_tokens);
                TaskOutcome {
                    task_id: task.id.clone(),
                    success: true,
                    content: result.content.clone(),
                    tokens_used: result.usage.total_tokens,
                    cost_estimate: cost,
                    parsed: Some(parsed),
                    response: Some(result),
                    error: None,
                    execution_time: start.elapsed(),
                    completed_at: Utc::now(),
                }
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "task failed");
                TaskOutcome {
                    task_id: task.id.clone(),
                    success: false,
                    content: String::new(),
                    parsed: None,
                    response: None,
                    error: Some(e.user_message()),
                    execution_time: start.elapsed(),
                    tokens_used: 0,
                    cost_estimate: 0.0,
                    completed_at: Utc::now(),
                }
            }
        };

        self.stats.lock().expect("stats lock").record(&outcome);
        self.result_history
            .lock()
            .expect("result history lock")
            .push(outcome.clone());

        let duration_ms = outcome.execution_time.as_millis() as u64;
        if outcome.success {
            tracing::info!(task_id = %task.id, duration_ms, "task completed");
            self.events.emit(Event::TaskCompleted {
                task_id: task.id.clone(),
                duration_ms,
            });
        } else {
            self.events.emit(Event::TaskFailed {
                task_id: task.id.clone(),
                error: outcome.error.clone().unwrap_or_default(),
                duration_ms,
            });
        }

        outcome
    }

    /// Convenience: create and execute in one call.
    pub async fn execute(&self, spec: TaskSpec) -> TaskOutcome {
        let task = self.create_task(spec);
        self.execute_task(&task).await
    }

    /// The fallible middle of the pipeline: prompt → backend → messages →
    /// generate → classify.
    async fn run(
        &self,
        task: &Task,
    ) -> Result<(GenerationResult, ParsedResponse), DerechoError> {
        let prompt = self.resolve_prompt(task);

        let backend = task
            .backend
            .as_deref()
            .or_else(|| {
                self.registry
                    .app_config()
                    .task_backend(task.task_type.as_str())
            })
            .map(str::to_string);

        let client = self
            .registry
            .get_or_create(backend.as_deref(), task.model.as_deref(), task.config.clone())
            .await?;

        let messages = assemble_messages(task.task_type, &prompt);
        let result = client.generate(&messages, None).await?;
        let parsed = classify(&result.content, task.task_type.expected_kind());
        Ok((result, parsed))
    }

    /// Render the task's template when it names one; a missing template is
    /// a warning and a fallback to the raw prompt, never a hard failure.
    fn resolve_prompt(&self, task: &Task) -> String {
        let Some(ref name) = task.template_name else {
            return task.prompt.clone();
        };
        match self
            .templates
            .as_ref()
            .and_then(|t| t.render(name, &task.template_vars))
        {
            Some(rendered) => rendered,
            None => {
                tracing::warn!(task_id = %task.id, template = %name, "template not found — using raw prompt");
                task.prompt.clone()
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        let stats = self.stats.lock().expect("stats lock");
        let uptime = (Utc::now() - stats.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        let completed = stats.successful_requests + stats.failed_requests;
        StatsSnapshot {
            total_requests: completed,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            success_rate: stats.successful_requests as f64 / completed.max(1) as f64,
            total_tokens: stats.total_tokens,
            total_cost: stats.total_cost,
            average_response_time_ms: stats.average_response_time.as_secs_f64() * 1000.0,
            requests_per_minute: (completed as f64 / uptime.max(1.0)) * 60.0,
            uptime_seconds: uptime,
            task_history_size: self.task_history.lock().expect("task history lock").len(),
            result_history_size: self
                .result_history
                .lock()
                .expect("result history lock")
                .len(),
        }
    }

    pub fn task_history(&self) -> Vec<Task> {
        self.task_history.lock().expect("task history lock").clone()
    }

    pub fn result_history(&self) -> Vec<TaskOutcome> {
        self.result_history
            .lock()
            .expect("result history lock")
            .clone()
    }

    pub async fn available_backends(&self) -> Vec<String> {
        self.registry.available_backends().await
    }

    pub fn available_models(&self, backend: Option<&str>) -> Vec<String> {
        match backend {
            Some(name) => self.registry.supported_models(name),
            None => {
                let mut models: Vec<String> = self
                    .registry
                    .backend_names()
                    .iter()
                    .flat_map(|n| self.registry.supported_models(n))
                    .collect();
                models.sort();
                models.dedup();
                models
            }
        }
    }

    /// Release every cached backend client.
    pub async fn cleanup(&self) {
        self.registry.cleanup_all().await;
    }
}

/// Task-type system preamble (when defined) followed by the resolved
/// prompt as a user turn.
fn assemble_messages(task_type: TaskType, prompt: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if let Some(preamble) = task_type.system_preamble() {
        messages.push(
            Message::system(preamble)
                .with_metadata("task_type", serde_json::json!(task_type.as_str())),
        );
    }
    messages.push(Message::user(prompt));
    messages
}

/// Advisory USD cost per 1K tokens, keyed by model-name substring, with a
/// conservative default for unrecognized models. Locally-served models
/// cost nothing.
const MODEL_RATES: &[(&str, f64)] = &[
    ("gpt-4", 0.03),
    ("gpt-3.5", 0.002),
    ("claude-3-opus", 0.015),
    ("claude-3-sonnet", 0.003),
    ("claude-3-haiku", 0.00025),
    ("llama", 0.0),
    ("codellama", 0.0),
    ("mistral", 0.0),
];

const DEFAULT_RATE_PER_1K: f64 = 0.002;

pub fn estimate_cost(model: &str, tokens: u32) -> f64 {
    let model_lower = model.to_lowercase();
    let rate = MODEL_RATES
        .iter()
        .find(|(name, _)| model_lower.contains(name))
        .map(|(_, rate)| *rate)
        .unwrap_or(DEFAULT_RATE_PER_1K);
    (f64::from(tokens) / 1000.0) * rate
}
