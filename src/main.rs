use std::sync::Arc;

use derecho::adapters;
use derecho::config::AppConfig;
use derecho::events::EventBus;
use derecho::orchestrator::{Orchestrator, TaskSpec, TaskType};
use derecho::registry::BackendRegistry;

fn parse_task_type(s: &str) -> Option<TaskType> {
    match s {
        "general" => Some(TaskType::General),
        "chat" => Some(TaskType::Chat),
        "code_generation" => Some(TaskType::CodeGeneration),
        "code_review" => Some(TaskType::CodeReview),
        "code_refactor" => Some(TaskType::CodeRefactor),
        "documentation" => Some(TaskType::Documentation),
        "translation" => Some(TaskType::Translation),
        "analysis" => Some(TaskType::Analysis),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let task_type = args
        .next()
        .as_deref()
        .and_then(parse_task_type)
        .unwrap_or(TaskType::General);
    let prompt: String = args.collect::<Vec<_>>().join(" ");
    if prompt.is_empty() {
        anyhow::bail!("usage: derecho <task_type> <prompt...>");
    }

    tracing::info!("derecho starting");

    let config = AppConfig::load();
    let events = EventBus::new();
    let registry = Arc::new(BackendRegistry::new(config.clone(), events.clone()));
    for descriptor in adapters::builtin_descriptors(&config) {
        registry.register(descriptor)?;
    }

    let orchestrator = Orchestrator::new(Arc::clone(&registry), events);

    let available = orchestrator.available_backends().await;
    tracing::info!(backends = ?available, "available backends");

    let outcome = orchestrator.execute(TaskSpec::new(task_type, prompt)).await;

    if outcome.success {
        if let Some(ref parsed) = outcome.parsed {
            tracing::info!(
                kind = parsed.kind.as_str(),
                confidence = parsed.confidence,
                tokens = outcome.tokens_used,
                "task succeeded"
            );
        }
        println!("{}", outcome.content);
    } else {
        tracing::error!(error = ?outcome.error, "task failed");
    }

    orchestrator.cleanup().await;
    tracing::info!("derecho shutting down");

    if outcome.success {
        Ok(())
    } else {
        anyhow::bail!(outcome.error.unwrap_or_else(|| "task failed".to_string()))
    }
}
