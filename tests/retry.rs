//! Retry shell behavior: attempt counts, linear backoff, short-circuits,
//! and the metrics and notifications recorded along the way.

mod common;

use std::time::{Duration, Instant};

use derecho::backend::shell::BackendClient;
use derecho::backend::BackendStatus;
use derecho::error::DerechoError;
use derecho::events::{Event, EventBus};
use derecho::message::{GenerationConfig, Message};

use common::{ScriptState, ScriptedBackend};

fn test_config(retry_count: u32, retry_delay_ms: u64) -> GenerationConfig {
    GenerationConfig {
        model: "scripted-1".to_string(),
        retry_count,
        retry_delay: Duration::from_millis(retry_delay_ms),
        ..GenerationConfig::default()
    }
}

fn client(state: &std::sync::Arc<ScriptState>, config: GenerationConfig) -> BackendClient {
    BackendClient::new(
        Box::new(ScriptedBackend::new("scripted", std::sync::Arc::clone(state))),
        config,
        EventBus::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let state = ScriptState::shared();
    state.push_err(DerechoError::RateLimited {
        provider: "scripted".to_string(),
    });
    state.push_err(DerechoError::Timeout(100));
    state.push_ok("finally", "scripted-1", 12);

    let client = client(&state, test_config(3, 1));
    let result = client.generate(&[Message::user("hi")], None).await.unwrap();

    assert_eq!(result.content, "finally");
    assert_eq!(state.calls(), 3);
    assert_eq!(client.status(), BackendStatus::Idle);

    // One logical request, regardless of attempts.
    let metrics = client.metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.successful_requests, 1);
    assert_eq!(metrics.total_tokens, 12);
}

#[tokio::test]
async fn exhausted_retries_surface_last_error() {
    let state = ScriptState::shared();
    state.push_err(DerechoError::Timeout(100));
    state.push_err(DerechoError::Timeout(200));

    let client = client(&state, test_config(1, 1));
    let err = client
        .generate(&[Message::user("hi")], None)
        .await
        .unwrap_err();

    assert!(matches!(err, DerechoError::Timeout(200)));
    assert_eq!(state.calls(), 2); // retry_count + 1 attempts
    assert_eq!(client.status(), BackendStatus::Error);

    let metrics = client.metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.failed_requests, 1);
}

#[tokio::test]
async fn non_retryable_error_short_circuits() {
    let state = ScriptState::shared();
    state.push_err(DerechoError::AuthFailed {
        provider: "scripted".to_string(),
        message: "401 Unauthorized".to_string(),
    });

    let client = client(&state, test_config(5, 1));
    let err = client
        .generate(&[Message::user("hi")], None)
        .await
        .unwrap_err();

    assert!(matches!(err, DerechoError::AuthFailed { .. }));
    assert_eq!(state.calls(), 1);
}

#[tokio::test]
async fn client_error_status_is_not_retried() {
    let state = ScriptState::shared();
    state.push_err(DerechoError::Upstream {
        provider: "scripted".to_string(),
        message: "400 Bad Request".to_string(),
        status: Some(400),
    });

    let client = client(&state, test_config(5, 1));
    assert!(client.generate(&[Message::user("hi")], None).await.is_err());
    assert_eq!(state.calls(), 1);
}

#[tokio::test]
async fn server_error_status_is_retried() {
    let state = ScriptState::shared();
    state.push_err(DerechoError::Upstream {
        provider: "scripted".to_string(),
        message: "503 Service Unavailable".to_string(),
        status: Some(503),
    });
    state.push_ok("recovered", "scripted-1", 5);

    let client = client(&state, test_config(2, 1));
    let result = client.generate(&[Message::user("hi")], None).await.unwrap();
    assert_eq!(result.content, "recovered");
    assert_eq!(state.calls(), 2);
}

#[tokio::test]
async fn backoff_is_linear_in_attempt_number() {
    let state = ScriptState::shared();
    state.push_err(DerechoError::Timeout(1));
    state.push_err(DerechoError::Timeout(1));
    state.push_ok("done", "scripted-1", 1);

    let client = client(&state, test_config(2, 40));
    let start = Instant::now();
    client.generate(&[Message::user("hi")], None).await.unwrap();

    // delay x 1 before attempt 2, delay x 2 before attempt 3
    assert!(start.elapsed() >= Duration::from_millis(40 + 80));
}

#[tokio::test]
async fn invalid_override_fails_without_an_attempt() {
    let state = ScriptState::shared();
    let client = client(&state, test_config(3, 1));

    let bad = GenerationConfig {
        temperature: 5.0,
        ..test_config(3, 1)
    };
    let err = client
        .generate(&[Message::user("hi")], Some(&bad))
        .await
        .unwrap_err();

    assert!(matches!(err, DerechoError::InvalidConfig(_)));
    assert_eq!(state.calls(), 0);
}

#[tokio::test]
async fn invalid_config_replacement_keeps_the_old_config() {
    let state = ScriptState::shared();
    let client = client(&state, test_config(2, 10));

    let bad = GenerationConfig {
        max_tokens: 0,
        ..test_config(2, 10)
    };
    assert!(client.update_config(bad).is_err());
    assert_eq!(client.config().max_tokens, 2048);

    let good = GenerationConfig {
        max_tokens: 64,
        ..test_config(2, 10)
    };
    client.update_config(good).unwrap();
    assert_eq!(client.config().max_tokens, 64);
}

#[tokio::test]
async fn status_and_request_events_are_emitted() {
    let state = ScriptState::shared();
    state.push_ok("ok", "scripted-1", 7);

    let events = EventBus::new();
    let mut receiver = events.subscribe();
    let client = BackendClient::new(
        Box::new(ScriptedBackend::new("scripted", std::sync::Arc::clone(&state))),
        test_config(0, 1),
        events,
    )
    .unwrap();

    client.generate(&[Message::user("hi")], None).await.unwrap();

    let mut names = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let Event::BackendRequestCompleted {
            success, tokens, ..
        } = &event
        {
            assert!(*success);
            assert_eq!(*tokens, 7);
        }
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec![
            "backend_status_changed", // idle -> processing
            "backend_status_changed", // processing -> idle
            "backend_request_completed",
        ]
    );
}

#[tokio::test]
async fn chat_maintains_conversation_and_injects_system_prompt() {
    let state = ScriptState::shared();
    state.push_ok("hello back", "scripted-1", 4);

    let config = GenerationConfig {
        system_prompt: Some("be terse".to_string()),
        ..test_config(0, 1)
    };
    let client = client(&state, config);

    client.chat("hello").await.unwrap();

    let received = state.received.lock().unwrap();
    let messages = &received[0];
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "be terse");
    assert_eq!(messages[1].content, "hello");
    drop(received);

    assert_eq!(client.turn_counts(), (1, 1));
    assert_eq!(client.conversation()[1].content, "hello back");
}
