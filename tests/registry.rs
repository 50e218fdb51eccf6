//! Registry behavior: registration, name resolution, config merging, and
//! the per-(backend, model) client cache.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use derecho::config::{AppConfig, BackendSettings};
use derecho::error::DerechoError;
use derecho::events::EventBus;
use derecho::message::GenerationConfig;
use derecho::registry::BackendRegistry;

use common::{scripted_descriptor, ScriptState};

fn registry_with(names: &[&str]) -> (BackendRegistry, Vec<Arc<ScriptState>>) {
    let registry = BackendRegistry::new(AppConfig::default(), EventBus::new());
    let mut states = Vec::new();
    for name in names {
        let state = ScriptState::shared();
        registry
            .register(scripted_descriptor(name, Arc::clone(&state)))
            .unwrap();
        states.push(state);
    }
    (registry, states)
}

#[test]
fn duplicate_registration_is_rejected() {
    let (registry, _states) = registry_with(&["alpha"]);
    let err = registry
        .register(scripted_descriptor("alpha", ScriptState::shared()))
        .unwrap_err();
    assert!(matches!(err, DerechoError::DuplicateBackend(name) if name == "alpha"));
}

#[test]
fn first_registration_becomes_default() {
    let (registry, _states) = registry_with(&["alpha", "beta"]);
    assert_eq!(registry.default_backend().as_deref(), Some("alpha"));

    registry.set_default("beta").unwrap();
    assert_eq!(registry.default_backend().as_deref(), Some("beta"));

    let err = registry.set_default("gamma").unwrap_err();
    assert!(matches!(err, DerechoError::UnknownBackend { .. }));
}

#[tokio::test]
async fn unknown_backend_carries_suggestions() {
    let (registry, _states) = registry_with(&["openai", "ollama", "anthropic"]);
    let err = registry
        .get_or_create(Some("openai-chat"), None, None)
        .await
        .unwrap_err();
    match err {
        DerechoError::UnknownBackend { name, suggestions } => {
            assert_eq!(name, "openai-chat");
            assert_eq!(suggestions, vec!["openai".to_string()]);
        }
        other => panic!("expected UnknownBackend, got {other:?}"),
    }
}

#[tokio::test]
async fn get_or_create_reuses_the_cached_client() {
    let (registry, states) = registry_with(&["alpha"]);

    let first = registry.get_or_create(Some("alpha"), None, None).await.unwrap();
    let second = registry.get_or_create(Some("alpha"), None, None).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(states[0].constructed(), 1);
}

#[tokio::test]
async fn distinct_models_get_distinct_clients() {
    let (registry, states) = registry_with(&["alpha"]);

    let default_model = registry.get_or_create(Some("alpha"), None, None).await.unwrap();
    let other_model = registry
        .get_or_create(Some("alpha"), Some("scripted-2"), None)
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&default_model, &other_model));
    assert_eq!(states[0].constructed(), 2);
    assert_eq!(registry.stats().await.cached_clients, 2);
}

#[tokio::test]
async fn unavailable_cached_client_is_rebuilt() {
    let (registry, states) = registry_with(&["alpha"]);

    let first = registry.get_or_create(Some("alpha"), None, None).await.unwrap();
    states[0].available.store(false, Ordering::SeqCst);
    let second = registry.get_or_create(Some("alpha"), None, None).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(states[0].constructed(), 2);
    // Still one cache slot for the key.
    assert_eq!(registry.stats().await.cached_clients, 1);
}

#[tokio::test]
async fn missing_name_falls_back_to_default() {
    let (registry, states) = registry_with(&["alpha"]);
    let client = registry.get_or_create(None, None, None).await.unwrap();
    assert_eq!(client.name(), "alpha");
    assert_eq!(states[0].constructed(), 1);
}

#[tokio::test]
async fn empty_registry_has_no_backend_available() {
    let registry = BackendRegistry::new(AppConfig::default(), EventBus::new());
    let err = registry.get_or_create(None, None, None).await.unwrap_err();
    assert!(matches!(err, DerechoError::NoBackendAvailable));
}

#[tokio::test]
async fn persisted_settings_override_descriptor_defaults() {
    let mut config = AppConfig::default();
    config.backends.insert(
        "alpha".to_string(),
        BackendSettings {
            temperature: Some(0.1),
            max_tokens: Some(512),
            ..BackendSettings::default()
        },
    );

    let registry = BackendRegistry::new(config, EventBus::new());
    registry
        .register(scripted_descriptor("alpha", ScriptState::shared()))
        .unwrap();

    let client = registry.get_or_create(Some("alpha"), None, None).await.unwrap();
    let merged = client.config();
    assert_eq!(merged.temperature, 0.1);
    assert_eq!(merged.max_tokens, 512);
    assert_eq!(merged.model, "scripted-1");
}

#[tokio::test]
async fn invalid_merged_config_never_reaches_a_constructor() {
    let (registry, states) = registry_with(&["alpha"]);

    let overrides = GenerationConfig {
        temperature: 9.0,
        ..GenerationConfig::default()
    };
    let err = registry
        .get_or_create(Some("alpha"), None, Some(overrides))
        .await
        .unwrap_err();

    assert!(matches!(err, DerechoError::InvalidConfig(_)));
    assert_eq!(states[0].constructed(), 0);
}

#[tokio::test]
async fn available_backends_probe_credential_free_backends() {
    let (registry, states) = registry_with(&["alpha", "beta"]);
    states[1].available.store(false, Ordering::SeqCst);

    assert_eq!(registry.available_backends().await, vec!["alpha".to_string()]);
}

#[tokio::test]
async fn cleanup_all_empties_the_cache() {
    let (registry, _states) = registry_with(&["alpha", "beta"]);
    registry.get_or_create(Some("alpha"), None, None).await.unwrap();
    registry.get_or_create(Some("beta"), None, None).await.unwrap();
    assert_eq!(registry.stats().await.cached_clients, 2);

    registry.cleanup_all().await;
    assert_eq!(registry.stats().await.cached_clients, 0);
}

#[test]
fn backend_names_are_sorted() {
    let (registry, _states) = registry_with(&["zeta", "alpha", "mid"]);
    assert_eq!(
        registry.backend_names(),
        vec!["alpha".to_string(), "mid".to_string(), "zeta".to_string()]
    );
}
