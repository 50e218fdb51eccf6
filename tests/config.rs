//! Generation config validation and the settings overlay.

use std::time::Duration;

use derecho::config::BackendSettings;
use derecho::error::DerechoError;
use derecho::message::GenerationConfig;

fn base() -> GenerationConfig {
    GenerationConfig {
        model: "scripted-1".to_string(),
        ..GenerationConfig::default()
    }
}

#[test]
fn defaults_are_valid() {
    assert!(base().validate().is_ok());
    let config = GenerationConfig::new("gpt-4").unwrap();
    assert_eq!(config.model, "gpt-4");
    assert_eq!(config.retry_count, 3);
    assert_eq!(config.timeout, Duration::from_secs(30));
}

#[test]
fn temperature_bounds_are_enforced() {
    for bad in [-0.1, 2.1, 100.0] {
        let config = GenerationConfig {
            temperature: bad,
            ..base()
        };
        assert!(matches!(
            config.validate(),
            Err(DerechoError::InvalidConfig(_))
        ));
    }
    for ok in [0.0, 1.0, 2.0] {
        let config = GenerationConfig {
            temperature: ok,
            ..base()
        };
        assert!(config.validate().is_ok());
    }
}

#[test]
fn top_p_and_penalties_are_bounded() {
    let config = GenerationConfig {
        top_p: 1.5,
        ..base()
    };
    assert!(config.validate().is_err());

    let config = GenerationConfig {
        frequency_penalty: -3.0,
        ..base()
    };
    assert!(config.validate().is_err());

    let config = GenerationConfig {
        presence_penalty: 2.5,
        ..base()
    };
    assert!(config.validate().is_err());
}

#[test]
fn zero_max_tokens_and_zero_timeout_are_rejected() {
    let config = GenerationConfig {
        max_tokens: 0,
        ..base()
    };
    assert!(config.validate().is_err());

    let config = GenerationConfig {
        timeout: Duration::ZERO,
        ..base()
    };
    assert!(config.validate().is_err());
}

#[test]
fn settings_overlay_only_set_fields() {
    let settings = BackendSettings {
        temperature: Some(0.2),
        retry_count: Some(7),
        retry_delay_ms: Some(250),
        timeout_secs: Some(90),
        system_prompt: Some("short answers".to_string()),
        ..BackendSettings::default()
    };

    let mut config = base();
    settings.apply_to(&mut config);

    assert_eq!(config.temperature, 0.2);
    assert_eq!(config.retry_count, 7);
    assert_eq!(config.retry_delay, Duration::from_millis(250));
    assert_eq!(config.timeout, Duration::from_secs(90));
    assert_eq!(config.system_prompt.as_deref(), Some("short answers"));
    // Untouched fields keep their values.
    assert_eq!(config.max_tokens, 2048);
    assert_eq!(config.top_p, 1.0);
}

#[test]
fn debug_output_redacts_api_keys() {
    let settings = BackendSettings {
        api_key: Some("sk-secret-value".to_string()),
        ..BackendSettings::default()
    };
    let rendered = format!("{settings:?}");
    assert!(!rendered.contains("sk-secret-value"));
    assert!(rendered.contains("REDACTED"));
}
