//! Streaming behavior at the shell seam: fragment delivery, cancellation,
//! and assembling a streamed reply back into the conversation.

mod common;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use derecho::backend::shell::BackendClient;
use derecho::events::EventBus;
use derecho::message::{GenerationConfig, Message};

use common::{ScriptState, ScriptedBackend};

fn streaming_client(state: &Arc<ScriptState>) -> BackendClient {
    let config = GenerationConfig {
        model: "scripted-1".to_string(),
        ..GenerationConfig::default()
    };
    BackendClient::new(
        Box::new(ScriptedBackend::new("scripted", Arc::clone(state))),
        config,
        EventBus::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn fragments_arrive_in_order() {
    let state = ScriptState::shared();
    *state.fragments.lock().unwrap() = vec![
        "Hel".to_string(),
        "lo ".to_string(),
        "world".to_string(),
    ];

    let client = streaming_client(&state);
    let mut stream = client
        .generate_streaming(&[Message::user("hi")], CancellationToken::new())
        .await
        .unwrap();

    let mut assembled = String::new();
    while let Some(fragment) = stream.next().await {
        assembled.push_str(&fragment.unwrap());
    }
    assert_eq!(assembled, "Hello world");
}

#[tokio::test]
async fn cancellation_stops_fragment_production() {
    let state = ScriptState::shared();
    *state.fragments.lock().unwrap() = vec!["never".to_string(); 100];

    let cancel = CancellationToken::new();
    let client = streaming_client(&state);
    let mut stream = client
        .generate_streaming(&[Message::user("hi")], cancel.clone())
        .await
        .unwrap();

    cancel.cancel();
    // The token was cancelled before the first poll; nothing is produced.
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn accumulated_fragments_can_be_pushed_as_a_turn() {
    let state = ScriptState::shared();
    *state.fragments.lock().unwrap() = vec!["str".to_string(), "eam".to_string()];

    let client = streaming_client(&state);
    client.set_conversation(vec![Message::user("go")]);

    let mut stream = client
        .generate_streaming(&[Message::user("go")], CancellationToken::new())
        .await
        .unwrap();
    let mut assembled = String::new();
    while let Some(fragment) = stream.next().await {
        assembled.push_str(&fragment.unwrap());
    }
    client.push_assistant_turn(assembled);

    assert_eq!(client.turn_counts(), (1, 1));
    assert_eq!(client.conversation()[1].content, "stream");
}
