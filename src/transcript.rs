use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::ModelInfo;
use crate::error::DerechoError;
use crate::message::{GenerationConfig, Message};

/// Self-describing export of one conversation: the ordered message list,
/// the model metadata it was held against, and the active generation
/// config at export time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub messages: Vec<Message>,
    pub model_info: ModelInfo,
    pub config: GenerationConfig,
    pub exported_at: DateTime<Utc>,
}

impl Transcript {
    pub fn new(messages: Vec<Message>, model_info: ModelInfo, config: GenerationConfig) -> Self {
        Self {
            messages,
            model_info,
            config,
            exported_at: Utc::now(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DerechoError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DerechoError::SchemaParse(format!("transcript encode: {e}")))?;
        std::fs::write(path.as_ref(), json)?;
        tracing::info!(path = %path.as_ref().display(), "exported conversation transcript");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DerechoError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let transcript: Transcript = serde_json::from_str(&json)
            .map_err(|e| DerechoError::SchemaParse(format!("transcript decode: {e}")))?;
        tracing::info!(
            path = %path.as_ref().display(),
            messages = transcript.messages.len(),
            "imported conversation transcript"
        );
        Ok(transcript)
    }
}
