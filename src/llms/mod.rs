//! Inference service abstraction.
//!
//! The bot talks to one multimodal, OpenAI-compatible endpoint. Pipelines
//! depend on the [`ChatModel`] / [`StreamingModel`] traits so tests can
//! script responses without a network.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InferenceError;

pub mod providers;
pub mod streaming;

pub use self::streaming::{StreamChunk, StreamReceiver};

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// A content part inside a mixed-content message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },
    /// An image reference, passed as a data URI.
    ImageUrl { url: String },
}

/// Message content: plain text or mixed text/image parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One role-tagged message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ModelMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user message pairing optional text with an image data URI.
    pub fn user_with_image(text: Option<&str>, image_data_uri: &str) -> Self {
        let mut parts = Vec::new();
        if let Some(text) = text {
            parts.push(ContentPart::Text {
                text: text.to_string(),
            });
        }
        parts.push(ContentPart::ImageUrl {
            url: image_data_uri.to_string(),
        });
        Self {
            role: "user".to_string(),
            content: MessageContent::Parts(parts),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ModelMessage>,
    /// Ask the endpoint for a strict JSON object response.
    pub json_mode: bool,
    pub temperature: Option<f64>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ModelMessage>) -> Self {
        Self {
            messages,
            json_mode: false,
            temperature: None,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Non-streaming completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion and return the full response text.
    async fn complete(&self, request: ChatRequest) -> Result<String, InferenceError>;
}

/// Streaming completion. Implemented alongside [`ChatModel`] by providers
/// that can deliver incremental deltas.
#[async_trait]
pub trait StreamingModel: Send + Sync {
    /// Start a streaming completion.
    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<Box<dyn StreamReceiver>, InferenceError>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Unique id correlating the log lines of one inference call.
pub fn generate_call_id() -> String {
    Uuid::new_v4().to_string()
}

/// Encode image bytes as the data URI the endpoint expects.
pub fn image_data_uri(bytes: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}
