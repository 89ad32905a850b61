//! OpenAI-compatible completion provider.
//!
//! Talks to any endpoint exposing the `/chat/completions` contract via
//! `reqwest`, with retry and exponential backoff on 429/5xx, strict-JSON
//! response mode, data-URI image parts, and SSE streaming.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::error::InferenceError;
use crate::llms::streaming::{ChannelStreamReceiver, StreamChunk, StreamReceiver};
use crate::llms::{
    generate_call_id, ChatModel, ChatRequest, ContentPart, MessageContent, ModelMessage,
    StreamingModel,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: f64 = 120.0;

/// Default retry attempts beyond the first request.
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Channel depth between the SSE reader task and the consumer.
const STREAM_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// OpenAiCompatModel
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiCompatModel {
    model: String,
    api_key: String,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API base including version segment (e.g. `https://host/v1`).
    /// * `api_key` - Bearer token.
    /// * `model` - Model identifier sent with every request.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            client,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn message_to_value(message: &ModelMessage) -> Value {
        let content = match &message.content {
            MessageContent::Text(text) => Value::String(text.clone()),
            MessageContent::Parts(parts) => Value::Array(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => serde_json::json!({
                            "type": "text",
                            "text": text,
                        }),
                        ContentPart::ImageUrl { url } => serde_json::json!({
                            "type": "image_url",
                            "image_url": { "url": url },
                        }),
                    })
                    .collect(),
            ),
        };
        serde_json::json!({
            "role": message.role,
            "content": content,
        })
    }

    /// Build the request body for the chat-completions endpoint.
    pub fn build_request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(Self::message_to_value).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if request.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }

    /// POST the body, retrying transient failures with exponential backoff.
    async fn post_with_retry(
        &self,
        body: &Value,
        call_id: &str,
    ) -> Result<reqwest::Response, InferenceError> {
        let mut last_error: Option<InferenceError> = None;
        let mut retry_delay = Duration::from_secs(1);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                log::warn!(
                    "inference retry attempt {} after {:?} (call_id={})",
                    attempt,
                    retry_delay,
                    call_id
                );
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let response = match self
                .client
                .post(self.endpoint())
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(InferenceError::Request {
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    retry_delay = Duration::from_secs(retry_after);
                }
                last_error = Some(InferenceError::Api {
                    status: status.as_u16(),
                    message: "rate limited".to_string(),
                });
                continue;
            }

            if status.is_server_error() {
                last_error = Some(InferenceError::Api {
                    status: status.as_u16(),
                    message: format!("server error: {}", status),
                });
                continue;
            }

            if status.is_client_error() {
                let text = response.text().await.unwrap_or_default();
                return Err(InferenceError::Api {
                    status: status.as_u16(),
                    message: text.chars().take(500).collect(),
                });
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or_else(|| InferenceError::Request {
            message: "inference call failed after all retries".to_string(),
        }))
    }

    /// Parse a non-streaming chat-completions response.
    fn parse_response(response: &Value) -> Result<String, InferenceError> {
        let content = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| InferenceError::Malformed {
                message: "no choices[0].message.content in response".to_string(),
            })?;
        Ok(content.to_string())
    }
}

// ---------------------------------------------------------------------------
// SSE framing
// ---------------------------------------------------------------------------

/// One meaningful event on the SSE stream.
#[derive(Debug, PartialEq)]
enum SseEvent {
    /// A text fragment from `choices[0].delta.content`.
    Delta(String),
    /// Stream terminator: `data: [DONE]` or a `stop` finish reason.
    Done,
}

/// Parse one SSE line. Non-data lines, keep-alives, empty deltas, and
/// unparseable payloads all yield `None` and are skipped.
fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let value: Value = serde_json::from_str(payload).ok()?;
    let choice = value.get("choices")?.get(0)?;

    if let Some(content) = choice
        .get("delta")
        .and_then(|delta| delta.get("content"))
        .and_then(|content| content.as_str())
    {
        if !content.is_empty() {
            return Some(SseEvent::Delta(content.to_string()));
        }
    }
    if choice.get("finish_reason").and_then(|r| r.as_str()) == Some("stop") {
        return Some(SseEvent::Done);
    }
    None
}

// ---------------------------------------------------------------------------
// Trait impls
// ---------------------------------------------------------------------------

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    async fn complete(&self, request: ChatRequest) -> Result<String, InferenceError> {
        let call_id = generate_call_id();
        log::debug!(
            "completion call: model={}, messages={}, json_mode={} (call_id={})",
            self.model,
            request.messages.len(),
            request.json_mode,
            call_id
        );

        let body = self.build_request_body(&request, false);
        let response = self.post_with_retry(&body, &call_id).await?;
        let text = response
            .text()
            .await
            .map_err(|e| InferenceError::Request {
                message: e.to_string(),
            })?;
        let json: Value = serde_json::from_str(&text).map_err(|e| InferenceError::Malformed {
            message: format!("{} - body: {}", e, text.chars().take(300).collect::<String>()),
        })?;
        Self::parse_response(&json)
    }
}

#[async_trait]
impl StreamingModel for OpenAiCompatModel {
    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<Box<dyn StreamReceiver>, InferenceError> {
        let call_id = generate_call_id();
        log::debug!(
            "streaming call: model={}, messages={} (call_id={})",
            self.model,
            request.messages.len(),
            call_id
        );

        let body = self.build_request_body(&request, true);
        let response = self.post_with_retry(&body, &call_id).await?;

        let (tx, rx) = ChannelStreamReceiver::pair(STREAM_BUFFER);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut line_buffer = String::new();
            let mut full_text = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(StreamChunk::Error {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                };
                line_buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = line_buffer.find('\n') {
                    let line: String = line_buffer.drain(..=newline).collect();
                    match parse_sse_line(&line) {
                        Some(SseEvent::Delta(text)) => {
                            full_text.push_str(&text);
                            if tx.send(StreamChunk::TextDelta { text }).await.is_err() {
                                // Consumer hung up; stop reading.
                                return;
                            }
                        }
                        Some(SseEvent::Done) => {
                            let _ = tx.send(StreamChunk::Done { content: full_text }).await;
                            return;
                        }
                        None => {}
                    }
                }
            }

            // Stream ended without an explicit terminator; treat what we
            // have as the final text.
            let _ = tx.send(StreamChunk::Done { content: full_text }).await;
        });

        Ok(Box::new(rx))
    }
}
