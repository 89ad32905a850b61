//! Streaming completion support.
//!
//! The response assembler consumes incremental chunks and coalesces them
//! into throttled message edits, so the provider exposes its SSE stream as
//! a plain chunk sequence behind [`StreamReceiver`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// StreamChunk
// ---------------------------------------------------------------------------

/// A single chunk from a streaming completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// A text delta (partial content).
    TextDelta {
        /// The text fragment.
        text: String,
    },

    /// The stream is done. Carries the final assembled text.
    Done {
        /// The complete text content.
        content: String,
    },

    /// An error occurred during streaming.
    Error {
        /// Error message.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// StreamReceiver
// ---------------------------------------------------------------------------

/// Receiver for streaming chunks.
///
/// Abstracts over the underlying transport so the assembler never sees SSE
/// framing.
#[async_trait]
pub trait StreamReceiver: Send {
    /// Get the next chunk from the stream.
    ///
    /// Returns `None` once the stream is complete (after `Done` or `Error`).
    async fn next(&mut self) -> Option<StreamChunk>;
}

/// A `StreamReceiver` backed by a tokio mpsc channel.
///
/// Providers push chunks from a background task; the assembler pulls them
/// here.
pub struct ChannelStreamReceiver {
    rx: tokio::sync::mpsc::Receiver<StreamChunk>,
}

impl ChannelStreamReceiver {
    /// Create a matched sender + receiver pair.
    pub fn pair(buffer: usize) -> (tokio::sync::mpsc::Sender<StreamChunk>, Self) {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl StreamReceiver for ChannelStreamReceiver {
    async fn next(&mut self) -> Option<StreamChunk> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// StreamAccumulator
// ---------------------------------------------------------------------------

/// Accumulates streaming chunks into the full response text.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a chunk, returning `true` once the stream is finished.
    pub fn push(&mut self, chunk: &StreamChunk) -> bool {
        match chunk {
            StreamChunk::TextDelta { text } => {
                self.text.push_str(text);
                false
            }
            StreamChunk::Done { content } => {
                // The Done chunk carries the final assembled content.
                self.text = content.clone();
                true
            }
            StreamChunk::Error { .. } => true,
        }
    }

    /// The accumulated text so far.
    pub fn text(&self) -> &str {
        &self.text
    }
}
