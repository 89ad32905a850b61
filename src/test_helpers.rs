//! Test doubles shared across module tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{InferenceError, SearchError, TransportError};
use crate::llms::streaming::{ChannelStreamReceiver, StreamChunk, StreamReceiver};
use crate::llms::{ChatModel, ChatRequest, StreamingModel};
use crate::search::{SearchClient, SearchResult};
use crate::transport::{
    Attachment, ChannelRef, ChatTransport, HistoryMessage, MessageHandle, MessageId,
    MessageSnapshot,
};

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

/// One observed transport operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportOp {
    Send { id: String, text: String },
    Reply { id: String, to: String, text: String },
    Edit { id: String, text: String },
    Delete { id: String },
}

/// Transport double that records every operation and serves scripted
/// snapshots, history, and downloads.
#[derive(Default)]
pub struct RecordingTransport {
    next_id: AtomicU64,
    pub ops: Mutex<Vec<TransportOp>>,
    pub history: Mutex<Vec<HistoryMessage>>,
    pub snapshots: Mutex<HashMap<String, MessageSnapshot>>,
    pub downloads: Mutex<HashMap<String, Vec<u8>>>,
    /// Ids whose edits/deletes report NotFound.
    pub dead_ids: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(100),
            ..Self::default()
        }
    }

    pub fn set_history(&self, history: Vec<HistoryMessage>) {
        *self.history.lock() = history;
    }

    pub fn add_snapshot(&self, snapshot: MessageSnapshot) {
        self.snapshots.lock().insert(snapshot.id.0.clone(), snapshot);
    }

    pub fn add_download(&self, url: &str, bytes: Vec<u8>) {
        self.downloads.lock().insert(url.to_string(), bytes);
    }

    /// Make future edits/deletes of this id fail with NotFound.
    pub fn kill(&self, id: &MessageId) {
        self.dead_ids.lock().push(id.0.clone());
    }

    pub fn ops(&self) -> Vec<TransportOp> {
        self.ops.lock().clone()
    }

    /// Text of every Send/Reply/Edit in order.
    pub fn texts(&self) -> Vec<String> {
        self.ops
            .lock()
            .iter()
            .map(|op| match op {
                TransportOp::Send { text, .. }
                | TransportOp::Reply { text, .. }
                | TransportOp::Edit { text, .. } => text.clone(),
                TransportOp::Delete { .. } => String::new(),
            })
            .collect()
    }

    fn fresh_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(
        &self,
        channel: &ChannelRef,
        text: &str,
    ) -> Result<MessageHandle, TransportError> {
        let id = self.fresh_id();
        self.ops.lock().push(TransportOp::Send {
            id: id.clone(),
            text: text.to_string(),
        });
        Ok(MessageHandle {
            channel: channel.clone(),
            id: MessageId(id),
        })
    }

    async fn reply(
        &self,
        channel: &ChannelRef,
        to: &MessageId,
        text: &str,
    ) -> Result<MessageHandle, TransportError> {
        let id = self.fresh_id();
        self.ops.lock().push(TransportOp::Reply {
            id: id.clone(),
            to: to.0.clone(),
            text: text.to_string(),
        });
        Ok(MessageHandle {
            channel: channel.clone(),
            id: MessageId(id),
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), TransportError> {
        if self.dead_ids.lock().contains(&handle.id.0) {
            return Err(TransportError::NotFound {
                id: handle.id.0.clone(),
            });
        }
        self.ops.lock().push(TransportOp::Edit {
            id: handle.id.0.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), TransportError> {
        if self.dead_ids.lock().contains(&handle.id.0) {
            return Err(TransportError::NotFound {
                id: handle.id.0.clone(),
            });
        }
        self.ops.lock().push(TransportOp::Delete {
            id: handle.id.0.clone(),
        });
        Ok(())
    }

    async fn fetch_message(
        &self,
        _channel: &ChannelRef,
        id: &MessageId,
    ) -> Result<MessageSnapshot, TransportError> {
        self.snapshots
            .lock()
            .get(&id.0)
            .cloned()
            .ok_or_else(|| TransportError::NotFound { id: id.0.clone() })
    }

    async fn recent_history(
        &self,
        _channel: &ChannelRef,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, TransportError> {
        let history = self.history.lock();
        let start = history.len().saturating_sub(limit);
        Ok(history[start..].to_vec())
    }

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, TransportError> {
        self.downloads
            .lock()
            .get(&attachment.url)
            .cloned()
            .ok_or_else(|| TransportError::DownloadFailed {
                url: attachment.url.clone(),
                status: 404,
            })
    }
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

/// Model double with queued completion results and streams.
#[derive(Default)]
pub struct ScriptedModel {
    completions: Mutex<VecDeque<Result<String, InferenceError>>>,
    streams: Mutex<VecDeque<Vec<StreamChunk>>>,
    /// Every completion request, in call order.
    pub requests: Mutex<Vec<ChatRequest>>,
    /// Every streaming request, in call order.
    pub stream_requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_completion(&self, text: &str) {
        self.completions.lock().push_back(Ok(text.to_string()));
    }

    pub fn push_completion_error(&self) {
        self.completions.lock().push_back(Err(InferenceError::Request {
            message: "scripted network failure".to_string(),
        }));
    }

    pub fn push_stream(&self, chunks: Vec<StreamChunk>) {
        self.streams.lock().push_back(chunks);
    }

    /// Convenience: a stream delivering one delta then a clean finish.
    pub fn push_stream_text(&self, text: &str) {
        self.push_stream(vec![
            StreamChunk::TextDelta {
                text: text.to_string(),
            },
            StreamChunk::Done {
                content: text.to_string(),
            },
        ]);
    }

    pub fn completion_calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: ChatRequest) -> Result<String, InferenceError> {
        self.requests.lock().push(request);
        self.completions
            .lock()
            .pop_front()
            .unwrap_or_else(|| {
                Err(InferenceError::Request {
                    message: "unscripted completion call".to_string(),
                })
            })
    }
}

// ---------------------------------------------------------------------------
// ScriptedSearch
// ---------------------------------------------------------------------------

/// Search double with queued per-query results.
#[derive(Default)]
pub struct ScriptedSearch {
    results: Mutex<VecDeque<Result<Vec<SearchResult>, SearchError>>>,
    pub queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_results(&self, results: Vec<(&str, &str, &str)>) {
        self.results.lock().push_back(Ok(results
            .into_iter()
            .map(|(title, body, url)| SearchResult {
                title: title.to_string(),
                body: body.to_string(),
                url: url.to_string(),
            })
            .collect()));
    }

    pub fn push_error(&self) {
        self.results.lock().push_back(Err(SearchError::Request {
            message: "scripted search failure".to_string(),
        }));
    }
}

#[async_trait]
impl SearchClient for ScriptedSearch {
    async fn search(
        &self,
        query: &str,
        _max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        self.queries.lock().push(query.to_string());
        self.results.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait]
impl StreamingModel for ScriptedModel {
    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<Box<dyn StreamReceiver>, InferenceError> {
        self.stream_requests.lock().push(request);
        let chunks = self
            .streams
            .lock()
            .pop_front()
            .ok_or_else(|| InferenceError::Request {
                message: "unscripted stream call".to_string(),
            })?;
        let (tx, rx) = ChannelStreamReceiver::pair(64);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::new(rx))
    }
}
