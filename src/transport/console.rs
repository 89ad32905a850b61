//! Console transport for local development.
//!
//! Renders sends and edits to stdout and keeps an in-memory ledger of sent
//! messages so edit/delete/fetch behave like a real channel. Attachment
//! URLs may be local file paths, which makes it possible to exercise the
//! vision pipelines without a gateway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::TransportError;
use super::{
    Attachment, ChannelRef, ChatTransport, HistoryMessage, MessageHandle, MessageId,
    MessageSnapshot,
};

/// In-memory, stdout-backed transport.
pub struct ConsoleTransport {
    next_id: AtomicU64,
    /// Message ledger: id → (author, content, attachments).
    ledger: Mutex<HashMap<String, MessageSnapshot>>,
    /// Insertion order for history queries.
    order: Mutex<Vec<String>>,
    http: reqwest::Client,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ledger: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Record an inbound line typed by the operator so it shows up in
    /// history for ambient/awakened transcripts.
    pub fn record_inbound(&self, author_name: &str, content: &str) -> MessageId {
        self.insert("user", author_name, content, Vec::new())
    }

    fn insert(
        &self,
        _kind: &str,
        author_name: &str,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> MessageId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let snapshot = MessageSnapshot {
            id: MessageId(id.clone()),
            author_name: author_name.to_string(),
            content: content.to_string(),
            attachments,
        };
        self.ledger.lock().insert(id.clone(), snapshot);
        self.order.lock().push(id.clone());
        MessageId(id)
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send(
        &self,
        channel: &ChannelRef,
        text: &str,
    ) -> Result<MessageHandle, TransportError> {
        let id = self.insert("bot", "bot", text, Vec::new());
        println!("[{}] <bot #{}> {}", channel, id, text);
        Ok(MessageHandle {
            channel: channel.clone(),
            id,
        })
    }

    async fn reply(
        &self,
        channel: &ChannelRef,
        to: &MessageId,
        text: &str,
    ) -> Result<MessageHandle, TransportError> {
        let id = self.insert("bot", "bot", text, Vec::new());
        println!("[{}] <bot #{} replying to #{}> {}", channel, id, to, text);
        Ok(MessageHandle {
            channel: channel.clone(),
            id,
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), TransportError> {
        let mut ledger = self.ledger.lock();
        match ledger.get_mut(&handle.id.0) {
            Some(entry) => {
                entry.content = text.to_string();
                println!("[{}] <bot #{} edited> {}", handle.channel, handle.id, text);
                Ok(())
            }
            None => Err(TransportError::NotFound {
                id: handle.id.0.clone(),
            }),
        }
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), TransportError> {
        let removed = self.ledger.lock().remove(&handle.id.0);
        self.order.lock().retain(|id| id != &handle.id.0);
        match removed {
            Some(_) => {
                println!("[{}] <bot #{} deleted>", handle.channel, handle.id);
                Ok(())
            }
            None => Err(TransportError::NotFound {
                id: handle.id.0.clone(),
            }),
        }
    }

    async fn fetch_message(
        &self,
        _channel: &ChannelRef,
        id: &MessageId,
    ) -> Result<MessageSnapshot, TransportError> {
        self.ledger
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
        let order = self.order.lock();
        let ledger = self.ledger.lock();
        let start = order.len().saturating_sub(limit);
        Ok(order[start..]
            .iter()
            .filter_map(|id| ledger.get(id))
            .map(|snap| HistoryMessage {
                author_name: snap.author_name.clone(),
                content: snap.content.clone(),
            })
            .collect())
    }

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, TransportError> {
        if attachment.url.starts_with("http://") || attachment.url.starts_with("https://") {
            let resp = self.http.get(&attachment.url).send().await.map_err(|e| {
                TransportError::SendFailed {
                    message: e.to_string(),
                }
            })?;
            let status = resp.status().as_u16();
            if status != 200 {
                return Err(TransportError::DownloadFailed {
                    url: attachment.url.clone(),
                    status,
                });
            }
            resp.bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| TransportError::SendFailed {
                    message: e.to_string(),
                })
        } else {
            tokio::fs::read(&attachment.url)
                .await
                .map_err(|_| TransportError::DownloadFailed {
                    url: attachment.url.clone(),
                    status: 0,
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_edit_delete_roundtrip() {
        let transport = ConsoleTransport::new();
        let channel = ChannelRef("dev".into());

        let handle = transport.send(&channel, "first").await.unwrap();
        transport.edit(&handle, "second").await.unwrap();

        let snap = transport.fetch_message(&channel, &handle.id).await.unwrap();
        assert_eq!(snap.content, "second");

        transport.delete(&handle).await.unwrap();
        let err = transport.edit(&handle, "third").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_history_order_and_limit() {
        let transport = ConsoleTransport::new();
        let channel = ChannelRef("dev".into());

        transport.record_inbound("amy", "one");
        transport.send(&channel, "two").await.unwrap();
        transport.record_inbound("amy", "three");

        let history = transport.recent_history(&channel, 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "two");
        assert_eq!(history[1].content, "three");
    }

    #[tokio::test]
    async fn test_deleted_messages_leave_history() {
        let transport = ConsoleTransport::new();
        let channel = ChannelRef("dev".into());

        let handle = transport.send(&channel, "temp").await.unwrap();
        transport.delete(&handle).await.unwrap();

        let history = transport.recent_history(&channel, 10).await.unwrap();
        assert!(history.is_empty());
    }
}
