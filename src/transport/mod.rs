//! Messaging transport abstraction.
//!
//! The chat platform (gateway, event delivery, attachment hosting) is an
//! external collaborator. The bot core only ever talks to it through
//! [`ChatTransport`], so the router and pipelines can be driven by the real
//! gateway, the console transport, or a test double interchangeably.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub mod console;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque user identity assigned by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Opaque channel reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef(pub String);

/// Opaque message identifier within a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Message shapes
// ---------------------------------------------------------------------------

/// File extensions the bot treats as images.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

/// An attachment reference on a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
}

impl Attachment {
    /// Whether the filename carries a recognized image extension.
    pub fn is_image(&self) -> bool {
        let lower = self.filename.to_lowercase();
        IMAGE_EXTENSIONS
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext)))
    }
}

/// An inbound message delivered to the router.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: MessageId,
    pub channel: ChannelRef,
    pub author_id: UserId,
    /// Display name used in transcripts and replies.
    pub author_name: String,
    /// Set for messages from any bot account, including this one.
    pub author_is_bot: bool,
    /// Whether the gateway resolved a direct mention of this bot.
    pub mentions_bot: bool,
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// The message this one replies to, when the platform links one.
    pub reply_to: Option<MessageId>,
}

impl InboundMessage {
    /// First recognized image attachment, if any.
    pub fn first_image(&self) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.is_image())
    }
}

/// A message fetched back from the platform (reply-reference resolution).
#[derive(Debug, Clone)]
pub struct MessageSnapshot {
    pub id: MessageId,
    pub author_name: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

impl MessageSnapshot {
    pub fn first_image(&self) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.is_image())
    }
}

/// One line of channel history, oldest first when returned in a batch.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub author_name: String,
    pub content: String,
}

/// Handle to a message this bot sent; required for edits and deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub channel: ChannelRef,
    pub id: MessageId,
}

/// A member-join notification. Thin: the router only greets.
#[derive(Debug, Clone)]
pub struct MemberJoin {
    pub user_id: UserId,
    pub display_name: String,
    /// Channel where the greeting should land.
    pub channel: ChannelRef,
}

// ---------------------------------------------------------------------------
// ChatTransport trait
// ---------------------------------------------------------------------------

/// Operations the bot core needs from the chat platform.
///
/// Every method is a suspension point; implementations perform network I/O.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a plain channel message.
    async fn send(&self, channel: &ChannelRef, text: &str)
        -> Result<MessageHandle, TransportError>;

    /// Send a threaded reply to an existing message.
    async fn reply(
        &self,
        channel: &ChannelRef,
        to: &MessageId,
        text: &str,
    ) -> Result<MessageHandle, TransportError>;

    /// Replace a sent message's text in full. The platform has no partial
    /// edits, so callers always pass the complete new body.
    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), TransportError>;

    /// Delete a sent message.
    async fn delete(&self, handle: &MessageHandle) -> Result<(), TransportError>;

    /// Fetch a single message, used to resolve reply references.
    async fn fetch_message(
        &self,
        channel: &ChannelRef,
        id: &MessageId,
    ) -> Result<MessageSnapshot, TransportError>;

    /// The most recent `limit` messages in chronological order.
    async fn recent_history(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, TransportError>;

    /// Download an attachment's bytes.
    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, TransportError>;
}

// ---------------------------------------------------------------------------
// Delivery helper
// ---------------------------------------------------------------------------

/// Deliver `text` by editing `placeholder` when one survives, falling back
/// to a fresh send if the placeholder is gone or was never created.
pub async fn deliver(
    transport: &dyn ChatTransport,
    placeholder: Option<&MessageHandle>,
    channel: &ChannelRef,
    text: &str,
) -> Result<(), TransportError> {
    if let Some(handle) = placeholder {
        match transport.edit(handle, text).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() => {
                // Placeholder was deleted out from under us; retry as a send.
            }
            Err(e) => return Err(e),
        }
    }
    transport.send(channel, text).await.map(|_| ())
}

/// Split long reply text into chunks the platform accepts, breaking on line
/// boundaries where possible.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.split_inclusive('\n') {
        if !current.is_empty() && current.chars().count() + line.chars().count() > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        // A single oversized line still gets hard-split.
        if line.chars().count() > max_chars {
            for ch in line.chars() {
                if current.chars().count() >= max_chars {
                    chunks.push(std::mem::take(&mut current));
                }
                current.push(ch);
            }
        } else {
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
