//! Streaming response assembler.
//!
//! Consumes an incremental completion stream and coalesces it into
//! throttled message updates: the first flush creates the reply, every
//! later flush edits it to the full accumulated text. A flush fires when
//! the pending buffer outgrows the size threshold or the flush interval
//! elapses, whichever comes first; the stream end flushes any remainder.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{InferenceError, TransportError};
use crate::llms::{ChatRequest, StreamChunk, StreamingModel};
use crate::transport::{ChannelRef, ChatTransport, MessageHandle, MessageId};
use crate::translations::{fill, Strings};

pub mod policy;

use self::policy::{AmbientPolicy, AMBIENT_JITTER_SECS};

// ---------------------------------------------------------------------------
// Reply mode
// ---------------------------------------------------------------------------

/// How the first flush lands in the channel.
#[derive(Debug, Clone)]
pub enum ReplyMode {
    /// Threaded reply to the triggering message.
    Awakened { reply_to: MessageId },
    /// Plain channel send, used for unaddressed ambient chat.
    Ambient,
}

impl ReplyMode {
    fn is_ambient(&self) -> bool {
        matches!(self, ReplyMode::Ambient)
    }
}

// ---------------------------------------------------------------------------
// ResponseAssembler
// ---------------------------------------------------------------------------

/// Flush thresholds, taken from [`crate::config::BotConfig`].
#[derive(Debug, Clone, Copy)]
pub struct FlushOptions {
    pub flush_chars: usize,
    pub flush_interval: Duration,
}

/// Drives one streamed reply from request to delivered message.
pub struct ResponseAssembler<'a> {
    model: &'a dyn StreamingModel,
    transport: &'a dyn ChatTransport,
    policy: &'a dyn AmbientPolicy,
    strings: &'a Strings,
    options: FlushOptions,
}

impl<'a> ResponseAssembler<'a> {
    pub fn new(
        model: &'a dyn StreamingModel,
        transport: &'a dyn ChatTransport,
        policy: &'a dyn AmbientPolicy,
        strings: &'a Strings,
        options: FlushOptions,
    ) -> Self {
        Self {
            model,
            transport,
            policy,
            strings,
            options,
        }
    }

    /// Stream one reply into `channel`.
    ///
    /// On success returns the handle of the delivered message (None when
    /// the model produced no text at all). On failure the error has already
    /// been surfaced per policy: an existing reply is edited to the error
    /// text, an ambient reply that never materialized is only logged.
    pub async fn run(
        &self,
        channel: &ChannelRef,
        mode: ReplyMode,
        request: ChatRequest,
    ) -> Result<Option<MessageHandle>, InferenceError> {
        if mode.is_ambient() {
            // A beat of hesitation keeps unaddressed replies from looking
            // mechanical.
            tokio::time::sleep(self.policy.jitter_delay(AMBIENT_JITTER_SECS)).await;
        }

        let mut receiver = match self.model.stream(request).await {
            Ok(receiver) => receiver,
            Err(e) => {
                self.deliver_error(channel, &mode, None, &e).await;
                return Err(e);
            }
        };

        let mut full = String::new();
        let mut pending = String::new();
        let mut handle: Option<MessageHandle> = None;
        let mut last_flush = Instant::now();

        let outcome: Result<(), InferenceError> = loop {
            tokio::select! {
                chunk = receiver.next() => match chunk {
                    Some(StreamChunk::TextDelta { text }) => {
                        full.push_str(&text);
                        pending.push_str(&text);
                        if pending.chars().count() > self.options.flush_chars {
                            if let Err(e) = self
                                .flush(channel, &mode, &mut handle, &full, &mut pending, &mut last_flush)
                                .await
                            {
                                break Err(stream_error(e));
                            }
                        }
                    }
                    Some(StreamChunk::Done { content }) => {
                        // The terminator carries the authoritative full text.
                        full = content;
                        break Ok(());
                    }
                    Some(StreamChunk::Error { message }) => {
                        break Err(InferenceError::Stream { message });
                    }
                    None => break Ok(()),
                },
                _ = tokio::time::sleep_until(last_flush + self.options.flush_interval),
                    if !pending.is_empty() =>
                {
                    if let Err(e) = self
                        .flush(channel, &mode, &mut handle, &full, &mut pending, &mut last_flush)
                        .await
                    {
                        break Err(stream_error(e));
                    }
                }
            }
        };

        match outcome {
            Ok(()) => {
                let needs_final = !pending.is_empty() || (handle.is_none() && !full.is_empty());
                if needs_final {
                    if let Err(e) = self
                        .flush(channel, &mode, &mut handle, &full, &mut pending, &mut last_flush)
                        .await
                    {
                        let e = stream_error(e);
                        self.deliver_error(channel, &mode, handle.as_ref(), &e).await;
                        return Err(e);
                    }
                }
                Ok(handle)
            }
            Err(e) => {
                self.deliver_error(channel, &mode, handle.as_ref(), &e).await;
                Err(e)
            }
        }
    }

    /// Create the reply on first flush, edit it to the full text afterwards.
    async fn flush(
        &self,
        channel: &ChannelRef,
        mode: &ReplyMode,
        handle: &mut Option<MessageHandle>,
        full: &str,
        pending: &mut String,
        last_flush: &mut Instant,
    ) -> Result<(), TransportError> {
        if !full.is_empty() {
            match handle {
                Some(existing) => self.transport.edit(existing, full).await?,
                None => {
                    let created = match mode {
                        ReplyMode::Awakened { reply_to } => {
                            self.transport.reply(channel, reply_to, full).await?
                        }
                        ReplyMode::Ambient => self.transport.send(channel, full).await?,
                    };
                    *handle = Some(created);
                }
            }
        }
        pending.clear();
        *last_flush = Instant::now();
        Ok(())
    }

    /// Surface a failure: edit the reply if one exists, otherwise only log.
    /// Ambient replies are best-effort and never error into the channel.
    async fn deliver_error(
        &self,
        _channel: &ChannelRef,
        mode: &ReplyMode,
        handle: Option<&MessageHandle>,
        error: &InferenceError,
    ) {
        match handle {
            Some(existing) => {
                let text = fill(
                    self.strings.reply("error_chat"),
                    &[("error", &error.to_string())],
                );
                if let Err(e) = self.transport.edit(existing, &text).await {
                    tracing::warn!("failed to edit error into reply: {}", e);
                }
            }
            None => {
                if mode.is_ambient() {
                    tracing::warn!("ambient reply failed silently: {}", error);
                } else {
                    tracing::warn!("awakened reply failed before creation: {}", error);
                }
            }
        }
    }
}

fn stream_error(e: TransportError) -> InferenceError {
    InferenceError::Stream {
        message: e.to_string(),
    }
}
