//! Intent router: the per-message decision chain.
//!
//! Every inbound message runs through an ordered rule table; the first rule
//! that claims it handles it and the chain stops. Precedence lives in the
//! table, not in code layout, so each rule is independently testable.
//!
//! Session lifecycle note: expiry is evaluated lazily at the top of
//! `handle_message`, before any rule runs, so an expired session can never
//! influence routing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chat::policy::AmbientPolicy;
use crate::chat::{FlushOptions, ReplyMode, ResponseAssembler};
use crate::config::BotConfig;
use crate::lexicon::LexiconIndex;
use crate::llms::{ChatModel, StreamingModel};
use crate::persona;
use crate::prompt_gen::PromptGenerator;
use crate::search::SearchClient;
use crate::session::{SessionState, SessionStore};
use crate::transport::{
    split_chunks, Attachment, ChatTransport, InboundMessage, MemberJoin, MessageSnapshot,
};
use crate::translations::{fill, Strings};
use crate::vision::investigate::Investigator;
use crate::vision::VisionPipeline;

// ---------------------------------------------------------------------------
// Control commands
// ---------------------------------------------------------------------------

/// Reverse-prompt trigger (exact match).
pub const CMD_REVERSE: &str = "reverse";
/// Idea-generation trigger (fixed prefix; the payload follows).
pub const CMD_GENERATE_PREFIX: &str = "draw ";
/// Lexicon category listing trigger.
pub const CMD_CATEGORY_LIST: &str = "tags";
/// Ambient chat toggles.
pub const CMD_AMBIENT_ON: &str = "chat on";
pub const CMD_AMBIENT_OFF: &str = "chat off";
/// Abort the pending category selection.
pub const CMD_CANCEL: &str = "cancel";

/// Platform reply length ceiling used when chunking long listings.
const REPLY_CHUNK_CHARS: usize = 1900;

// ---------------------------------------------------------------------------
// Rule table
// ---------------------------------------------------------------------------

/// Everything a routing predicate may look at. Pure data: predicates do no
/// I/O and take no locks.
#[derive(Debug)]
pub(crate) struct MessageView<'a> {
    pub content: &'a str,
    pub content_lower: String,
    pub author_is_bot: bool,
    /// Direct mention, not itself a reply (reply-context wake goes through
    /// the reverse/wake-target paths instead).
    pub mentioned_directly: bool,
    /// The bot's display name appears in the text.
    pub name_called: bool,
    pub has_attachments: bool,
    pub first_attachment_is_image: bool,
    pub awaiting_choice: bool,
    pub chatting: bool,
    pub is_exit_keyword: bool,
}

/// What the chain decided to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Intent {
    Ignore,
    AmbientOn,
    AmbientOff,
    CategoryList,
    Cancel,
    CategorySelect,
    ReversePrompt,
    Generate,
    Wake,
    SessionTurn,
    ImageCompliment,
    AmbientChance,
    NoAction,
}

struct Rule {
    name: &'static str,
    matches: fn(&MessageView) -> Option<Intent>,
}

/// The decision chain, in priority order. First match wins.
const RULES: &[Rule] = &[
    Rule {
        name: "ignore-bots",
        matches: |v| v.author_is_bot.then_some(Intent::Ignore),
    },
    Rule {
        name: "ambient-on",
        matches: |v| (v.content_lower == CMD_AMBIENT_ON).then_some(Intent::AmbientOn),
    },
    Rule {
        name: "ambient-off",
        matches: |v| (v.content_lower == CMD_AMBIENT_OFF).then_some(Intent::AmbientOff),
    },
    Rule {
        name: "category-list",
        matches: |v| (v.content_lower == CMD_CATEGORY_LIST).then_some(Intent::CategoryList),
    },
    Rule {
        name: "cancel",
        matches: |v| (v.content_lower == CMD_CANCEL).then_some(Intent::Cancel),
    },
    Rule {
        name: "category-select",
        matches: |v| v.awaiting_choice.then_some(Intent::CategorySelect),
    },
    Rule {
        name: "reverse-prompt",
        matches: |v| (v.content_lower == CMD_REVERSE).then_some(Intent::ReversePrompt),
    },
    Rule {
        name: "generate",
        matches: |v| {
            // A bare "draw" still claims the message so the usage error can
            // explain the payload.
            (v.content_lower.starts_with(CMD_GENERATE_PREFIX)
                || v.content_lower == CMD_GENERATE_PREFIX.trim_end())
            .then_some(Intent::Generate)
        },
    },
    Rule {
        name: "wake",
        matches: |v| {
            ((v.mentioned_directly || v.name_called) && !v.chatting).then_some(Intent::Wake)
        },
    },
    Rule {
        name: "session-turn",
        matches: |v| v.chatting.then_some(Intent::SessionTurn),
    },
    Rule {
        name: "image-compliment",
        matches: |v| {
            (v.has_attachments && v.first_attachment_is_image)
                .then_some(Intent::ImageCompliment)
        },
    },
    Rule {
        name: "ambient-chance",
        matches: |v| (!v.has_attachments).then_some(Intent::AmbientChance),
    },
];

pub(crate) fn classify(view: &MessageView) -> (&'static str, Intent) {
    for rule in RULES {
        if let Some(intent) = (rule.matches)(view) {
            return (rule.name, intent);
        }
    }
    ("none", Intent::NoAction)
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Per-message dispatcher wiring sessions, pipelines, and the transport
/// together. One instance per process.
pub struct Router {
    config: BotConfig,
    strings: Strings,
    lexicon: Arc<LexiconIndex>,
    sessions: Arc<SessionStore>,
    transport: Arc<dyn ChatTransport>,
    chat_model: Arc<dyn ChatModel>,
    stream_model: Arc<dyn StreamingModel>,
    search: Option<Arc<dyn SearchClient>>,
    policy: Arc<dyn AmbientPolicy>,
    ambient_enabled: AtomicBool,
    guide: String,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BotConfig,
        strings: Strings,
        lexicon: Arc<LexiconIndex>,
        sessions: Arc<SessionStore>,
        transport: Arc<dyn ChatTransport>,
        chat_model: Arc<dyn ChatModel>,
        stream_model: Arc<dyn StreamingModel>,
        search: Option<Arc<dyn SearchClient>>,
        policy: Arc<dyn AmbientPolicy>,
    ) -> Self {
        let ambient_enabled = AtomicBool::new(config.ambient_enabled);
        let guide = config.prompt_guide();
        Self {
            config,
            strings,
            lexicon,
            sessions,
            transport,
            chat_model,
            stream_model,
            search,
            policy,
            ambient_enabled,
            guide,
        }
    }

    /// Whether ambient chat currently fires. Benign races with the toggle
    /// commands are accepted.
    pub fn ambient_enabled(&self) -> bool {
        self.ambient_enabled.load(Ordering::Relaxed)
    }

    fn view_of<'a>(&self, msg: &'a InboundMessage, content: &'a str) -> MessageView<'a> {
        let content_lower = content.to_lowercase();
        MessageView {
            content,
            author_is_bot: msg.author_is_bot,
            mentioned_directly: msg.mentions_bot && msg.reply_to.is_none(),
            name_called: content.contains(&self.config.bot_name),
            has_attachments: !msg.attachments.is_empty(),
            first_attachment_is_image: msg
                .attachments
                .first()
                .map(Attachment::is_image)
                .unwrap_or(false),
            awaiting_choice: self
                .sessions
                .is_in_state(&msg.author_id, SessionState::AwaitingCategoryChoice),
            chatting: self
                .sessions
                .is_in_state(&msg.author_id, SessionState::Chatting),
            is_exit_keyword: self.config.exit_keywords.contains(&content_lower),
            content_lower,
        }
    }

    /// Handle one inbound message. Exactly one rule fires; failures inside
    /// a handler are contained and never poison later messages.
    pub async fn handle_message(&self, msg: InboundMessage) {
        // Lazy expiry runs before any other logic for this user.
        self.sessions
            .purge_expired(&msg.author_id, self.config.session_timeout);

        let content = msg.content.trim().to_string();
        let view = self.view_of(&msg, &content);
        let (rule, intent) = classify(&view);
        let is_exit = view.is_exit_keyword;
        tracing::debug!(rule, ?intent, user = %msg.author_id, "routed message");

        match intent {
            Intent::Ignore | Intent::NoAction => {}
            Intent::AmbientOn => {
                self.ambient_enabled.store(true, Ordering::Relaxed);
                self.reply_to(&msg, self.strings.reply("ambient_on")).await;
            }
            Intent::AmbientOff => {
                self.ambient_enabled.store(false, Ordering::Relaxed);
                self.reply_to(&msg, self.strings.reply("ambient_off")).await;
            }
            Intent::CategoryList => self.handle_category_list(&msg).await,
            Intent::Cancel => self.handle_cancel(&msg).await,
            Intent::CategorySelect => self.handle_category_select(&msg, &content).await,
            Intent::ReversePrompt => self.handle_reverse(&msg).await,
            Intent::Generate => self.handle_generate(&msg, &content).await,
            Intent::Wake => self.handle_wake(&msg, &content).await,
            Intent::SessionTurn => self.handle_session_turn(&msg, &content, is_exit).await,
            Intent::ImageCompliment => self.handle_compliment(&msg).await,
            Intent::AmbientChance => self.handle_ambient_chance(&msg).await,
        }
    }

    /// Thin member-join hook: greet and move on.
    pub async fn handle_member_join(&self, join: MemberJoin) {
        let text = fill(
            self.strings.reply("welcome"),
            &[
                ("user", join.display_name.as_str()),
                ("bot", self.config.bot_name.as_str()),
            ],
        );
        if let Err(e) = self.transport.send(&join.channel, &text).await {
            tracing::warn!("welcome message failed: {}", e);
        }
    }

    // --- Small helpers ---

    async fn reply_to(&self, msg: &InboundMessage, text: &str) {
        if let Err(e) = self.transport.reply(&msg.channel, &msg.id, text).await {
            tracing::warn!("reply failed: {}", e);
        }
    }

    async fn reply_chunked(&self, msg: &InboundMessage, text: &str) {
        for chunk in split_chunks(text, REPLY_CHUNK_CHARS) {
            self.reply_to(msg, &chunk).await;
        }
    }

    fn assembler(&self) -> ResponseAssembler<'_> {
        ResponseAssembler::new(
            self.stream_model.as_ref(),
            self.transport.as_ref(),
            self.policy.as_ref(),
            &self.strings,
            FlushOptions {
                flush_chars: self.config.flush_chars,
                flush_interval: self.config.flush_interval,
            },
        )
    }

    // --- Lexicon control commands ---

    async fn handle_category_list(&self, msg: &InboundMessage) {
        if self.lexicon.is_empty() {
            self.reply_to(msg, self.strings.reply("lexicon_not_loaded")).await;
            return;
        }
        let listing = self
            .lexicon
            .categories()
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{}. {}", i + 1, name))
            .collect::<Vec<_>>()
            .join("\n");
        let text = format!(
            "{}\n\n{}\n\n{}",
            self.strings.reply("category_list_header"),
            listing,
            self.strings.reply("category_list_footer"),
        );
        self.reply_chunked(msg, &text).await;
        self.sessions
            .create(&msg.author_id, SessionState::AwaitingCategoryChoice);
    }

    async fn handle_cancel(&self, msg: &InboundMessage) {
        if self
            .sessions
            .is_in_state(&msg.author_id, SessionState::AwaitingCategoryChoice)
        {
            self.sessions.delete(&msg.author_id);
            self.reply_to(msg, self.strings.reply("cancelled")).await;
        }
    }

    async fn handle_category_select(&self, msg: &InboundMessage, content: &str) {
        // A selection attempt is terminal either way; the user re-issues
        // the listing command to try again.
        self.sessions.delete(&msg.author_id);

        let lower = content.to_lowercase();
        let chosen = match lower.parse::<usize>() {
            Ok(index) => self.lexicon.category_by_index(index),
            Err(_) => self
                .lexicon
                .categories()
                .iter()
                .find(|name| name.to_lowercase() == lower)
                .and_then(|name| {
                    self.lexicon
                        .category_entries(name)
                        .map(|entries| (*name, entries))
                }),
        };

        match chosen {
            Some((name, entries)) if entries.is_empty() => {
                let text = fill(self.strings.reply("category_empty"), &[("category", name)]);
                self.reply_to(msg, &text).await;
            }
            Some((name, entries)) => {
                let mut text =
                    fill(self.strings.reply("category_header"), &[("category", name)]);
                text.push('\n');
                for entry in entries {
                    text.push_str(&format!("- {} (`{}`)\n", entry.translation, entry.term));
                }
                self.reply_chunked(msg, &text).await;
            }
            None => {
                self.reply_to(msg, self.strings.reply("category_invalid")).await;
            }
        }
    }

    // --- Image commands ---

    /// Resolve the message an image command targets: the referenced message
    /// when replying, the message itself otherwise.
    async fn resolve_target(&self, msg: &InboundMessage) -> Result<MessageSnapshot, ()> {
        match &msg.reply_to {
            Some(reference) => self
                .transport
                .fetch_message(&msg.channel, reference)
                .await
                .map_err(|e| {
                    tracing::debug!("reply reference fetch failed: {}", e);
                }),
            None => Ok(MessageSnapshot {
                id: msg.id.clone(),
                author_name: msg.author_name.clone(),
                content: msg.content.clone(),
                attachments: msg.attachments.clone(),
            }),
        }
    }

    async fn download_image(&self, msg: &InboundMessage, attachment: &Attachment) -> Option<Vec<u8>> {
        match self.transport.download(attachment).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!("attachment download failed: {}", e);
                let text = fill(
                    self.strings.reply("download_failed"),
                    &[("status", &extract_status(&e))],
                );
                self.reply_to(msg, &text).await;
                None
            }
        }
    }

    async fn handle_reverse(&self, msg: &InboundMessage) {
        // Image commands preempt whatever session the user had.
        self.sessions.delete(&msg.author_id);

        let target = match self.resolve_target(msg).await {
            Ok(target) => target,
            Err(()) => {
                self.reply_to(msg, self.strings.reply("usage_missing_reference")).await;
                return;
            }
        };
        let Some(attachment) = target.attachments.first() else {
            self.reply_to(msg, self.strings.reply("usage_reverse")).await;
            return;
        };
        if !attachment.is_image() {
            self.reply_to(msg, self.strings.reply("usage_bad_format")).await;
            return;
        }
        let Some(image) = self.download_image(msg, attachment).await else {
            return;
        };

        let pipeline = VisionPipeline::new(
            self.chat_model.as_ref(),
            self.transport.as_ref(),
            &self.strings,
            &self.lexicon,
            self.guide.clone(),
        );
        pipeline
            .reverse_prompt(&msg.channel, &image, &msg.author_name)
            .await;
    }

    async fn handle_generate(&self, msg: &InboundMessage, content: &str) {
        self.sessions.delete(&msg.author_id);

        let idea = content.get(CMD_GENERATE_PREFIX.len()..).unwrap_or("").trim();
        if idea.is_empty() {
            self.reply_to(msg, self.strings.reply("usage_generate")).await;
            return;
        }

        let generator = PromptGenerator::new(
            self.chat_model.as_ref(),
            self.transport.as_ref(),
            &self.strings,
            self.guide.clone(),
            &self.config.nsfw_text_keywords,
        );
        generator.generate(&msg.channel, idea, &msg.author_name).await;
    }

    // --- Wake and chat ---

    async fn handle_wake(&self, msg: &InboundMessage, content: &str) {
        let target = match self.resolve_target(msg).await {
            Ok(target) => target,
            // A dangling reference degrades to waking on the message itself.
            Err(()) => MessageSnapshot {
                id: msg.id.clone(),
                author_name: msg.author_name.clone(),
                content: msg.content.clone(),
                attachments: msg.attachments.clone(),
            },
        };

        // Waking at an image means commentary, not a chat session.
        if let Some(attachment) = target.attachments.first() {
            if attachment.is_image() {
                let Some(image) = self.download_image(msg, attachment).await else {
                    return;
                };
                if self.search.is_some() {
                    let investigator = Investigator::new(
                        self.chat_model.as_ref(),
                        self.transport.as_ref(),
                        &self.strings,
                        &self.lexicon,
                        self.search.as_deref(),
                        &self.config.bot_name,
                        self.config.investigate_budget,
                    );
                    investigator
                        .run(&msg.channel, &image, &msg.author_name)
                        .await;
                } else {
                    let pipeline = VisionPipeline::new(
                        self.chat_model.as_ref(),
                        self.transport.as_ref(),
                        &self.strings,
                        &self.lexicon,
                        self.guide.clone(),
                    );
                    pipeline
                        .awakened_commentary(&msg.channel, &image, &msg.author_name)
                        .await;
                }
                return;
            }
        }

        // Text wake: open the session and treat this message as its first
        // turn.
        self.sessions.create(&msg.author_id, SessionState::Chatting);
        self.handle_session_turn(msg, content, false).await;
    }

    async fn handle_session_turn(&self, msg: &InboundMessage, content: &str, is_exit: bool) {
        if is_exit {
            self.sessions.delete(&msg.author_id);
            self.reply_to(msg, self.strings.reply("farewell")).await;
            return;
        }

        // Defensive re-check; entry purge already handled the common case.
        if self
            .sessions
            .purge_expired(&msg.author_id, self.config.session_timeout)
        {
            return;
        }

        let at_budget = self
            .sessions
            .get(&msg.author_id)
            .map(|s| s.turns_used >= self.config.max_extra_replies)
            .unwrap_or(false);

        let result = self.stream_chat(msg, content, true).await;

        match result {
            Ok(()) => {
                if at_budget {
                    // That was the final reply: close out loud.
                    self.reply_to(msg, self.strings.reply("closing_notice")).await;
                    self.sessions.delete(&msg.author_id);
                } else {
                    self.sessions.touch(&msg.author_id);
                    self.sessions.increment_turn(&msg.author_id);
                }
            }
            Err(()) => {
                // An unrecoverable turn error ends the session.
                self.sessions.delete(&msg.author_id);
            }
        }
    }

    async fn handle_compliment(&self, msg: &InboundMessage) {
        let compliments = self.strings.compliments();
        if compliments.is_empty() {
            return;
        }
        let line = compliments[self.policy.choose_index(compliments.len())];
        let text = format!("{} {}", msg.author_name, line);
        if let Err(e) = self.transport.send(&msg.channel, &text).await {
            tracing::warn!("compliment send failed: {}", e);
        }
    }

    async fn handle_ambient_chance(&self, msg: &InboundMessage) {
        if !self.ambient_enabled() {
            return;
        }
        if !self.policy.should_respond(self.config.ambient_probability) {
            return;
        }
        // Ambient replies are best-effort; a failure here is only logged.
        let _ = self.stream_chat(msg, msg.content.trim(), false).await;
    }

    /// Fetch history, build the persona request, and stream the reply.
    async fn stream_chat(
        &self,
        msg: &InboundMessage,
        content: &str,
        awakened: bool,
    ) -> Result<(), ()> {
        let history = match self
            .transport
            .recent_history(&msg.channel, self.config.history_limit)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!("history fetch failed: {}", e);
                return Err(());
            }
        };

        let request = persona::build_chat_request(
            &self.strings,
            &self.config.bot_name,
            awakened,
            &msg.author_name,
            content,
            &history,
        );
        let mode = if awakened {
            ReplyMode::Awakened {
                reply_to: msg.id.clone(),
            }
        } else {
            ReplyMode::Ambient
        };

        self.assembler()
            .run(&msg.channel, mode, request)
            .await
            .map(|_| ())
            .map_err(|_| ())
    }
}

fn extract_status(e: &crate::error::TransportError) -> String {
    match e {
        crate::error::TransportError::DownloadFailed { status, .. } => status.to_string(),
        _ => "unknown".to_string(),
    }
}
