//! Image analysis pipelines.
//!
//! Every entry point shares the NSFW pre-check, then branches: reverse
//! prompting extracts a generation prompt, awakened commentary produces a
//! structured two-part review, and the investigative variant (see
//! [`investigate`]) layers lexicon and web search on top.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::PipelineError;
use crate::lexicon::LexiconIndex;
use crate::llms::{image_data_uri, ChatModel, ChatRequest, ModelMessage};
use crate::persona;
use crate::transport::{deliver, ChannelRef, ChatTransport};
use crate::translations::{fill, Strings};

pub mod investigate;

// ---------------------------------------------------------------------------
// Response post-processing
// ---------------------------------------------------------------------------

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:[^\n]*)\n(.*?)```").expect("static regex"));

/// Extract the first fenced code block, falling back to the whole trimmed
/// text when none is present.
pub fn extract_fenced(text: &str) -> String {
    match FENCED_BLOCK.captures(text) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Lexicon terms use underscores; conversational prompts read better with
/// spaces.
pub fn normalize_underscores(text: &str) -> String {
    text.replace('_', " ")
}

/// Strip markdown fences a model sometimes wraps around strict-JSON output.
pub(crate) fn strip_json_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

// ---------------------------------------------------------------------------
// Commentary result
// ---------------------------------------------------------------------------

/// The two labeled fields of a commentary response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Commentary {
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub comment: String,
}

/// Outcome of parsing a strict-JSON commentary response. Callers match on
/// the variant instead of probing JSON shapes.
#[derive(Debug)]
pub enum CommentaryOutcome {
    Parsed(Commentary),
    /// The model broke the JSON contract; both fields are the named
    /// fallback strings and the reply still goes out.
    Fallback(Commentary),
}

impl CommentaryOutcome {
    pub fn into_inner(self) -> Commentary {
        match self {
            CommentaryOutcome::Parsed(c) | CommentaryOutcome::Fallback(c) => c,
        }
    }
}

/// Parse a commentary response, substituting fallbacks on any shape error.
pub fn parse_commentary(raw: &str, strings: &Strings) -> CommentaryOutcome {
    match serde_json::from_str::<Commentary>(strip_json_fences(raw)) {
        Ok(parsed) => CommentaryOutcome::Parsed(parsed),
        Err(e) => {
            tracing::warn!("commentary JSON parse failed: {} (raw: {:.120})", e, raw);
            CommentaryOutcome::Fallback(Commentary {
                analysis: strings.reply("analysis_fallback").to_string(),
                comment: strings.reply("comment_fallback").to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// NSFW pre-check
// ---------------------------------------------------------------------------

/// Classify an image via a constrained yes/no call.
///
/// Fails open: any inference error is logged and treated as "not NSFW" so
/// the safe-content path still runs. The result is never cached.
pub async fn nsfw_precheck(model: &dyn ChatModel, strings: &Strings, image_uri: &str) -> bool {
    let request = ChatRequest::new(vec![ModelMessage::user_with_image(
        Some(&persona::nsfw_precheck_prompt(strings)),
        image_uri,
    )]);
    match model.complete(request).await {
        // The prompt constrains the reply to a single word; a leading
        // "yes" is the only affirmative shape accepted.
        Ok(answer) => answer.trim().to_lowercase().starts_with("yes"),
        Err(e) => {
            tracing::warn!("NSFW pre-check failed, assuming safe: {}", e);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// VisionPipeline
// ---------------------------------------------------------------------------

/// Reverse-prompt and simple commentary modes.
pub struct VisionPipeline<'a> {
    model: &'a dyn ChatModel,
    transport: &'a dyn ChatTransport,
    strings: &'a Strings,
    lexicon: &'a LexiconIndex,
    /// Prompt-guide text injected into reverse/generate system prompts.
    guide: String,
}

impl<'a> VisionPipeline<'a> {
    pub fn new(
        model: &'a dyn ChatModel,
        transport: &'a dyn ChatTransport,
        strings: &'a Strings,
        lexicon: &'a LexiconIndex,
        guide: String,
    ) -> Self {
        Self {
            model,
            transport,
            strings,
            lexicon,
            guide,
        }
    }

    /// Reverse-prompt mode: derive a generation prompt from an image and
    /// send intro + fenced prompt. Errors are converted to an in-persona
    /// message; this method never propagates.
    pub async fn reverse_prompt(&self, channel: &ChannelRef, image: &[u8], user_name: &str) {
        if let Err(e) = self.try_reverse_prompt(channel, image, user_name).await {
            tracing::warn!("reverse prompt failed: {}", e);
            let text = fill(
                self.strings.reply("error_reverse"),
                &[("error", &e.to_string())],
            );
            if let Err(send_err) = deliver(self.transport, None, channel, &text).await {
                tracing::warn!("could not report reverse-prompt failure: {}", send_err);
            }
        }
    }

    async fn try_reverse_prompt(
        &self,
        channel: &ChannelRef,
        image: &[u8],
        user_name: &str,
    ) -> Result<(), PipelineError> {
        let image_uri = image_data_uri(image);
        let is_nsfw = nsfw_precheck(self.model, self.strings, &image_uri).await;

        let system = persona::reverse_system(
            self.strings,
            is_nsfw,
            &self.guide,
            &self.lexicon.context_sample(),
        );
        let request = ChatRequest::new(vec![
            ModelMessage::system(system),
            ModelMessage::user_with_image(None, &image_uri),
        ]);
        let raw = self.model.complete(request).await?;
        let prompt = normalize_underscores(&extract_fenced(&raw));

        let intro_key = if is_nsfw {
            "reverse_intro_nsfw"
        } else {
            "reverse_intro_safe"
        };
        let intro = fill(self.strings.reply(intro_key), &[("user", user_name)]);
        let message = format!("{}\n```\n{}\n```", intro, prompt);
        self.transport.send(channel, &message).await?;
        Ok(())
    }

    /// Awakened commentary mode: a placeholder goes up immediately, the
    /// structured review replaces it. Never propagates errors.
    pub async fn awakened_commentary(&self, channel: &ChannelRef, image: &[u8], user_name: &str) {
        let placeholder = match self
            .transport
            .send(channel, self.strings.reply("commentary_loading"))
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("could not send commentary placeholder: {}", e);
                None
            }
        };

        if let Err(e) = self
            .try_commentary(channel, image, user_name, placeholder.as_ref())
            .await
        {
            tracing::warn!("commentary failed: {}", e);
            let text = fill(
                self.strings.reply("error_commentary"),
                &[("error", &e.to_string())],
            );
            if let Err(send_err) =
                deliver(self.transport, placeholder.as_ref(), channel, &text).await
            {
                tracing::warn!("could not report commentary failure: {}", send_err);
            }
        }
    }

    async fn try_commentary(
        &self,
        channel: &ChannelRef,
        image: &[u8],
        user_name: &str,
        placeholder: Option<&crate::transport::MessageHandle>,
    ) -> Result<(), PipelineError> {
        let image_uri = image_data_uri(image);
        let is_nsfw = nsfw_precheck(self.model, self.strings, &image_uri).await;

        let request = ChatRequest::new(vec![
            ModelMessage::system(persona::commentary_system(self.strings, is_nsfw)),
            ModelMessage::user_with_image(None, &image_uri),
        ])
        .json();
        let raw = self.model.complete(request).await?;
        let commentary = parse_commentary(&raw, self.strings).into_inner();

        let (intro_key, title_analysis, title_comment) = if is_nsfw {
            (
                "commentary_intro_nsfw",
                "commentary_title_analysis_nsfw",
                "commentary_title_comment_nsfw",
            )
        } else {
            (
                "commentary_intro_safe",
                "commentary_title_analysis_safe",
                "commentary_title_comment_safe",
            )
        };

        let message = format!(
            "{}\n\n{}\n{}\n\n{}\n> {}",
            fill(self.strings.reply(intro_key), &[("user", user_name)]),
            self.strings.reply(title_analysis),
            commentary.analysis,
            self.strings.reply(title_comment),
            commentary.comment,
        );

        // The placeholder comes down and the review goes out as a fresh
        // message, not an edit.
        if let Some(handle) = placeholder {
            if let Err(e) = self.transport.delete(handle).await {
                if !e.is_not_found() {
                    tracing::warn!("could not delete commentary placeholder: {}", e);
                }
            }
        }
        self.transport.send(channel, &message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingTransport, ScriptedModel, TransportOp};

    fn channel() -> ChannelRef {
        ChannelRef("art".into())
    }

    #[test]
    fn test_extract_fenced_single_block() {
        let text = "Here you go:\n```\nmasterpiece, fox_ears, night sky\n```\nEnjoy!";
        assert_eq!(extract_fenced(text), "masterpiece, fox_ears, night sky");
    }

    #[test]
    fn test_extract_fenced_language_tag() {
        let text = "```text\nwide shot, castle\n```";
        assert_eq!(extract_fenced(text), "wide shot, castle");
    }

    #[test]
    fn test_extract_fenced_fallback_full_text() {
        let text = "  just a prompt with no fences  ";
        assert_eq!(extract_fenced(text), "just a prompt with no fences");
    }

    #[test]
    fn test_normalize_underscores() {
        assert_eq!(
            normalize_underscores("fox_ears, starry_sky"),
            "fox ears, starry sky"
        );
    }

    #[test]
    fn test_parse_commentary_ok() {
        let strings = Strings::load_default();
        let raw = r#"{"analysis": "three lines", "comment": "woof"}"#;
        match parse_commentary(raw, &strings) {
            CommentaryOutcome::Parsed(c) => {
                assert_eq!(c.analysis, "three lines");
                assert_eq!(c.comment, "woof");
            }
            CommentaryOutcome::Fallback(_) => panic!("expected parsed"),
        }
    }

    #[test]
    fn test_parse_commentary_fenced_json() {
        let strings = Strings::load_default();
        let raw = "```json\n{\"analysis\": \"a\", \"comment\": \"b\"}\n```";
        assert!(matches!(
            parse_commentary(raw, &strings),
            CommentaryOutcome::Parsed(_)
        ));
    }

    #[test]
    fn test_parse_commentary_fallback() {
        let strings = Strings::load_default();
        match parse_commentary("I refuse to answer in JSON", &strings) {
            CommentaryOutcome::Fallback(c) => {
                assert_eq!(c.analysis, strings.reply("analysis_fallback"));
                assert_eq!(c.comment, strings.reply("comment_fallback"));
            }
            CommentaryOutcome::Parsed(_) => panic!("expected fallback"),
        }
    }

    #[tokio::test]
    async fn test_nsfw_precheck_yes_no() {
        let strings = Strings::load_default();

        let model = ScriptedModel::new();
        model.push_completion("Yes.");
        assert!(nsfw_precheck(&model, &strings, "data:x").await);

        let model = ScriptedModel::new();
        model.push_completion("no");
        assert!(!nsfw_precheck(&model, &strings, "data:x").await);
    }

    #[tokio::test]
    async fn test_nsfw_precheck_fails_open() {
        let strings = Strings::load_default();
        let model = ScriptedModel::new();
        model.push_completion_error();
        assert!(!nsfw_precheck(&model, &strings, "data:x").await);
    }

    #[tokio::test]
    async fn test_reverse_prompt_happy_path() {
        let strings = Strings::load_default();
        let lexicon = LexiconIndex::empty();
        let model = ScriptedModel::new();
        model.push_completion("no"); // pre-check
        model.push_completion("```\nfox_ears, snow, night\n```");
        let transport = RecordingTransport::new();

        let pipeline = VisionPipeline::new(&model, &transport, &strings, &lexicon, String::new());
        pipeline.reverse_prompt(&channel(), &[1, 2, 3], "amy").await;

        assert_eq!(model.completion_calls(), 2);
        let texts = transport.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("fox ears, snow, night"));
        assert!(texts[0].contains("amy"));
    }

    #[tokio::test]
    async fn test_reverse_prompt_error_reports_in_channel() {
        let strings = Strings::load_default();
        let lexicon = LexiconIndex::empty();
        let model = ScriptedModel::new();
        model.push_completion("no"); // pre-check
        model.push_completion_error(); // main call fails
        let transport = RecordingTransport::new();

        let pipeline = VisionPipeline::new(&model, &transport, &strings, &lexicon, String::new());
        pipeline.reverse_prompt(&channel(), &[1], "amy").await;

        let texts = transport.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("failed") || texts[0].contains("❌"));
    }

    #[tokio::test]
    async fn test_commentary_placeholder_lifecycle() {
        let strings = Strings::load_default();
        let lexicon = LexiconIndex::empty();
        let model = ScriptedModel::new();
        model.push_completion("no");
        model.push_completion(r#"{"analysis": "🖼️ subject line", "comment": "zoomies"}"#);
        let transport = RecordingTransport::new();

        let pipeline = VisionPipeline::new(&model, &transport, &strings, &lexicon, String::new());
        pipeline.awakened_commentary(&channel(), &[1], "amy").await;

        let ops = transport.ops();
        // Placeholder send, placeholder delete, final send.
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], TransportOp::Send { .. }));
        assert!(matches!(ops[1], TransportOp::Delete { .. }));
        match &ops[2] {
            TransportOp::Send { text, .. } => {
                assert!(text.contains("subject line"));
                assert!(text.contains("> zoomies"));
            }
            _ => panic!("expected final send"),
        }
    }

    #[tokio::test]
    async fn test_commentary_parse_failure_still_replies() {
        let strings = Strings::load_default();
        let lexicon = LexiconIndex::empty();
        let model = ScriptedModel::new();
        model.push_completion("no");
        model.push_completion("not json at all");
        let transport = RecordingTransport::new();

        let pipeline = VisionPipeline::new(&model, &transport, &strings, &lexicon, String::new());
        pipeline.awakened_commentary(&channel(), &[1], "amy").await;

        let texts = transport.texts();
        let last = texts.last().unwrap();
        assert!(last.contains(strings.reply("analysis_fallback")));
        assert!(last.contains(strings.reply("comment_fallback")));
    }

    #[tokio::test]
    async fn test_commentary_error_edits_placeholder() {
        let strings = Strings::load_default();
        let lexicon = LexiconIndex::empty();
        let model = ScriptedModel::new();
        model.push_completion("no");
        model.push_completion_error();
        let transport = RecordingTransport::new();

        let pipeline = VisionPipeline::new(&model, &transport, &strings, &lexicon, String::new());
        pipeline.awakened_commentary(&channel(), &[1], "amy").await;

        let ops = transport.ops();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[1], TransportOp::Edit { text, .. }
            if text.contains("short-circuited") || text.contains("❌")));
    }

}
