//! Text prompt generator.
//!
//! One-shot and stateless: a free-text idea goes in, an intro plus fenced
//! generation prompt comes out. Classification is a cheap local keyword
//! heuristic, since there is no image to send to the model.

use std::collections::HashSet;

use crate::error::PipelineError;
use crate::llms::{ChatModel, ChatRequest, ModelMessage};
use crate::persona;
use crate::transport::{ChannelRef, ChatTransport};
use crate::translations::{fill, Strings};
use crate::vision::{extract_fenced, normalize_underscores};

/// Substring check against the configured keyword set.
pub fn classify_idea(idea: &str, keywords: &HashSet<String>) -> bool {
    let lower = idea.to_lowercase();
    keywords.iter().any(|keyword| lower.contains(keyword))
}

/// Generates prompts from user ideas. No session interaction.
pub struct PromptGenerator<'a> {
    model: &'a dyn ChatModel,
    transport: &'a dyn ChatTransport,
    strings: &'a Strings,
    guide: String,
    nsfw_keywords: &'a HashSet<String>,
}

impl<'a> PromptGenerator<'a> {
    pub fn new(
        model: &'a dyn ChatModel,
        transport: &'a dyn ChatTransport,
        strings: &'a Strings,
        guide: String,
        nsfw_keywords: &'a HashSet<String>,
    ) -> Self {
        Self {
            model,
            transport,
            strings,
            guide,
            nsfw_keywords,
        }
    }

    /// Turn an idea into a prompt and send it. Errors become an in-persona
    /// message; this method never propagates.
    pub async fn generate(&self, channel: &ChannelRef, idea: &str, user_name: &str) {
        if let Err(e) = self.try_generate(channel, idea, user_name).await {
            tracing::warn!("prompt generation failed: {}", e);
            let text = fill(
                self.strings.reply("error_generate"),
                &[("error", &e.to_string())],
            );
            if let Err(send_err) = self.transport.send(channel, &text).await {
                tracing::warn!("could not report generation failure: {}", send_err);
            }
        }
    }

    async fn try_generate(
        &self,
        channel: &ChannelRef,
        idea: &str,
        user_name: &str,
    ) -> Result<(), PipelineError> {
        let is_nsfw = classify_idea(idea, self.nsfw_keywords);

        let request = ChatRequest::new(vec![
            ModelMessage::system(persona::generate_system(
                self.strings,
                is_nsfw,
                &self.guide,
                idea,
            )),
            ModelMessage::user(idea.to_string()),
        ]);
        let raw = self.model.complete(request).await?;
        let prompt = normalize_underscores(&extract_fenced(&raw));

        let intro_key = if is_nsfw {
            "generate_intro_nsfw"
        } else {
            "generate_intro_safe"
        };
        let intro = fill(self.strings.reply(intro_key), &[("user", user_name)]);
        self.transport
            .send(channel, &format!("{}\n```\n{}\n```", intro, prompt))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_NSFW_TEXT_KEYWORDS;
    use crate::test_helpers::{RecordingTransport, ScriptedModel};

    fn keywords() -> HashSet<String> {
        DEFAULT_NSFW_TEXT_KEYWORDS
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn channel() -> ChannelRef {
        ChannelRef("art".into())
    }

    #[test]
    fn test_classify_idea() {
        let keywords = keywords();
        assert!(!classify_idea("a castle at dawn", &keywords));
        assert!(classify_idea("something NSFW please", &keywords));
        // Substring matching, not word matching.
        assert!(classify_idea("borderline-nsfw-ish", &keywords));
    }

    #[tokio::test]
    async fn test_generate_sends_fenced_prompt() {
        let strings = Strings::load_default();
        let keywords = keywords();
        let model = ScriptedModel::new();
        model.push_completion("```\ncyberpunk_street, rain, neon\n```");
        let transport = RecordingTransport::new();

        let generator =
            PromptGenerator::new(&model, &transport, &strings, String::new(), &keywords);
        generator
            .generate(&channel(), "a rainy cyberpunk street", "amy")
            .await;

        // One completion, no pre-check model call for text ideas.
        assert_eq!(model.completion_calls(), 1);
        let texts = transport.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("cyberpunk street, rain, neon"));
        assert!(texts[0].contains("amy"));
    }

    #[tokio::test]
    async fn test_generate_unfenced_response_falls_back() {
        let strings = Strings::load_default();
        let keywords = keywords();
        let model = ScriptedModel::new();
        model.push_completion("  plain prompt text  ");
        let transport = RecordingTransport::new();

        let generator =
            PromptGenerator::new(&model, &transport, &strings, String::new(), &keywords);
        generator.generate(&channel(), "a castle", "amy").await;

        assert!(transport.texts()[0].contains("plain prompt text"));
    }

    #[tokio::test]
    async fn test_generate_error_reports_in_channel() {
        let strings = Strings::load_default();
        let keywords = keywords();
        let model = ScriptedModel::new();
        model.push_completion_error();
        let transport = RecordingTransport::new();

        let generator =
            PromptGenerator::new(&model, &transport, &strings, String::new(), &keywords);
        generator.generate(&channel(), "a castle", "amy").await;

        assert!(transport.texts()[0].contains("❌"));
    }
}
