//! Investigative commentary: the five-stage pipeline.
//!
//! NSFW pre-check → structured vision analysis → lexicon search → web
//! search → synthesis, with progress edited into a single placeholder
//! message after each stage. The gather stages (2–4) share one wall-clock
//! budget; when it runs out the pipeline degrades to whatever was
//! collected and still attempts synthesis inside a reserved remainder.
//! Synthesis is the one stage whose failure is user-visible as pipeline
//! failure: no earlier fallback can stand in for a missing final report.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::PipelineError;
use crate::lexicon::{LexiconEntry, LexiconIndex};
use crate::llms::{image_data_uri, ChatModel, ChatRequest, ModelMessage};
use crate::persona;
use crate::search::{SearchClient, SearchResult};
use crate::transport::{deliver, ChannelRef, ChatTransport, MessageHandle};
use crate::translations::{fill, Strings};

use super::{normalize_underscores, nsfw_precheck, strip_json_fences};

// ---------------------------------------------------------------------------
// Stage caps
// ---------------------------------------------------------------------------

/// Lexicon hits collected per extracted tag.
const LEXICON_HITS_PER_TAG: usize = 3;

/// Extracted search queries actually sent to the web.
const SEARCH_QUERIES: usize = 2;

/// Results requested per web query.
const SEARCH_RESULTS_PER_QUERY: usize = 3;

/// Wall-clock slice reserved for synthesis after the gather budget.
const SYNTHESIS_RESERVE: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Stage result types
// ---------------------------------------------------------------------------

/// Structured output of the vision-analysis stage. Every field defaults so
/// a partial or failed parse degrades instead of aborting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisionAnalysis {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub style_tags: Vec<String>,
    #[serde(default)]
    pub artist_tags: Vec<String>,
    #[serde(default)]
    pub composition_tags: Vec<String>,
    #[serde(default)]
    pub emotion_tags: Vec<String>,
    #[serde(default)]
    pub search_queries: Vec<String>,
}

/// The synthesis stage's final report. Transient: formatted into the reply
/// and discarded.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineResult {
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub comment: String,
    pub prompt: Option<String>,
}

// ---------------------------------------------------------------------------
// Investigator
// ---------------------------------------------------------------------------

/// Runs the investigative pipeline for one image.
pub struct Investigator<'a> {
    model: &'a dyn ChatModel,
    transport: &'a dyn ChatTransport,
    strings: &'a Strings,
    lexicon: &'a LexiconIndex,
    search: Option<&'a dyn SearchClient>,
    bot_name: &'a str,
    budget: Duration,
}

impl<'a> Investigator<'a> {
    pub fn new(
        model: &'a dyn ChatModel,
        transport: &'a dyn ChatTransport,
        strings: &'a Strings,
        lexicon: &'a LexiconIndex,
        search: Option<&'a dyn SearchClient>,
        bot_name: &'a str,
        budget: Duration,
    ) -> Self {
        Self {
            model,
            transport,
            strings,
            lexicon,
            search,
            bot_name,
            budget,
        }
    }

    /// Run the pipeline. Never propagates: every outcome, including
    /// failure, lands in the channel.
    pub async fn run(&self, channel: &ChannelRef, image: &[u8], user_name: &str) {
        let placeholder = match self
            .transport
            .send(channel, self.strings.progress("stage_vision"))
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("could not send investigation placeholder: {}", e);
                None
            }
        };

        let outcome = self
            .try_run(channel, image, user_name, placeholder.as_ref())
            .await;

        let final_text = match outcome {
            Ok(report) => report,
            Err(PipelineError::SynthesisShape { message }) => {
                tracing::warn!("synthesis returned malformed JSON: {}", message);
                self.strings.reply("investigate_failed").to_string()
            }
            Err(PipelineError::DeadlineExceeded { elapsed_secs }) => {
                tracing::warn!("investigation deadline exceeded after {}s", elapsed_secs);
                self.strings.reply("investigate_timeout").to_string()
            }
            Err(e) => {
                tracing::warn!("investigation failed: {}", e);
                fill(
                    self.strings.reply("error_commentary"),
                    &[("error", &e.to_string())],
                )
            }
        };

        if let Err(e) = deliver(self.transport, placeholder.as_ref(), channel, &final_text).await {
            tracing::warn!("could not deliver investigation result: {}", e);
        }
    }

    async fn try_run(
        &self,
        _channel: &ChannelRef,
        image: &[u8],
        user_name: &str,
        placeholder: Option<&MessageHandle>,
    ) -> Result<String, PipelineError> {
        let started = Instant::now();
        let deadline = started + self.budget;
        let image_uri = image_data_uri(image);

        // Stage 1: classification. Fail-open like every other entry point.
        let is_nsfw = nsfw_precheck(self.model, self.strings, &image_uri).await;

        // Stage 2: structured vision analysis. A failed call or parse
        // degrades to an empty analysis; the report just gets thinner.
        let analysis = if Instant::now() >= deadline {
            tracing::warn!("gather budget exhausted before vision analysis");
            VisionAnalysis::default()
        } else {
            self.vision_analysis(&image_uri, deadline).await
        };

        // Stage 3: local lexicon lookup over the extracted tags.
        self.edit_progress(placeholder, "stage_lexicon").await;
        let lexicon_hits = self.lexicon_stage(&analysis);

        // Stage 4: web search over the extracted queries. Partial results
        // are acceptable; a failing query is logged and skipped.
        self.edit_progress(placeholder, "stage_search").await;
        let web_results = self.search_stage(&analysis, deadline).await;

        // Stage 5: synthesis inside the reserved remainder.
        self.edit_progress(placeholder, "stage_synthesis").await;
        let context = serde_json::json!({
            "nsfw": is_nsfw,
            "vision_analysis": analysis,
            "lexicon_matches": lexicon_hits,
            "web_results": web_results,
        });
        let request = ChatRequest::new(vec![
            ModelMessage::system(persona::synthesis_system(self.strings, self.bot_name)),
            ModelMessage::user(context.to_string()),
        ])
        .json();

        let synthesis_deadline = deadline.max(Instant::now() + SYNTHESIS_RESERVE);
        let raw = match tokio::time::timeout_at(synthesis_deadline, self.model.complete(request))
            .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(e.into()),
            Err(_elapsed) => {
                return Err(PipelineError::DeadlineExceeded {
                    elapsed_secs: started.elapsed().as_secs(),
                })
            }
        };

        let report: PipelineResult =
            serde_json::from_str(strip_json_fences(&raw)).map_err(|e| {
                PipelineError::SynthesisShape {
                    message: e.to_string(),
                }
            })?;

        Ok(self.compose_report(is_nsfw, user_name, report))
    }

    async fn vision_analysis(&self, image_uri: &str, deadline: Instant) -> VisionAnalysis {
        let request = ChatRequest::new(vec![
            ModelMessage::system(persona::vision_analysis_system(self.strings)),
            ModelMessage::user_with_image(None, image_uri),
        ])
        .json();

        match tokio::time::timeout_at(deadline, self.model.complete(request)).await {
            Ok(Ok(raw)) => serde_json::from_str(strip_json_fences(&raw)).unwrap_or_else(|e| {
                tracing::warn!("vision analysis parse failed, degrading: {}", e);
                VisionAnalysis::default()
            }),
            Ok(Err(e)) => {
                tracing::warn!("vision analysis call failed, degrading: {}", e);
                VisionAnalysis::default()
            }
            Err(_elapsed) => {
                tracing::warn!("vision analysis timed out, degrading");
                VisionAnalysis::default()
            }
        }
    }

    fn lexicon_stage(&self, analysis: &VisionAnalysis) -> Vec<LexiconEntry> {
        let mut hits = Vec::new();
        for tag in analysis.style_tags.iter().chain(analysis.artist_tags.iter()) {
            hits.extend(self.lexicon.search(tag, LEXICON_HITS_PER_TAG));
        }
        hits
    }

    async fn search_stage(
        &self,
        analysis: &VisionAnalysis,
        deadline: Instant,
    ) -> Vec<SearchResult> {
        let Some(search) = self.search else {
            return Vec::new();
        };

        let mut results = Vec::new();
        for query in analysis.search_queries.iter().take(SEARCH_QUERIES) {
            if Instant::now() >= deadline {
                tracing::warn!("gather budget exhausted, skipping remaining queries");
                break;
            }
            match tokio::time::timeout_at(deadline, search.search(query, SEARCH_RESULTS_PER_QUERY))
                .await
            {
                Ok(Ok(found)) => results.extend(found),
                Ok(Err(e)) => {
                    tracing::warn!("search query {:?} failed, skipping: {}", query, e);
                }
                Err(_elapsed) => {
                    tracing::warn!("search query {:?} timed out, skipping rest", query);
                    break;
                }
            }
        }
        results
    }

    async fn edit_progress(&self, placeholder: Option<&MessageHandle>, key: &str) {
        if let Some(handle) = placeholder {
            if let Err(e) = self.transport.edit(handle, self.strings.progress(key)).await {
                tracing::debug!("progress edit failed: {}", e);
            }
        }
    }

    fn compose_report(&self, is_nsfw: bool, user_name: &str, report: PipelineResult) -> String {
        let intro_key = if is_nsfw {
            "commentary_intro_nsfw"
        } else {
            "commentary_intro_safe"
        };
        let mut message = format!(
            "{}\n\n{}\n\n> {}",
            fill(self.strings.reply(intro_key), &[("user", user_name)]),
            report.analysis,
            report.comment,
        );
        if let Some(prompt) = report.prompt.filter(|p| !p.trim().is_empty()) {
            message.push_str(&format!(
                "\n```\n{}\n```",
                normalize_underscores(prompt.trim())
            ));
        }
        message
    }
}
