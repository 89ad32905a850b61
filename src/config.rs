//! Startup configuration for the bot.
//!
//! Everything tunable lives here and is read from the environment once at
//! startup. Required keys (API endpoint, key, model, bot name) are fatal
//! when missing; everything else has a default matching the original
//! deployment.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Seconds of inactivity after which a chat session silently expires.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 180;

/// Extra replies a session gets beyond the wake-triggering one.
pub const DEFAULT_MAX_EXTRA_REPLIES: u32 = 1;

/// Probability of an ambient (unaddressed) reply when ambient chat is on.
pub const DEFAULT_AMBIENT_PROBABILITY: f64 = 0.15;

/// Channel history messages pulled into a chat transcript.
pub const DEFAULT_HISTORY_LIMIT: usize = 8;

/// Pending characters that force a streaming flush.
pub const DEFAULT_FLUSH_CHARS: usize = 30;

/// Seconds between forced streaming flushes.
pub const DEFAULT_FLUSH_INTERVAL_SECS: f64 = 1.5;

/// Wall-clock budget for the investigative pipeline's gather stages.
pub const DEFAULT_INVESTIGATE_BUDGET_SECS: u64 = 60;

/// Keywords that end a chat session, matched case-insensitively.
pub const DEFAULT_EXIT_KEYWORDS: &[&str] = &[
    "bye", "goodbye", "thanks", "thank you", "nevermind", "ok", "okay", "done",
];

/// Substrings that mark a free-text idea as adult-leaning without a model
/// call.
pub const DEFAULT_NSFW_TEXT_KEYWORDS: &[&str] = &[
    "nsfw", "nude", "naked", "lewd", "explicit", "erotic", "hentai",
];

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_required(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing {
            name: name.to_string(),
        }),
    }
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env_optional(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name: name.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

fn env_keyword_set(name: &str, defaults: &[&str]) -> HashSet<String> {
    match env_optional(name) {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

// ---------------------------------------------------------------------------
// Lexicon file locations
// ---------------------------------------------------------------------------

/// Candidate knowledge-base files in precedence order, plus the two raw
/// sources merged when no prepared file exists.
#[derive(Debug, Clone)]
pub struct LexiconPaths {
    /// Highest priority: the classified knowledge base.
    pub classified: PathBuf,
    /// Second priority, also the persist target for a fresh merge.
    pub merged: PathBuf,
    /// Raw source merged first (its terms win on conflict).
    pub knowledge: PathBuf,
    /// Raw source merged second.
    pub raw_lexicon: PathBuf,
}

impl Default for LexiconPaths {
    fn default() -> Self {
        Self {
            classified: PathBuf::from("classified_lexicon.json"),
            merged: PathBuf::from("merged_knowledge_base.json"),
            knowledge: PathBuf::from("knowledge_base.json"),
            raw_lexicon: PathBuf::from("lexicon.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// BotConfig
// ---------------------------------------------------------------------------

/// Full runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// OpenAI-compatible API base URL (e.g. `https://host/v1`).
    pub api_base: String,
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Model identifier for every completion call.
    pub model: String,
    /// Display name the bot answers to; used for name-call wake detection.
    pub bot_name: String,

    /// Whether ambient (unaddressed) chat starts enabled.
    pub ambient_enabled: bool,
    /// Probability gate for ambient replies.
    pub ambient_probability: f64,
    /// Channel history pulled into chat transcripts.
    pub history_limit: usize,

    /// Inactivity timeout for chat sessions.
    pub session_timeout: Duration,
    /// Extra replies beyond the wake message before auto-close.
    pub max_extra_replies: u32,

    /// Streaming flush threshold in pending characters.
    pub flush_chars: usize,
    /// Streaming flush threshold in elapsed time.
    pub flush_interval: Duration,

    /// Optional search endpoint for the investigative pipeline. When unset
    /// the web-search stage is skipped.
    pub search_endpoint: Option<String>,
    /// Wall-clock budget for investigative gather stages.
    pub investigate_budget: Duration,

    /// Optional prompt-guide file whose content is injected into
    /// reverse-prompt and idea-generation system prompts.
    pub prompt_guide_path: Option<PathBuf>,

    /// Session exit keywords, lowercased.
    pub exit_keywords: HashSet<String>,
    /// Local NSFW text heuristic keywords, lowercased.
    pub nsfw_text_keywords: HashSet<String>,

    /// Lexicon file locations.
    pub lexicon_paths: LexiconPaths,
}

impl BotConfig {
    /// Read configuration from the environment.
    ///
    /// Required: `OPENAI_API_BASE`, `OPENAI_API_KEY`, `OPENAI_MODEL_NAME`,
    /// `BOT_NAME`. Everything else falls back to the defaults above.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ambient_probability = env_parse("CHAT_PROBABILITY", DEFAULT_AMBIENT_PROBABILITY)?;
        if !(0.0..=1.0).contains(&ambient_probability) {
            return Err(ConfigError::Invalid {
                name: "CHAT_PROBABILITY".to_string(),
                value: ambient_probability.to_string(),
            });
        }

        Ok(Self {
            api_base: env_required("OPENAI_API_BASE")?,
            api_key: env_required("OPENAI_API_KEY")?,
            model: env_required("OPENAI_MODEL_NAME")?,
            bot_name: env_required("BOT_NAME")?,

            ambient_enabled: env_optional("CHAT_ENABLED")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            ambient_probability,
            history_limit: env_parse("CHAT_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?,

            session_timeout: Duration::from_secs(env_parse(
                "CHAT_SESSION_TIMEOUT",
                DEFAULT_SESSION_TIMEOUT_SECS,
            )?),
            max_extra_replies: env_parse("CHAT_MAX_EXTRA_REPLIES", DEFAULT_MAX_EXTRA_REPLIES)?,

            flush_chars: env_parse("STREAM_FLUSH_CHARS", DEFAULT_FLUSH_CHARS)?,
            flush_interval: Duration::from_secs_f64(env_parse(
                "STREAM_FLUSH_INTERVAL",
                DEFAULT_FLUSH_INTERVAL_SECS,
            )?),

            search_endpoint: env_optional("SEARCH_ENDPOINT"),
            investigate_budget: Duration::from_secs(env_parse(
                "INVESTIGATE_BUDGET_SECS",
                DEFAULT_INVESTIGATE_BUDGET_SECS,
            )?),

            prompt_guide_path: env_optional("PROMPT_GUIDE_FILE").map(PathBuf::from),

            exit_keywords: env_keyword_set("CHAT_EXIT_KEYWORDS", DEFAULT_EXIT_KEYWORDS),
            nsfw_text_keywords: env_keyword_set("NSFW_TEXT_KEYWORDS", DEFAULT_NSFW_TEXT_KEYWORDS),

            lexicon_paths: LexiconPaths::default(),
        })
    }

    /// Read the optional prompt-guide file, returning an empty string when
    /// unset or unreadable. A missing guide weakens prompts, it does not
    /// break them.
    pub fn prompt_guide(&self) -> String {
        match &self.prompt_guide_path {
            Some(path) => std::fs::read_to_string(path).unwrap_or_else(|e| {
                tracing::warn!("prompt guide {} unreadable: {}", path.display(), e);
                String::new()
            }),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_keyword_set_defaults() {
        let set = env_keyword_set("PROMPTHOUND_TEST_UNSET", DEFAULT_EXIT_KEYWORDS);
        assert!(set.contains("bye"));
        assert!(set.contains("thank you"));
        assert_eq!(set.len(), DEFAULT_EXIT_KEYWORDS.len());
    }

    #[test]
    fn test_env_keyword_set_override() {
        std::env::set_var("PROMPTHOUND_TEST_KW", "Adios, later ,");
        let set = env_keyword_set("PROMPTHOUND_TEST_KW", DEFAULT_EXIT_KEYWORDS);
        assert!(set.contains("adios"));
        assert!(set.contains("later"));
        assert_eq!(set.len(), 2);
        std::env::remove_var("PROMPTHOUND_TEST_KW");
    }

    #[test]
    fn test_env_parse_default_and_invalid() {
        assert_eq!(env_parse("PROMPTHOUND_TEST_UNSET", 42u64).unwrap(), 42);

        std::env::set_var("PROMPTHOUND_TEST_BAD", "not-a-number");
        let err = env_parse::<u64>("PROMPTHOUND_TEST_BAD", 0).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        std::env::remove_var("PROMPTHOUND_TEST_BAD");
    }

    #[test]
    fn test_required_missing_is_fatal() {
        let err = env_required("PROMPTHOUND_TEST_MISSING").unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }
}
