//! Error types for the bot core.
//!
//! Each failure area gets its own enum so call sites can recover where a
//! safe default exists (lexicon load, NSFW pre-check) and surface the rest
//! as an in-persona chat message.

use thiserror::Error;

/// Errors from the messaging transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The edit/delete target no longer exists.
    #[error("message not found: {id}")]
    NotFound { id: String },

    /// A send, edit, or history fetch failed at the wire level.
    #[error("transport send error: {message}")]
    SendFailed { message: String },

    /// An attachment could not be downloaded.
    #[error("attachment download failed ({status}): {url}")]
    DownloadFailed { url: String, status: u16 },
}

impl TransportError {
    /// Whether the error means the target message is gone rather than the
    /// transport being unhealthy. Callers retry these once as a fresh send.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound { .. })
    }
}

/// Errors from the inference service.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Non-success HTTP status after retries were exhausted.
    #[error("inference API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Connection / timeout level failure.
    #[error("inference request failed: {message}")]
    Request { message: String },

    /// The response body was not the shape the endpoint promised.
    #[error("malformed inference response: {message}")]
    Malformed { message: String },

    /// The stream ended with an error chunk.
    #[error("inference stream error: {message}")]
    Stream { message: String },
}

/// Errors from the web search provider.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("search request failed: {message}")]
    Request { message: String },
}

/// Errors raised while loading the lexicon. Always recovered to an empty
/// index by the caller; never fatal.
#[derive(Debug, Error)]
pub enum LexiconError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from a vision pipeline invocation. Converted to an in-persona
/// message at the pipeline boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The synthesis stage returned non-JSON where strict JSON was required.
    #[error("synthesis returned malformed JSON: {message}")]
    SynthesisShape { message: String },

    /// The overall pipeline deadline ran out before synthesis finished.
    #[error("pipeline deadline exceeded after {elapsed_secs}s")]
    DeadlineExceeded { elapsed_secs: u64 },
}

/// Missing or invalid startup configuration. Fatal: the process refuses to
/// start rather than limping without credentials.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {name}")]
    Missing { name: String },

    #[error("invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
}
