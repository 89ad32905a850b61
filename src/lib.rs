//! # prompthound
//!
//! A persona-driven chat bot core that wraps a multimodal,
//! OpenAI-compatible model API: image reverse prompting, text-to-prompt
//! generation, streaming persona chat, and a static lexicon lookup, all
//! driven by a per-message intent router with per-user session state.
//!
//! The chat gateway, the inference endpoint, and the web-search provider
//! are external collaborators behind the [`transport::ChatTransport`],
//! [`llms::ChatModel`]/[`llms::StreamingModel`], and
//! [`search::SearchClient`] traits.

pub mod chat;
pub mod config;
pub mod error;
pub mod lexicon;
pub mod llms;
pub mod persona;
pub mod prompt_gen;
pub mod router;
pub mod search;
pub mod session;
pub mod transport;
pub mod translations;
pub mod vision;

#[cfg(test)]
pub(crate) mod test_helpers;

// Commonly wired-together pieces
pub use config::BotConfig;
pub use lexicon::LexiconIndex;
pub use llms::providers::OpenAiCompatModel;
pub use router::Router;
pub use session::SessionStore;
pub use transport::ChatTransport;
pub use translations::Strings;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
