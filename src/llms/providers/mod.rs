//! Inference providers.

pub mod openai_compat;

pub use self::openai_compat::OpenAiCompatModel;
