//! prompthound dev binary.
//!
//! Wires the router to the console transport so the whole message flow can
//! be exercised without a chat gateway: type lines as a user, mention the
//! bot with `@<name>`, name a local image file to attach it.
//!
//! # Environment Variables
//!
//! - `OPENAI_API_BASE` — OpenAI-compatible API base URL (required)
//! - `OPENAI_API_KEY` — API key (required)
//! - `OPENAI_MODEL_NAME` — model identifier (required)
//! - `BOT_NAME` — display name the bot answers to (required)
//! - `CHAT_ENABLED`, `CHAT_PROBABILITY`, `CHAT_SESSION_TIMEOUT`, … — see
//!   `config.rs` for the full tunable list
//! - `RUST_LOG` — tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin bot
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use prompthound::chat::policy::RandomPolicy;
use prompthound::search::{HttpSearchClient, SearchClient};
use prompthound::transport::console::ConsoleTransport;
use prompthound::transport::{Attachment, ChannelRef, InboundMessage, UserId};
use prompthound::{BotConfig, LexiconIndex, OpenAiCompatModel, Router, SessionStore, Strings};

fn line_to_message(
    transport: &ConsoleTransport,
    channel: &ChannelRef,
    bot_name: &str,
    line: &str,
) -> InboundMessage {
    let id = transport.record_inbound("operator", line);
    let mention_token = format!("@{}", bot_name);

    // Any whitespace-separated token that looks like an image path becomes
    // an attachment, so the vision pipelines are reachable from the
    // console.
    let attachments: Vec<Attachment> = line
        .split_whitespace()
        .map(|token| Attachment {
            filename: token.to_string(),
            url: token.to_string(),
        })
        .filter(|attachment| attachment.is_image())
        .collect();

    InboundMessage {
        id,
        channel: channel.clone(),
        author_id: UserId("operator".into()),
        author_name: "operator".into(),
        author_is_bot: false,
        mentions_bot: line.contains(&mention_token),
        content: line.replace(&mention_token, bot_name),
        attachments,
        reply_to: None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,prompthound=debug".into()),
        )
        .init();

    let config = BotConfig::from_env().context("configuration error")?;
    let strings = Strings::load_default();
    let lexicon = Arc::new(LexiconIndex::load(&config.lexicon_paths));

    let model = Arc::new(OpenAiCompatModel::new(
        config.api_base.clone(),
        config.api_key.clone(),
        config.model.clone(),
    ));
    let search: Option<Arc<dyn SearchClient>> = config
        .search_endpoint
        .clone()
        .map(|endpoint| Arc::new(HttpSearchClient::new(endpoint)) as Arc<dyn SearchClient>);
    let transport = Arc::new(ConsoleTransport::new());
    let sessions = Arc::new(SessionStore::new());

    let router = Router::new(
        config.clone(),
        strings,
        lexicon,
        sessions,
        transport.clone(),
        model.clone(),
        model,
        search,
        Arc::new(RandomPolicy::new()),
    );

    tracing::info!(version = prompthound::VERSION, "prompthound starting");
    tracing::info!(model = %config.model, bot = %config.bot_name, "console transport ready");
    tracing::info!("type a line to chat; mention with @{}; ctrl-c to exit", config.bot_name);

    let channel = ChannelRef("console".into());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("stdin read failed")? {
                    Some(line) if !line.trim().is_empty() => {
                        let message =
                            line_to_message(&transport, &channel, &config.bot_name, line.trim());
                        router.handle_message(message).await;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
