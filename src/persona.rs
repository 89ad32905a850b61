//! Persona prompt assembly.
//!
//! Bridges the string pack and the model layer: every system prompt the bot
//! sends is composed here from templates plus runtime values (bot name,
//! lexicon sample, prompt guide, chat transcript).

use crate::llms::{ChatRequest, ModelMessage};
use crate::transport::HistoryMessage;
use crate::translations::{fill, Strings};

/// The constrained yes/no classification prompt.
pub fn nsfw_precheck_prompt(strings: &Strings) -> String {
    strings.prompt("nsfw_precheck").to_string()
}

/// System prompt for the simple commentary mode, by classification.
pub fn commentary_system(strings: &Strings, nsfw: bool) -> String {
    let key = if nsfw {
        "commentary_system_nsfw"
    } else {
        "commentary_system_safe"
    };
    strings.prompt(key).to_string()
}

/// System prompt for reverse-prompt extraction, by classification.
///
/// The safe variant is biased toward known lexicon vocabulary; the guide
/// text is shared by both.
pub fn reverse_system(strings: &Strings, nsfw: bool, guide: &str, lexicon_sample: &str) -> String {
    if nsfw {
        fill(strings.prompt("reverse_system_nsfw"), &[("guide", guide)])
    } else {
        fill(
            strings.prompt("reverse_system_safe"),
            &[("guide", guide), ("lexicon", lexicon_sample)],
        )
    }
}

/// System prompt for text-to-prompt generation, by classification.
pub fn generate_system(strings: &Strings, nsfw: bool, guide: &str, idea: &str) -> String {
    let key = if nsfw {
        "generate_system_nsfw"
    } else {
        "generate_system_safe"
    };
    fill(strings.prompt(key), &[("guide", guide), ("idea", idea)])
}

/// System prompt for the investigative vision-analysis stage.
pub fn vision_analysis_system(strings: &Strings) -> String {
    strings.prompt("vision_analysis_system").to_string()
}

/// System prompt for the investigative synthesis stage.
pub fn synthesis_system(strings: &Strings, bot_name: &str) -> String {
    fill(strings.prompt("synthesis_system"), &[("bot", bot_name)])
}

/// Serialize channel history for a chat transcript, oldest first.
pub fn format_transcript(history: &[HistoryMessage]) -> String {
    history
        .iter()
        .map(|msg| format!("{}: {}", msg.author_name, msg.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the full role-tagged request for a chat reply.
///
/// The persona system prompt (awakened or ambient variant) is concatenated
/// with the serialized transcript; the user turn is a short cue to respond
/// in character.
pub fn build_chat_request(
    strings: &Strings,
    bot_name: &str,
    awakened: bool,
    user_name: &str,
    content: &str,
    history: &[HistoryMessage],
) -> ChatRequest {
    let system = if awakened {
        fill(
            strings.prompt("chat_system_awakened"),
            &[("bot", bot_name), ("user", user_name), ("content", content)],
        )
    } else {
        fill(strings.prompt("chat_system_ambient"), &[("bot", bot_name)])
    };

    let prompt = format!("{}\n### Chat log:\n{}", system, format_transcript(history));
    let user_turn = fill(strings.prompt("chat_user_turn"), &[("bot", bot_name)]);

    ChatRequest::new(vec![
        ModelMessage::system(prompt),
        ModelMessage::user(user_turn),
    ])
    .with_temperature(0.9)
}
