//! Reply and prompt strings for the bot.
//!
//! All user-visible wording (canned compliments, usage errors, persona
//! system prompts) lives in the embedded `en.json` pack so control logic
//! never hardcodes copy. Strings may carry `{name}` placeholders filled at
//! the call site via [`fill`].

use serde_json::Value;

/// Raw English string pack, embedded at compile time.
pub const EN_JSON: &str = include_str!("en.json");

/// Typed accessor over the string pack.
#[derive(Debug, Clone)]
pub struct Strings {
    data: Value,
}

impl Strings {
    /// Load the default English pack.
    pub fn load_default() -> Self {
        let data = serde_json::from_str(EN_JSON).expect("embedded en.json must parse");
        Self { data }
    }

    /// Load a pack from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let data = serde_json::from_str(json)
            .map_err(|e| format!("failed to parse string pack: {}", e))?;
        Ok(Self { data })
    }

    /// Get a value by dotted path (e.g. `"replies.farewell"`).
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.data;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn get_str(&self, path: &str) -> &str {
        self.get(path).and_then(|v| v.as_str()).unwrap_or_else(|| {
            // A missing key is a packaging bug, not a runtime condition.
            panic!("string pack missing key: {}", path)
        })
    }

    /// A user-facing reply string from the `replies` section.
    pub fn reply(&self, name: &str) -> &str {
        self.get_str(&format!("replies.{}", name))
    }

    /// A model-facing prompt template from the `prompts` section.
    pub fn prompt(&self, name: &str) -> &str {
        self.get_str(&format!("prompts.{}", name))
    }

    /// A progress line from the `progress` section.
    pub fn progress(&self, name: &str) -> &str {
        self.get_str(&format!("progress.{}", name))
    }

    /// The canned compliment list.
    pub fn compliments(&self) -> Vec<&str> {
        self.get("replies.compliments")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

impl Default for Strings {
    fn default() -> Self {
        Self::load_default()
    }
}

/// Fill `{name}` placeholders in a template.
///
/// Pairs are applied in order; unknown placeholders are left intact so a
/// template typo shows up in the output instead of vanishing.
pub fn fill(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in pairs {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pack_parses() {
        let strings = Strings::load_default();
        assert!(!strings.reply("farewell").is_empty());
        assert!(!strings.prompt("nsfw_precheck").is_empty());
        assert!(strings.compliments().len() >= 10);
    }

    #[test]
    fn test_dotted_path() {
        let strings = Strings::load_default();
        assert!(strings.get("replies.cancelled").is_some());
        assert!(strings.get("replies.no_such_key").is_none());
    }

    #[test]
    fn test_fill() {
        let out = fill("hi {user}, I am {bot}", &[("user", "amy"), ("bot", "rex")]);
        assert_eq!(out, "hi amy, I am rex");
    }

    #[test]
    fn test_fill_leaves_unknown() {
        let out = fill("hi {user} {unknown}", &[("user", "amy")]);
        assert_eq!(out, "hi amy {unknown}");
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(Strings::from_json("not json").is_err());
    }
}
