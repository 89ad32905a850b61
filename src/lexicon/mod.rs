//! Static lexicon: category → term/translation lists with a lowercase
//! reverse index.
//!
//! The lexicon is optional enrichment (prompts work without it), so loading
//! never fails the process. Any read or parse problem degrades to an empty
//! index with a logged warning.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::LexiconPaths;
use crate::error::LexiconError;

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

/// One lexicon term. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub term: String,
    pub translation: String,
    pub category: String,
}

/// On-disk entry shape: either key may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawEntry {
    #[serde(default)]
    term: String,
    #[serde(default)]
    translation: String,
}

type RawLexicon = IndexMap<String, Vec<RawEntry>>;

// ---------------------------------------------------------------------------
// Context sample bounds
// ---------------------------------------------------------------------------

/// Categories included in the generation-bias sample.
const SAMPLE_CATEGORIES: usize = 10;
/// Entries scanned per sampled category.
const SAMPLE_SCAN: usize = 20;
/// Terms emitted per sampled category.
const SAMPLE_TERMS: usize = 10;

// ---------------------------------------------------------------------------
// LexiconIndex
// ---------------------------------------------------------------------------

/// Read-only lexicon shared across the process via `Arc`.
#[derive(Debug, Default)]
pub struct LexiconIndex {
    /// Category → entries, in file order.
    categories: IndexMap<String, Vec<LexiconEntry>>,
    /// Lowercased term → entries carrying that term, in insertion order.
    terms: IndexMap<String, Vec<LexiconEntry>>,
}

impl LexiconIndex {
    /// An index with no content. Search and sampling return nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the lexicon with the configured precedence, degrading to an
    /// empty index on any failure.
    pub fn load(paths: &LexiconPaths) -> Self {
        match Self::try_load(paths) {
            Ok(index) => {
                tracing::info!(
                    categories = index.categories.len(),
                    terms = index.term_count(),
                    "lexicon loaded"
                );
                index
            }
            Err(e) => {
                tracing::warn!("lexicon load failed, continuing with empty index: {}", e);
                Self::empty()
            }
        }
    }

    fn try_load(paths: &LexiconPaths) -> Result<Self, LexiconError> {
        if paths.classified.exists() {
            let raw = read_raw(&paths.classified)?;
            return Ok(Self::from_raw(raw));
        }
        if paths.merged.exists() {
            let raw = read_raw(&paths.merged)?;
            return Ok(Self::from_raw(raw));
        }

        // No prepared knowledge base: merge the raw sources, missing files
        // contributing nothing, and persist the result for later startups.
        let knowledge = read_raw_or_empty(&paths.knowledge)?;
        let raw_lexicon = read_raw_or_empty(&paths.raw_lexicon)?;
        let merged = merge_sources(knowledge, raw_lexicon);

        match serde_json::to_string_pretty(&merged) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&paths.merged, json) {
                    tracing::warn!(
                        "could not persist merged lexicon to {}: {}",
                        paths.merged.display(),
                        e
                    );
                }
            }
            Err(e) => tracing::warn!("could not serialize merged lexicon: {}", e),
        }

        Ok(Self::from_raw(merged))
    }

    /// Build the index from parsed category data.
    fn from_raw(raw: RawLexicon) -> Self {
        let mut categories: IndexMap<String, Vec<LexiconEntry>> = IndexMap::new();
        let mut terms: IndexMap<String, Vec<LexiconEntry>> = IndexMap::new();

        for (category, items) in raw {
            let entries: Vec<LexiconEntry> = items
                .into_iter()
                .map(|item| LexiconEntry {
                    term: item.term,
                    translation: item.translation,
                    category: category.clone(),
                })
                .collect();

            for entry in &entries {
                let key = entry.term.trim().to_lowercase();
                if key.is_empty() {
                    continue;
                }
                terms.entry(key).or_default().push(entry.clone());
            }
            categories.insert(category, entries);
        }

        Self { categories, terms }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Category names in file order.
    pub fn categories(&self) -> Vec<&str> {
        self.categories.keys().map(|s| s.as_str()).collect()
    }

    /// Entries of a category by exact name.
    pub fn category_entries(&self, name: &str) -> Option<&[LexiconEntry]> {
        self.categories.get(name).map(|v| v.as_slice())
    }

    /// Entries of a category by 1-based listing index.
    pub fn category_by_index(&self, index: usize) -> Option<(&str, &[LexiconEntry])> {
        if index == 0 {
            return None;
        }
        self.categories
            .get_index(index - 1)
            .map(|(name, entries)| (name.as_str(), entries.as_slice()))
    }

    fn term_count(&self) -> usize {
        self.terms.values().map(|v| v.len()).sum()
    }

    /// Search for a term: exact lowercase match first, then substring
    /// matches either way around, deduplicated by (term, category).
    ///
    /// Candidate collection stops once `2 × limit` entries have been
    /// gathered; the final list is truncated to `limit`.
    pub fn search(&self, query: &str, limit: usize) -> Vec<LexiconEntry> {
        if self.terms.is_empty() || limit == 0 {
            return Vec::new();
        }
        let query_lower = query.to_lowercase();
        let mut candidates: Vec<&LexiconEntry> = Vec::new();

        if let Some(exact) = self.terms.get(&query_lower) {
            candidates.extend(exact.iter());
        }
        for (term, entries) in &self.terms {
            if term.contains(&query_lower) || query_lower.contains(term.as_str()) {
                candidates.extend(entries.iter());
                if candidates.len() >= limit * 2 {
                    break;
                }
            }
        }

        let mut seen: Vec<(&str, &str)> = Vec::new();
        let mut results = Vec::new();
        for entry in candidates {
            let key = (entry.term.as_str(), entry.category.as_str());
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            results.push(entry.clone());
            if results.len() >= limit {
                break;
            }
        }
        results
    }

    /// A compact preview used to bias prompt generation toward known
    /// vocabulary without shipping the whole index.
    pub fn context_sample(&self) -> String {
        let mut lines = Vec::new();
        for (category, entries) in self.categories.iter().take(SAMPLE_CATEGORIES) {
            let terms: Vec<&str> = entries
                .iter()
                .take(SAMPLE_SCAN)
                .map(|e| e.term.as_str())
                .filter(|t| !t.is_empty())
                .take(SAMPLE_TERMS)
                .collect();
            if !terms.is_empty() {
                lines.push(format!("{}: {}", category, terms.join(", ")));
            }
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// File reading and merging
// ---------------------------------------------------------------------------

fn read_raw(path: &Path) -> Result<RawLexicon, LexiconError> {
    let text = std::fs::read_to_string(path).map_err(|source| LexiconError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| LexiconError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn read_raw_or_empty(path: &Path) -> Result<RawLexicon, LexiconError> {
    if path.exists() {
        read_raw(path)
    } else {
        Ok(RawLexicon::new())
    }
}

/// Merge two raw sources. `primary` categories come first and their terms
/// win; `secondary` contributes new categories and new terms only. Within a
/// category, terms are unique by trimmed spelling.
fn merge_sources(primary: RawLexicon, secondary: RawLexicon) -> RawLexicon {
    let mut merged = primary;
    for (category, items) in secondary {
        match merged.get_mut(&category) {
            Some(existing) => {
                for item in items {
                    let term = item.term.trim();
                    if term.is_empty() {
                        continue;
                    }
                    if !existing.iter().any(|e| e.term.trim() == term) {
                        existing.push(item);
                    }
                }
            }
            None => {
                merged.insert(category, items);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn index_from_json(json: &str) -> LexiconIndex {
        LexiconIndex::from_raw(serde_json::from_str(json).unwrap())
    }

    fn temp_paths(dir: &tempfile::TempDir) -> LexiconPaths {
        LexiconPaths {
            classified: dir.path().join("classified_lexicon.json"),
            merged: dir.path().join("merged_knowledge_base.json"),
            knowledge: dir.path().join("knowledge_base.json"),
            raw_lexicon: dir.path().join("lexicon.json"),
        }
    }

    #[test]
    fn test_search_substring_hit() {
        let index = index_from_json(r#"{"A": [{"term": "fox ears", "translation": "狐耳"}]}"#);
        let hits = index.search("fox", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].term, "fox ears");
        assert_eq!(hits[0].category, "A");

        assert!(index.search("nonexistent", 5).is_empty());
    }

    #[test]
    fn test_search_exact_ranked_first() {
        let index = index_from_json(
            r#"{
                "style": [
                    {"term": "catgirl", "translation": "t1"},
                    {"term": "cat", "translation": "t2"}
                ]
            }"#,
        );
        let hits = index.search("cat", 5);
        assert_eq!(hits[0].term, "cat");
        assert!(hits.iter().any(|h| h.term == "catgirl"));
    }

    #[test]
    fn test_search_dedup_and_limit() {
        let index = index_from_json(
            r#"{
                "a": [{"term": "blue sky", "translation": ""}],
                "b": [{"term": "blue sky", "translation": ""}],
                "c": [{"term": "blue hair", "translation": ""}],
                "d": [{"term": "blue eyes", "translation": ""}]
            }"#,
        );
        let hits = index.search("blue sky", 2);
        assert_eq!(hits.len(), 2);
        // Same term in two categories is two distinct results, not a dup.
        assert_eq!(hits[0].category, "a");
        assert_eq!(hits[1].category, "b");
    }

    #[test]
    fn test_search_query_contains_term() {
        let index = index_from_json(r#"{"a": [{"term": "sunset", "translation": ""}]}"#);
        let hits = index.search("a warm sunset over hills", 3);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].term, "sunset");
    }

    #[test]
    fn test_context_sample_shape() {
        let index = index_from_json(
            r#"{
                "style": [
                    {"term": "watercolor", "translation": ""},
                    {"term": "", "translation": "skipped"},
                    {"term": "oil painting", "translation": ""}
                ],
                "mood": [{"term": "serene", "translation": ""}]
            }"#,
        );
        let sample = index.context_sample();
        assert_eq!(sample, "style: watercolor, oil painting\nmood: serene");
    }

    #[test]
    fn test_category_lookup() {
        let index = index_from_json(
            r#"{"first": [{"term": "a", "translation": ""}], "second": []}"#,
        );
        assert_eq!(index.categories(), vec!["first", "second"]);
        assert_eq!(index.category_by_index(1).unwrap().0, "first");
        assert!(index.category_by_index(0).is_none());
        assert!(index.category_by_index(3).is_none());
        assert_eq!(index.category_entries("first").unwrap().len(), 1);
    }

    #[test]
    fn test_merge_overlapping_category() {
        let primary: RawLexicon = serde_json::from_str(
            r#"{"style": [{"term": "watercolor", "translation": "primary wins"}]}"#,
        )
        .unwrap();
        let secondary: RawLexicon = serde_json::from_str(
            r#"{
                "style": [
                    {"term": "watercolor", "translation": "loses"},
                    {"term": "ink wash", "translation": ""}
                ],
                "mood": [{"term": "serene", "translation": ""}]
            }"#,
        )
        .unwrap();

        let merged = merge_sources(primary, secondary);
        let style = &merged["style"];
        assert_eq!(style.len(), 2);
        assert_eq!(style[0].translation, "primary wins");
        assert!(style.iter().any(|e| e.term == "ink wash"));
        assert!(merged.contains_key("mood"));

        // Every term appears exactly once per category.
        let terms: Vec<&str> = style.iter().map(|e| e.term.as_str()).collect();
        let mut deduped = terms.clone();
        deduped.dedup();
        assert_eq!(terms, deduped);
    }

    #[test]
    fn test_load_precedence_classified_first() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_paths(&dir);
        std::fs::write(
            &paths.classified,
            r#"{"win": [{"term": "classified", "translation": ""}]}"#,
        )
        .unwrap();
        std::fs::write(
            &paths.merged,
            r#"{"lose": [{"term": "merged", "translation": ""}]}"#,
        )
        .unwrap();

        let index = LexiconIndex::load(&paths);
        assert_eq!(index.categories(), vec!["win"]);
    }

    #[test]
    fn test_load_merges_and_persists_when_nothing_prepared() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_paths(&dir);
        std::fs::write(
            &paths.knowledge,
            r#"{"style": [{"term": "watercolor", "translation": ""}]}"#,
        )
        .unwrap();
        std::fs::write(
            &paths.raw_lexicon,
            r#"{"style": [{"term": "ink wash", "translation": ""}]}"#,
        )
        .unwrap();

        let index = LexiconIndex::load(&paths);
        assert_eq!(index.category_entries("style").unwrap().len(), 2);
        // The merge result is persisted for the next startup.
        assert!(paths.merged.exists());

        let reloaded = LexiconIndex::load(&paths);
        assert_eq!(reloaded.category_entries("style").unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_paths(&dir);
        std::fs::write(&paths.classified, "{ not json").unwrap();

        let index = LexiconIndex::load(&paths);
        assert!(index.is_empty());
        assert!(index.search("anything", 5).is_empty());
        assert!(index.context_sample().is_empty());
    }

    #[test]
    fn test_missing_everything_gives_empty_index() {
        let paths = LexiconPaths {
            classified: PathBuf::from("/nonexistent/classified.json"),
            merged: PathBuf::from("/nonexistent/merged.json"),
            knowledge: PathBuf::from("/nonexistent/knowledge.json"),
            raw_lexicon: PathBuf::from("/nonexistent/lexicon.json"),
        };
        let index = LexiconIndex::load(&paths);
        assert!(index.is_empty());
    }
}
