//! Web search client used by the investigative pipeline.
//!
//! The provider is a plain JSON lookup service: free-text query in, a list
//! of `{title, body, url}` results out. Individual query failures are the
//! caller's business; the pipeline logs and skips them rather than
//! aborting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SearchError;

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub body: String,
    pub url: String,
}

// ---------------------------------------------------------------------------
// SearchClient trait
// ---------------------------------------------------------------------------

/// External lookup service.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Run one query, returning at most `max_results` hits.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Client for a JSON search endpoint accepting
/// `GET {endpoint}?q=<query>&format=json`.
#[derive(Debug, Clone)]
pub struct HttpSearchClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSearchClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Pull results out of the provider's response shape. Tolerates the
    /// common field spellings (`body`/`snippet`/`content`, `url`/`href`).
    fn extract_results(payload: &Value, max_results: usize) -> Vec<SearchResult> {
        let items = payload
            .get("results")
            .and_then(|r| r.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[]);

        items
            .iter()
            .filter_map(|item| {
                let url = item
                    .get("url")
                    .or_else(|| item.get("href"))
                    .and_then(|v| v.as_str())?;
                let title = item
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or(url)
                    .to_string();
                let body = item
                    .get("body")
                    .or_else(|| item.get("snippet"))
                    .or_else(|| item.get("content"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                Some(SearchResult {
                    title,
                    body,
                    url: url.to_string(),
                })
            })
            .take(max_results)
            .collect()
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        log::debug!("web search: {:?} (max {})", query, max_results);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .map_err(|e| SearchError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message: body.chars().take(300).collect(),
            });
        }

        let payload: Value = response.json().await.map_err(|e| SearchError::Request {
            message: format!("failed to parse search response: {}", e),
        })?;

        Ok(Self::extract_results(&payload, max_results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_results_standard_fields() {
        let payload = serde_json::json!({
            "results": [
                { "title": "A", "body": "first", "url": "https://a" },
                { "title": "B", "body": "second", "url": "https://b" },
                { "title": "C", "body": "third", "url": "https://c" }
            ]
        });
        let results = HttpSearchClient::extract_results(&payload, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "A");
        assert_eq!(results[1].url, "https://b");
    }

    #[test]
    fn test_extract_results_alternate_spellings() {
        let payload = serde_json::json!({
            "results": [
                { "snippet": "alt body", "href": "https://alt" }
            ]
        });
        let results = HttpSearchClient::extract_results(&payload, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].body, "alt body");
        // Missing title falls back to the url.
        assert_eq!(results[0].title, "https://alt");
    }

    #[test]
    fn test_extract_results_skips_url_less_items() {
        let payload = serde_json::json!({
            "results": [
                { "title": "no url" },
                { "title": "ok", "url": "https://ok" }
            ]
        });
        let results = HttpSearchClient::extract_results(&payload, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "ok");
    }

    #[test]
    fn test_extract_results_empty_payload() {
        let payload = serde_json::json!({});
        assert!(HttpSearchClient::extract_results(&payload, 5).is_empty());
    }
}
