use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::config::Config;

/// One result item as returned by the search provider. Transient: used only
/// to build the prompt context for a single exchange, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchResultItem>,
}

/// Thin client for the Custom Search JSON API.
///
/// Search augmentation is optional, not essential: missing credentials and
/// provider failures both degrade to an empty result list so that a chat
/// turn can never be aborted by the search leg.
#[derive(Clone)]
pub struct SearchClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    engine_id: Option<String>,
}

impl SearchClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.search_base_url.clone(),
            api_key: config.search_api_key.clone(),
            engine_id: config.search_engine_id.clone(),
        }
    }

    /// Runs a search for `query` and returns the provider's raw item list.
    /// Truncation to the top-N is the formatter's job, not this client's.
    /// Callers are expected not to pass empty queries; the client does not
    /// validate them.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> Vec<SearchResultItem> {
        let (api_key, engine_id) = match (&self.api_key, &self.engine_id) {
            (Some(key), Some(cx)) => (key, cx),
            _ => {
                warn!("search API key or engine id is missing; skipping search");
                return Vec::new();
            }
        };

        match self.fetch(api_key, engine_id, query).await {
            Ok(items) => {
                debug!(count = items.len(), "search returned results");
                items
            }
            Err(e) => {
                error!(error = ?e, "search request failed; continuing without results");
                Vec::new()
            }
        }
    }

    async fn fetch(
        &self,
        api_key: &str,
        engine_id: &str,
        query: &str,
    ) -> Result<Vec<SearchResultItem>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("key", api_key), ("cx", engine_id), ("q", query)])
            .send()
            .await
            .context("Failed to send request to the search API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(anyhow::anyhow!(
                "Search API request failed with status {}: {}",
                status,
                error_body
            ));
        }

        let parsed = response
            .json::<SearchResponse>()
            .await
            .context("Failed to parse JSON response from the search API")?;
        Ok(parsed.items)
    }
}

/// Renders search results into a compact text block for LLM context.
///
/// Only the first 3 items are kept to bound prompt size. An empty list
/// renders as the literal sentinel `"No results found."` so downstream
/// prompt assembly always has non-empty context to fold in.
pub fn format_search_results(results: &[SearchResultItem]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    results
        .iter()
        .take(3)
        .map(|item| {
            format!(
                "Title: {}\nLink: {}\nSnippet: {}\n",
                item.title, item.link, item.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
