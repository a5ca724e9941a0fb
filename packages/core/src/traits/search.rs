//! Pluggable search client: issues one site-restricted query and returns
//! a list of result items.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SearchError, SearchResult};

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

/// A single item returned by a search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub link: String,
    pub display_link: String,
}

impl SearchHit {
    pub fn new(
        title: impl Into<String>,
        snippet: impl Into<String>,
        link: impl Into<String>,
        display_link: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            snippet: snippet.into(),
            link: link.into(),
            display_link: display_link.into(),
        }
    }
}

/// Issues one query against a site-restricted search provider.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, run_id: &str, search_query: &str) -> SearchResult<Vec<SearchHit>>;
}

/// Deterministic mock matching the reference provider's fixture behavior:
/// queries containing " and " yield zero hits, otherwise a single
/// synthetic hit derived from the query's `site:` domain.
pub struct DeterministicMockSearchClient;

#[async_trait]
impl SearchClient for DeterministicMockSearchClient {
    async fn search(&self, run_id: &str, search_query: &str) -> SearchResult<Vec<SearchHit>> {
        if run_id.is_empty() {
            return Err(SearchError::MissingRunId);
        }
        if search_query.is_empty() {
            return Ok(Vec::new());
        }

        let normalized_query = search_query.to_lowercase();
        if normalized_query.contains(" and ") {
            return Ok(Vec::new());
        }

        let domain = extract_domain_from_search_query(search_query);
        let query_hash = {
            let mut hasher = Sha256::new();
            hasher.update(search_query.as_bytes());
            hex::encode(hasher.finalize())[..12].to_string()
        };
        Ok(vec![SearchHit::new(
            format!("Mock result for {domain}"),
            format!("Deterministic mock hit for query '{search_query}'."),
            format!("mock://{domain}/jobs/{query_hash}"),
            domain,
        )])
    }
}

fn extract_domain_from_search_query(search_query: &str) -> String {
    let first_token = search_query.trim().split(' ').next().unwrap_or("");
    if let Some(candidate) = first_token.strip_prefix("site:") {
        let candidate = candidate.trim().to_lowercase();
        if !candidate.is_empty() {
            return candidate;
        }
    }
    "example.com".to_string()
}

/// Configuration for the real Brave Search API client.
pub struct BraveSearchConfig {
    pub api_key: SecretString,
    pub freshness: String,
}

impl BraveSearchConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            freshness: "pm".to_string(),
        }
    }
}

/// Hits Brave's web search API. Non-2xx responses and network/timeout
/// failures both surface as `SearchError::Network`; only genuinely
/// malformed response bodies surface as `SearchError::MalformedResponse`.
pub struct BraveSearchClient {
    config: BraveSearchConfig,
    http: reqwest::Client,
}

impl BraveSearchClient {
    pub fn new(config: BraveSearchConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SearchClient for BraveSearchClient {
    async fn search(&self, run_id: &str, search_query: &str) -> SearchResult<Vec<SearchHit>> {
        if run_id.is_empty() {
            return Err(SearchError::MissingRunId);
        }
        if search_query.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .get(BRAVE_SEARCH_URL)
            .query(&[("q", search_query), ("freshness", &self.config.freshness)])
            .header("Accept", "application/json")
            .header("Accept-Encoding", "gzip")
            .header("X-Subscription-Token", self.config.api_key.expose_secret())
            .header("User-Agent", "jobato/1.0")
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| SearchError::Network(Box::new(e)))?;

        if !response.status().is_success() {
            return Err(SearchError::Network(Box::new(std::io::Error::other(
                format!("brave search request failed with status {}", response.status()),
            ))));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|_| SearchError::MalformedResponse)?;

        tracing::info!(
            run_id,
            search_query,
            "brave_search.completed"
        );
        Ok(parse_brave_results(&payload))
    }
}

fn parse_brave_results(payload: &serde_json::Value) -> Vec<SearchHit> {
    let Some(items) = payload
        .get("web")
        .and_then(|w| w.get("results"))
        .and_then(|r| r.as_array())
    else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("");
            let snippet = item
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let link = item.get("url").and_then(|v| v.as_str()).unwrap_or("");
            let mut display_link = item
                .get("profile")
                .and_then(|p| p.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if display_link.is_empty() && !link.is_empty() {
                display_link = url::Url::parse(link)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_default();
            }
            SearchHit::new(title, snippet, link, display_link)
        })
        .collect()
}
