use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::Strategy;
use crate::config::SearchApiConfig;
use crate::error::{Result, ScrapeError};
use crate::models::{SearchResult, StrategyKind};

const MAX_PER_REQUEST: usize = 100;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    position: Option<u32>,
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}

/// Paid search API speaking the SerpAPI JSON shape. Last resort in the chain.
pub struct SearchApiStrategy {
    client: reqwest::Client,
    config: SearchApiConfig,
}

impl SearchApiStrategy {
    pub fn new(config: SearchApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }
}

/// Turns an API body into results. "No results" answers are a clean empty.
fn read_response(status: u16, body: &str, limit: usize) -> Result<Vec<SearchResult>> {
    if status == 429 {
        return Err(ScrapeError::Blocked("search api rate limited".to_string()));
    }
    let parsed: ApiResponse = serde_json::from_str(body)?;
    if let Some(error) = parsed.error {
        let lowered = error.to_lowercase();
        if lowered.contains("hasn't returned any results") || lowered.contains("no results") {
            return Ok(Vec::new());
        }
        if lowered.contains("rate limit") || lowered.contains("too many requests") || lowered.contains("run out of searches") {
            return Err(ScrapeError::Blocked(error));
        }
        return Err(ScrapeError::Api(error));
    }
    if !(200..300).contains(&status) {
        return Err(ScrapeError::Api(format!("unexpected status {}", status)));
    }

    let mut seen = HashSet::new();
    let results = parsed
        .organic_results
        .into_iter()
        .filter(|r| r.link.starts_with("http") && seen.insert(r.link.clone()))
        .take(limit)
        .enumerate()
        .map(|(i, r)| SearchResult {
            position: r.position.unwrap_or(i as u32 + 1),
            title: r.title,
            link: r.link,
            snippet: r.snippet,
            origin: StrategyKind::ExternalSearchApi,
        })
        .collect();
    Ok(results)
}

#[async_trait]
impl Strategy for SearchApiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ExternalSearchApi
    }

    async fn attempt(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(ScrapeError::NotConfigured("SEARCH_API_KEY"));
        };
        let num = limit.clamp(1, MAX_PER_REQUEST).to_string();
        debug!(query, num = %num, "querying search api");

        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("num", num.as_str()),
                ("hl", "en"),
                ("gl", "us"),
                ("api_key", api_key),
            ])
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        let outcome = read_response(status, &body, limit);
        if let Err(e) = &outcome {
            warn!(query, error = %e, "search api attempt failed");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organic_results_map_to_search_results() {
        let body = r#"{
            "search_metadata": {"status": "Success"},
            "organic_results": [
                {"position": 1, "title": "A", "link": "https://rival.io/a", "snippet": "sa"},
                {"position": 2, "title": "A again", "link": "https://rival.io/a"},
                {"position": 3, "title": "B", "link": "https://other.io/b"}
            ]
        }"#;
        let results = read_response(200, body, 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].snippet, "sa");
        assert_eq!(results[1].position, 3);
        assert_eq!(results[1].origin, StrategyKind::ExternalSearchApi);
    }

    #[test]
    fn no_results_answer_is_empty_not_error() {
        let body = r#"{"error": "Google hasn't returned any results for this query."}"#;
        assert!(read_response(200, body, 10).unwrap().is_empty());
    }

    #[test]
    fn quota_errors_count_as_blocked() {
        assert!(read_response(429, "", 10).unwrap_err().is_blocked());
        let body = r#"{"error": "Your account has run out of searches."}"#;
        assert!(read_response(200, body, 10).unwrap_err().is_blocked());
        let body = r#"{"error": "Invalid API key."}"#;
        assert!(matches!(read_response(401, body, 10), Err(ScrapeError::Api(_))));
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let strategy = SearchApiStrategy::new(SearchApiConfig {
            endpoint: "http://127.0.0.1:9/search.json".to_string(),
            api_key: None,
        })
        .unwrap();
        assert!(!strategy.is_configured());
        assert!(matches!(
            strategy.attempt("q", 10).await,
            Err(ScrapeError::NotConfigured(_))
        ));
    }
}
