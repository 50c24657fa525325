//! The strategy chain: cache lookup, then each strategy in priority order
//! until one produces results.
//!
//! Attempt outcomes:
//! - `Success`: at least one result. Cached, returned, nothing else runs.
//! - `Blocked` / `Error`: logged, next strategy.
//! - `Empty`: terminal for the query, except when the very first strategy
//!   comes back empty; then exactly one alternate strategy is tried to rule
//!   out a strategy-specific false negative.
//!
//! Strategies are never raced against each other for one query.

use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::pause_between_queries;
use crate::cache::{cache_key, ResultCache};
use crate::error::ScrapeError;
use crate::models::{SearchResult, StrategyKind};
use crate::strategies::Strategy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AttemptStatus {
    Success(usize),
    Blocked(String),
    Empty,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub strategy: StrategyKind,
    pub status: AttemptStatus,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "strategy", rename_all = "snake_case")]
pub enum Resolution {
    Cached,
    Success(StrategyKind),
    Empty(StrategyKind),
    Exhausted,
}

/// Full account of one chained search.
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub resolution: Resolution,
    pub attempts: Vec<AttemptRecord>,
}

pub struct StrategyChain {
    strategies: Vec<Arc<dyn Strategy>>,
    cache: Arc<dyn ResultCache>,
    query_delay_ms: (u64, u64),
}

impl StrategyChain {
    /// `strategies` must already be in priority order.
    pub fn new(strategies: Vec<Arc<dyn Strategy>>, cache: Arc<dyn ResultCache>) -> Self {
        Self {
            strategies,
            cache,
            query_delay_ms: (500, 5_000),
        }
    }

    pub fn with_query_delay(mut self, range_ms: (u64, u64)) -> Self {
        self.query_delay_ms = range_ms;
        self
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// Effective order for the next query: priority order, with saturated
    /// strategies moved to the back.
    pub fn order(&self) -> Vec<Arc<dyn Strategy>> {
        let (ready, deferred): (Vec<_>, Vec<_>) =
            self.strategies.iter().cloned().partition(|s| !s.is_saturated());
        for s in &deferred {
            debug!(strategy = %s.kind(), "rate window full, trying it last");
        }
        ready.into_iter().chain(deferred).collect()
    }

    /// Randomised pause a caller inserts between two of its queries.
    pub async fn pace(&self) {
        pause_between_queries(self.query_delay_ms).await;
    }

    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        self.search_detailed(query, limit).await.results
    }

    pub async fn search_detailed(&self, query: &str, limit: usize) -> ChainReport {
        let key = cache_key(query, limit);
        if let Some(results) = self.cache.get(&key).await {
            debug!(query, hits = results.len(), "cache hit");
            return ChainReport {
                query: query.to_string(),
                results,
                resolution: Resolution::Cached,
                attempts: Vec::new(),
            };
        }

        let mut attempts = Vec::new();
        let mut first_empty: Option<StrategyKind> = None;

        for (i, strategy) in self.order().iter().enumerate() {
            let kind = strategy.kind();
            let started = Instant::now();
            let outcome = strategy.attempt(query, limit).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let status = match &outcome {
                Ok(results) if !results.is_empty() => AttemptStatus::Success(results.len()),
                Ok(_) => AttemptStatus::Empty,
                Err(ScrapeError::Blocked(signal)) => AttemptStatus::Blocked(signal.clone()),
                Err(e) => AttemptStatus::Error(e.to_string()),
            };
            attempts.push(AttemptRecord {
                strategy: kind,
                status: status.clone(),
                elapsed_ms,
            });

            match (status, outcome) {
                (AttemptStatus::Success(found), Ok(results)) => {
                    info!(query, strategy = %kind, found, "✅ strategy succeeded");
                    self.cache.put(&key, &results).await;
                    return ChainReport {
                        query: query.to_string(),
                        results,
                        resolution: Resolution::Success(kind),
                        attempts,
                    };
                }
                (AttemptStatus::Empty, _) => {
                    if i == 0 {
                        debug!(query, strategy = %kind, "first strategy came back empty, trying one alternate");
                        first_empty = Some(kind);
                        continue;
                    }
                    let origin = first_empty.unwrap_or(kind);
                    info!(query, strategy = %kind, "no results for query");
                    return self.finish_empty(query, origin, attempts);
                }
                (status, _) => {
                    warn!(query, strategy = %kind, ?status, "strategy attempt failed, moving on");
                    if let Some(origin) = first_empty {
                        return self.finish_empty(query, origin, attempts);
                    }
                }
            }
        }

        if let Some(origin) = first_empty {
            return self.finish_empty(query, origin, attempts);
        }

        warn!("{}", ScrapeError::StrategyExhausted(query.to_string()));
        ChainReport {
            query: query.to_string(),
            results: Vec::new(),
            resolution: Resolution::Exhausted,
            attempts,
        }
    }

    fn finish_empty(&self, query: &str, origin: StrategyKind, attempts: Vec<AttemptRecord>) -> ChainReport {
        ChainReport {
            query: query.to_string(),
            results: Vec::new(),
            resolution: Resolution::Empty(origin),
            attempts,
        }
    }

    /// Similar domains from the first strategy that finds any.
    pub async fn find_similar_domains(&self, domain: &str) -> Vec<String> {
        for strategy in self.order() {
            let domains = strategy.find_similar_domains(domain).await;
            if !domains.is_empty() {
                info!(domain, strategy = %strategy.kind(), found = domains.len(), "similar domains found");
                return domains;
            }
            debug!(domain, strategy = %strategy.kind(), "no similar domains");
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::testing::{MockBehavior, MockStrategy};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn chain(mocks: &[Arc<MockStrategy>]) -> StrategyChain {
        let strategies = mocks
            .iter()
            .map(|m| m.clone() as Arc<dyn Strategy>)
            .collect();
        StrategyChain::new(strategies, Arc::new(MemoryCache::new(Duration::from_secs(3600))))
            .with_query_delay((0, 0))
    }

    fn mocks(behaviors: Vec<MockBehavior>) -> Vec<Arc<MockStrategy>> {
        StrategyKind::PRIORITY
            .iter()
            .zip(behaviors)
            .map(|(kind, b)| Arc::new(MockStrategy::new(*kind).with_default(b)))
            .collect()
    }

    fn calls(mocks: &[Arc<MockStrategy>]) -> Vec<usize> {
        mocks.iter().map(|m| m.call_count()).collect()
    }

    #[tokio::test]
    async fn stops_at_first_strategy_with_results() {
        let m = mocks(vec![
            MockBehavior::Blocked,
            MockBehavior::Timeout,
            MockBehavior::links(&["https://rival.io/a"]),
            MockBehavior::links(&["https://never.io/"]),
            MockBehavior::links(&["https://never.io/"]),
        ]);
        let report = chain(&m).search_detailed("sites like a.com", 10).await;
        assert_eq!(report.resolution, Resolution::Success(StrategyKind::HeadlessBrowser));
        assert_eq!(report.results[0].origin, StrategyKind::HeadlessBrowser);
        assert_eq!(calls(&m), vec![1, 1, 1, 0, 0]);
        assert_eq!(report.attempts.len(), 3);
    }

    #[tokio::test]
    async fn second_identical_call_is_served_from_cache() {
        let m = mocks(vec![MockBehavior::links(&["https://rival.io/a", "https://rival.io/b"])]);
        let c = chain(&m);
        let first = c.search("a.com alternatives", 10).await;
        let second = c.search_detailed("a.com alternatives", 10).await;
        assert_eq!(first, second.results);
        assert_eq!(second.resolution, Resolution::Cached);
        assert_eq!(calls(&m), vec![1]);
    }

    #[tokio::test]
    async fn first_empty_grants_exactly_one_alternate() {
        let m = mocks(vec![
            MockBehavior::Empty,
            MockBehavior::Blocked,
            MockBehavior::links(&["https://never.io/"]),
        ]);
        let report = chain(&m).search_detailed("q", 10).await;
        assert!(report.results.is_empty());
        assert_eq!(report.resolution, Resolution::Empty(StrategyKind::CaptchaSolvingBrowser));
        assert_eq!(calls(&m), vec![1, 1, 0]);
    }

    #[tokio::test]
    async fn alternate_can_still_succeed_after_first_empty() {
        let m = mocks(vec![
            MockBehavior::Empty,
            MockBehavior::links(&["https://rival.io/a"]),
        ]);
        let report = chain(&m).search_detailed("q", 10).await;
        assert_eq!(report.resolution, Resolution::Success(StrategyKind::HybridSubprocess));
    }

    #[tokio::test]
    async fn later_empty_is_terminal() {
        let m = mocks(vec![
            MockBehavior::Blocked,
            MockBehavior::Empty,
            MockBehavior::links(&["https://never.io/"]),
        ]);
        let report = chain(&m).search_detailed("q", 10).await;
        assert_eq!(report.resolution, Resolution::Empty(StrategyKind::HybridSubprocess));
        assert_eq!(calls(&m), vec![1, 1, 0]);
    }

    #[tokio::test]
    async fn exhaustion_returns_nothing_and_caches_nothing() {
        let m = mocks(vec![
            MockBehavior::Blocked,
            MockBehavior::Fail("crash".into()),
            MockBehavior::Timeout,
        ]);
        let c = chain(&m);
        let report = c.search_detailed("q", 10).await;
        assert_eq!(report.resolution, Resolution::Exhausted);
        assert!(report.results.is_empty());
        c.search("q", 10).await;
        assert_eq!(calls(&m), vec![2, 2, 2]);
    }

    #[tokio::test]
    async fn saturated_strategy_is_tried_last() {
        let m = mocks(vec![
            MockBehavior::links(&["https://captcha.io/"]),
            MockBehavior::Blocked,
            MockBehavior::links(&["https://headless.io/"]),
        ]);
        m[0].set_saturated(true);
        let c = chain(&m);
        assert_eq!(
            c.order().iter().map(|s| s.kind()).collect::<Vec<_>>(),
            vec![
                StrategyKind::HybridSubprocess,
                StrategyKind::HeadlessBrowser,
                StrategyKind::CaptchaSolvingBrowser
            ]
        );
        let report = c.search_detailed("q", 10).await;
        assert_eq!(report.resolution, Resolution::Success(StrategyKind::HeadlessBrowser));
        assert_eq!(calls(&m), vec![0, 1, 1]);
    }

    #[tokio::test]
    async fn similar_domains_come_from_first_productive_strategy() {
        let a = Arc::new(MockStrategy::new(StrategyKind::HybridSubprocess));
        let b = Arc::new(MockStrategy::new(StrategyKind::DirectHttp).with_similar(&["rival.io"]));
        let c = chain(&[a.clone(), b.clone()]);
        assert_eq!(c.find_similar_domains("a.com").await, vec!["rival.io"]);
        assert_eq!((a.similar_calls(), b.similar_calls()), (1, 1));
    }
}
