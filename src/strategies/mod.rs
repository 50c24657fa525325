//! Retrieval backends behind one capability contract.
//!
//! Every backend implements [`Strategy::attempt`]; the chain interprets the
//! outcome (non-empty = success, empty = clean empty page, `Err(Blocked)` =
//! challenge, any other `Err` = failure). `search` and `find_similar_domains`
//! are the caller-facing forms and never fail: errors collapse to empty lists.

mod browser_pool;
mod captcha;
mod direct_http;
mod headless;
mod hybrid;
mod search_api;
pub mod serp;

pub use browser_pool::BrowserPool;
pub use captcha::CaptchaBrowserStrategy;
pub use direct_http::DirectHttpStrategy;
pub use headless::HeadlessBrowserStrategy;
pub use hybrid::HybridSubprocessStrategy;
pub use search_api::SearchApiStrategy;

use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::error::{Result, ScrapeError};
use crate::models::{SearchResult, StrategyKind};
use crate::proxy::{Proxy, ProxyPool};
use crate::urls::competitor_host;
use serp::PageOutcome;

/// Results pages are requested 10 at a time.
pub const PAGE_SIZE: usize = 10;

pub(crate) const SIMILAR_DOMAIN_CAP: usize = 15;

#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// One retrieval attempt for `query`, returning at most `limit` results.
    async fn attempt(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>>;

    /// True when the strategy would rather not be used right now
    /// (e.g. its rolling request window is full).
    fn is_saturated(&self) -> bool {
        false
    }

    async fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        match self.attempt(query, limit).await {
            Ok(results) => results,
            Err(e) => {
                debug!(strategy = %self.kind(), error = %e, "search attempt failed");
                Vec::new()
            }
        }
    }

    /// Domains similar to `domain`, found through this strategy's own search.
    async fn find_similar_domains(&self, domain: &str) -> Vec<String> {
        let queries = [
            format!("competitors of {}", domain),
            format!("sites like {}", domain),
        ];
        let mut domains = Vec::new();
        let mut seen = HashSet::new();
        for query in queries {
            if domains.len() >= SIMILAR_DOMAIN_CAP {
                break;
            }
            for result in self.search(&query, 30).await {
                if let Some(host) = competitor_host(&result.link, domain) {
                    if seen.insert(host.clone()) {
                        domains.push(host);
                    }
                }
            }
        }
        domains.truncate(SIMILAR_DOMAIN_CAP);
        domains
    }
}

/// Number of result pages needed for `limit`, at most `max_pages`.
pub(crate) fn pages_for(limit: usize, max_pages: usize) -> usize {
    limit.div_ceil(PAGE_SIZE).clamp(1, max_pages.max(1))
}

/// Reports how a whole attempt went for the proxy it used, if any.
pub(crate) fn settle_proxy<T>(pool: &ProxyPool, proxy: Option<&Proxy>, outcome: &Result<T>) {
    if let Some(proxy) = proxy {
        let healthy = match outcome {
            Ok(_) => true,
            Err(e) => !e.charges_proxy(),
        };
        pool.release(proxy, healthy);
    }
}

/// Accumulates pages of one query, deduplicating links.
pub(crate) struct Collector {
    kind: StrategyKind,
    limit: usize,
    results: Vec<SearchResult>,
    seen: HashSet<String>,
}

impl Collector {
    pub(crate) fn new(kind: StrategyKind, limit: usize) -> Self {
        Self {
            kind,
            limit,
            results: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.results.len() >= self.limit
    }

    /// Takes one page outcome; `Ok(true)` means fetching the next page is worthwhile.
    ///
    /// A block or failure on the first page fails the whole attempt; on later
    /// pages it just ends pagination with what was collected.
    pub(crate) fn absorb(&mut self, page: Result<PageOutcome>) -> Result<bool> {
        match page {
            Ok(PageOutcome::Page { results, has_next }) => {
                let fresh = results.len();
                for result in results {
                    if self.seen.insert(result.link.clone()) {
                        self.results.push(result);
                    }
                }
                Ok(fresh > 0 && has_next && !self.is_full())
            }
            Ok(PageOutcome::Blocked(signal)) => {
                if self.results.is_empty() {
                    Err(ScrapeError::Blocked(signal.to_string()))
                } else {
                    warn!(strategy = %self.kind, %signal, "blocked mid-pagination, keeping earlier pages");
                    Ok(false)
                }
            }
            Err(e) => {
                if self.results.is_empty() {
                    Err(e)
                } else {
                    warn!(strategy = %self.kind, error = %e, "page failed mid-pagination, keeping earlier pages");
                    Ok(false)
                }
            }
        }
    }

    pub(crate) fn finish(mut self) -> Vec<SearchResult> {
        self.results.truncate(self.limit);
        self.results
    }
}

/// Fetches pages `0..pages_for(limit)` sequentially. Page `n` waits out backoff
/// attempt `n - 1`, so delays grow and the retry budget caps the page count.
pub(crate) async fn paginate<F, Fut>(
    kind: StrategyKind,
    limit: usize,
    max_pages: usize,
    backoff: &Backoff,
    mut fetch: F,
) -> Result<Vec<SearchResult>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<PageOutcome>>,
{
    let mut collector = Collector::new(kind, limit);
    for page in 0..pages_for(limit, max_pages) {
        if page > 0 && !backoff.wait((page - 1) as u32).await {
            debug!(strategy = %kind, pages = page, "retry budget spent, stopping pagination");
            break;
        }
        if !collector.absorb(fetch(page).await)? {
            break;
        }
    }
    Ok(collector.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BlockSignal;
    use crate::models::CostTier;

    fn page(links: &[&str], has_next: bool) -> Result<PageOutcome> {
        Ok(PageOutcome::Page {
            results: links
                .iter()
                .enumerate()
                .map(|(i, l)| SearchResult {
                    position: i as u32 + 1,
                    title: l.to_string(),
                    link: l.to_string(),
                    snippet: String::new(),
                    origin: StrategyKind::DirectHttp,
                })
                .collect(),
            has_next,
        })
    }

    #[test]
    fn page_count_is_bounded() {
        assert_eq!(pages_for(0, 20), 1);
        assert_eq!(pages_for(10, 20), 1);
        assert_eq!(pages_for(11, 20), 2);
        assert_eq!(pages_for(500, 20), 20);
    }

    #[test]
    fn collector_dedups_and_stops_on_last_page() {
        let mut c = Collector::new(StrategyKind::DirectHttp, 10);
        assert!(c.absorb(page(&["a", "b"], true)).unwrap());
        assert!(!c.absorb(page(&["b", "c"], false)).unwrap());
        let links: Vec<_> = c.finish().into_iter().map(|r| r.link).collect();
        assert_eq!(links, vec!["a", "b", "c"]);
    }

    #[test]
    fn block_on_first_page_fails_attempt() {
        let mut c = Collector::new(StrategyKind::DirectHttp, 10);
        let err = c
            .absorb(Ok(PageOutcome::Blocked(BlockSignal::Status(429))))
            .unwrap_err();
        assert!(err.is_blocked());
    }

    #[test]
    fn block_after_results_keeps_them() {
        let mut c = Collector::new(StrategyKind::DirectHttp, 10);
        c.absorb(page(&["a"], true)).unwrap();
        assert!(!c
            .absorb(Ok(PageOutcome::Blocked(BlockSignal::Status(429))))
            .unwrap());
        assert_eq!(c.finish().len(), 1);
    }

    #[tokio::test]
    async fn paginate_truncates_to_limit() {
        let backoff = Backoff::for_tier(CostTier::Cheap).scaled(0.0);
        let mut calls = 0;
        let results = paginate(StrategyKind::DirectHttp, 15, 20, &backoff, |n| {
            calls += 1;
            let links: Vec<String> = (0..10).map(|i| format!("https://r.io/{}/{}", n, i)).collect();
            async move {
                let refs: Vec<&str> = links.iter().map(String::as_str).collect();
                page(&refs, true)
            }
        })
        .await
        .unwrap();
        assert_eq!(results.len(), 15);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn paginate_stops_without_next_page() {
        let backoff = Backoff::for_tier(CostTier::Cheap).scaled(0.0);
        let mut calls = 0;
        let results = paginate(StrategyKind::DirectHttp, 30, 20, &backoff, |_| {
            calls += 1;
            async { page(&["https://r.io/only"], false) }
        })
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn later_pages_wait_longer() {
        let backoff = Backoff::for_tier(CostTier::Cheap);
        let ceilings: Vec<_> = (0..4).map(|n| backoff.ceiling(n)).collect();
        assert!(ceilings.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn paginate_stops_when_retries_run_out() {
        let backoff = Backoff::for_tier(CostTier::Cheap).scaled(0.0);
        let mut calls = 0;
        let results = paginate(StrategyKind::DirectHttp, 200, 20, &backoff, |n| {
            calls += 1;
            let links: Vec<String> = (0..10).map(|i| format!("https://r.io/{}/{}", n, i)).collect();
            async move {
                let refs: Vec<&str> = links.iter().map(String::as_str).collect();
                page(&refs, true)
            }
        })
        .await
        .unwrap();
        assert_eq!(calls, 6);
        assert_eq!(results.len(), 60);
    }
}
