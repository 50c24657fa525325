//! Test doubles for exercising the chain, discovery and extraction without
//! network access.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{Result, ScrapeError};
use crate::models::{SearchResult, StrategyKind};
use crate::strategies::Strategy;

/// What a [`MockStrategy`] does when asked for a query.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Results(Vec<SearchResult>),
    Empty,
    Blocked,
    Timeout,
    Fail(String),
}

impl MockBehavior {
    /// Results for `links`, ranked in order.
    pub fn links(links: &[&str]) -> Self {
        MockBehavior::Results(
            links
                .iter()
                .enumerate()
                .map(|(i, link)| result(i as u32 + 1, link, &format!("Result about {}", link)))
                .collect(),
        )
    }
}

pub fn result(position: u32, link: &str, title: &str) -> SearchResult {
    SearchResult {
        position,
        title: title.to_string(),
        link: link.to_string(),
        snippet: String::new(),
        origin: StrategyKind::DirectHttp,
    }
}

/// A strategy that replays scripted behaviours and records every call.
pub struct MockStrategy {
    kind: StrategyKind,
    default: Mutex<MockBehavior>,
    rules: Mutex<Vec<(String, MockBehavior)>>,
    similar: Mutex<Vec<String>>,
    saturated: AtomicBool,
    queries: Mutex<Vec<String>>,
    similar_calls: Mutex<Vec<String>>,
}

impl MockStrategy {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            default: Mutex::new(MockBehavior::Empty),
            rules: Mutex::new(Vec::new()),
            similar: Mutex::new(Vec::new()),
            saturated: AtomicBool::new(false),
            queries: Mutex::new(Vec::new()),
            similar_calls: Mutex::new(Vec::new()),
        }
    }

    /// Behaviour for queries no rule matches.
    pub fn with_default(self, behavior: MockBehavior) -> Self {
        *self.default.lock() = behavior;
        self
    }

    /// Behaviour for queries containing `needle`; earlier rules win.
    pub fn on_query(self, needle: &str, behavior: MockBehavior) -> Self {
        self.rules.lock().push((needle.to_string(), behavior));
        self
    }

    pub fn with_similar(self, domains: &[&str]) -> Self {
        *self.similar.lock() = domains.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn set_saturated(&self, saturated: bool) {
        self.saturated.store(saturated, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    pub fn similar_calls(&self) -> usize {
        self.similar_calls.lock().len()
    }

    fn behavior_for(&self, query: &str) -> MockBehavior {
        self.rules
            .lock()
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, b)| b.clone())
            .unwrap_or_else(|| self.default.lock().clone())
    }
}

#[async_trait]
impl Strategy for MockStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn is_saturated(&self) -> bool {
        self.saturated.load(Ordering::SeqCst)
    }

    async fn attempt(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.queries.lock().push(query.to_string());
        match self.behavior_for(query) {
            MockBehavior::Results(results) => Ok(results
                .into_iter()
                .take(limit)
                .map(|mut r| {
                    r.origin = self.kind;
                    r
                })
                .collect()),
            MockBehavior::Empty => Ok(Vec::new()),
            MockBehavior::Blocked => Err(ScrapeError::Blocked("scripted challenge".to_string())),
            MockBehavior::Timeout => Err(ScrapeError::Timeout(Duration::from_secs(20))),
            MockBehavior::Fail(reason) => Err(ScrapeError::Browser(reason)),
        }
    }

    async fn find_similar_domains(&self, domain: &str) -> Vec<String> {
        self.similar_calls.lock().push(domain.to_string());
        self.similar.lock().clone()
    }
}
