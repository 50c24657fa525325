//! Egress proxy pool with health tracking.
//!
//! Proxies are selected lowest `fail_count` first, then least recently used,
//! which gives round-robin rotation among healthy entries. A proxy that reaches
//! the failure threshold is evicted for good: its `(host, port)` identity is
//! remembered and later refreshes will not bring it back.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::config::{parse_proxy_list, ProxyConfig};
use crate::error::{Result, ScrapeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks5" | "socks5h" | "socks" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    pub protocols: Vec<ProxyProtocol>,
    pub last_used_at: Option<Instant>,
    pub fail_count: u32,
    pub country: Option<String>,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16, protocols: Vec<ProxyProtocol>) -> Self {
        Self {
            host: host.into(),
            port,
            protocols,
            last_used_at: None,
            fail_count: 0,
            country: None,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn identity(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    /// Preferred protocol: socks5 when offered, otherwise the first listed.
    pub fn protocol(&self) -> ProxyProtocol {
        if self.protocols.contains(&ProxyProtocol::Socks5) {
            ProxyProtocol::Socks5
        } else {
            self.protocols.first().copied().unwrap_or(ProxyProtocol::Http)
        }
    }

    /// `scheme://host:port`, usable for reqwest and as an env `HTTPS_PROXY`.
    pub fn to_url(&self) -> String {
        format!("{}://{}:{}", self.protocol().scheme(), self.host, self.port)
    }

    /// Value for Chrome's `--proxy-server=` flag.
    pub fn to_chrome_arg(&self) -> String {
        self.to_url()
    }
}

/// Operator view of one pooled proxy.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProxyInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub protocols: Vec<ProxyProtocol>,
    pub fail_count: u32,
    pub country: Option<String>,
    pub idle_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProxyStats {
    pub size: usize,
    pub evicted: usize,
    pub successes: u64,
    pub failures: u64,
    pub refreshing: bool,
    pub last_refresh_secs_ago: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Recorded,
    Evicted,
    /// The proxy was no longer pooled (already evicted).
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { added: usize, size: usize },
    InFlight,
    Throttled,
}

/// Where fresh proxy candidates come from.
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Proxy>>;
}

/// A plain-text list served over HTTP, one `host:port` per line.
pub struct HttpProxyList {
    client: reqwest::Client,
    url: String,
}

impl HttpProxyList {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ProxySource for HttpProxyList {
    async fn fetch(&self) -> Result<Vec<Proxy>> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_proxy_list(&body, '\n'))
    }
}

#[derive(Default)]
struct PoolState {
    proxies: Vec<Proxy>,
    evicted: HashSet<(String, u16)>,
    successes: u64,
    failures: u64,
}

pub struct ProxyPool {
    state: Mutex<PoolState>,
    sources: Vec<Arc<dyn ProxySource>>,
    fallback: Vec<Proxy>,
    max_failures: u32,
    refresh_interval: Duration,
    refreshing: AtomicBool,
    last_refresh: Mutex<Option<Instant>>,
}

impl ProxyPool {
    pub fn new(max_failures: u32, refresh_interval: Duration) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            sources: Vec::new(),
            fallback: Vec::new(),
            max_failures: max_failures.max(1),
            refresh_interval,
            refreshing: AtomicBool::new(false),
            last_refresh: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let mut pool = Self::new(config.max_failures, config.refresh_interval)
            .with_fallback(config.fallback.clone());
        if let Some(url) = &config.list_url {
            pool = pool.with_source(Arc::new(HttpProxyList::new(url.clone())?));
        }
        Ok(pool)
    }

    pub fn with_source(mut self, source: Arc<dyn ProxySource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_fallback(mut self, fallback: Vec<Proxy>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Picks the healthiest, least recently used proxy. Never waits; `None`
    /// means the caller proceeds without a proxy.
    pub fn acquire(&self) -> Option<Proxy> {
        let mut state = self.state.lock();
        let chosen = state
            .proxies
            .iter_mut()
            .min_by_key(|p| (p.fail_count, p.last_used_at))?;
        chosen.last_used_at = Some(Instant::now());
        Some(chosen.clone())
    }

    /// Like `acquire`, logging the proxy-less fallback.
    pub fn acquire_or_direct(&self, purpose: &str) -> Option<Proxy> {
        let proxy = self.acquire();
        match &proxy {
            Some(p) => debug!(proxy = %p.id(), purpose, "🔄 using proxy"),
            None => debug!(purpose, "{}", ScrapeError::ProxyExhausted),
        }
        proxy
    }

    /// Reports the outcome of a request made through `proxy`.
    pub fn release(&self, proxy: &Proxy, success: bool) -> ReleaseOutcome {
        let mut state = self.state.lock();
        let Some(idx) = state
            .proxies
            .iter()
            .position(|p| p.host == proxy.host && p.port == proxy.port)
        else {
            return ReleaseOutcome::Unknown;
        };

        if success {
            state.successes += 1;
            return ReleaseOutcome::Recorded;
        }

        state.failures += 1;
        state.proxies[idx].fail_count += 1;
        if state.proxies[idx].fail_count >= self.max_failures {
            let evicted = state.proxies.remove(idx);
            state.evicted.insert(evicted.identity());
            warn!(proxy = %evicted.id(), failures = evicted.fail_count, "🚫 proxy evicted");
            ReleaseOutcome::Evicted
        } else {
            ReleaseOutcome::Recorded
        }
    }

    pub fn size(&self) -> usize {
        self.state.lock().proxies.len()
    }

    /// Adds candidates that are neither pooled nor previously evicted.
    pub fn add_proxies(&self, candidates: impl IntoIterator<Item = Proxy>) -> usize {
        let mut state = self.state.lock();
        let mut added = 0;
        for candidate in candidates {
            let identity = candidate.identity();
            if state.evicted.contains(&identity) {
                continue;
            }
            let present = state
                .proxies
                .iter()
                .any(|p| p.host == candidate.host && p.port == candidate.port);
            if present {
                continue;
            }
            state.proxies.push(Proxy {
                last_used_at: None,
                fail_count: 0,
                ..candidate
            });
            added += 1;
        }
        added
    }

    /// Pulls fresh candidates from every source plus the static fallback set.
    ///
    /// Single-flight: a call made while another refresh runs returns
    /// `InFlight`; a call within the minimum interval of the last completed
    /// refresh returns `Throttled`.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("proxy refresh already in flight");
            return RefreshOutcome::InFlight;
        }
        let _flight = FlightGuard(&self.refreshing);

        if let Some(last) = *self.last_refresh.lock() {
            if last.elapsed() < self.refresh_interval {
                return RefreshOutcome::Throttled;
            }
        }

        let mut candidates = self.fallback.clone();
        for source in &self.sources {
            match source.fetch().await {
                Ok(list) => candidates.extend(list),
                Err(e) => warn!(error = %e, "proxy source failed"),
            }
        }

        let added = self.add_proxies(candidates);
        *self.last_refresh.lock() = Some(Instant::now());
        let size = self.size();
        info!(added, size, "✅ proxy pool refreshed");
        RefreshOutcome::Refreshed { added, size }
    }

    pub fn snapshot(&self) -> Vec<ProxyInfo> {
        let state = self.state.lock();
        state
            .proxies
            .iter()
            .map(|p| ProxyInfo {
                id: p.id(),
                host: p.host.clone(),
                port: p.port,
                protocols: p.protocols.clone(),
                fail_count: p.fail_count,
                country: p.country.clone(),
                idle_secs: p.last_used_at.map(|t| t.elapsed().as_secs()),
            })
            .collect()
    }

    pub fn stats(&self) -> ProxyStats {
        let state = self.state.lock();
        ProxyStats {
            size: state.proxies.len(),
            evicted: state.evicted.len(),
            successes: state.successes,
            failures: state.failures,
            refreshing: self.refreshing.load(Ordering::Acquire),
            last_refresh_secs_ago: self.last_refresh.lock().map(|t| t.elapsed().as_secs()),
        }
    }
}

struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn pool_of(hosts: &[&str]) -> ProxyPool {
        let pool = ProxyPool::new(3, Duration::from_secs(1800));
        pool.add_proxies(
            hosts
                .iter()
                .map(|h| Proxy::new(*h, 8080, vec![ProxyProtocol::Http])),
        );
        pool
    }

    struct CountingSource {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        proxies: Vec<Proxy>,
    }

    #[async_trait]
    impl ProxySource for CountingSource {
        async fn fetch(&self) -> Result<Vec<Proxy>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(self.proxies.clone())
        }
    }

    #[test]
    fn fourth_acquire_after_three_failures_returns_none() {
        let pool = pool_of(&["10.0.0.1"]);
        for _ in 0..3 {
            let proxy = pool.acquire().expect("proxy available");
            pool.release(&proxy, false);
        }
        assert!(pool.acquire().is_none());
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn eviction_shrinks_pool_by_exactly_one() {
        let pool = pool_of(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        let victim = Proxy::new("10.0.0.2", 8080, vec![ProxyProtocol::Http]);
        assert_eq!(pool.release(&victim, false), ReleaseOutcome::Recorded);
        assert_eq!(pool.release(&victim, false), ReleaseOutcome::Recorded);
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.release(&victim, false), ReleaseOutcome::Evicted);
        assert_eq!(pool.size(), 2);
        // A late report for the evicted proxy is ignored.
        assert_eq!(pool.release(&victim, false), ReleaseOutcome::Unknown);
        assert_eq!(pool.size(), 2);

        for _ in 0..10 {
            let p = pool.acquire().expect("healthy proxies remain");
            assert_ne!(p.host, "10.0.0.2");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn prefers_fewest_failures_then_least_recent() {
        let pool = pool_of(&["a", "b"]);
        let a = Proxy::new("a", 8080, vec![ProxyProtocol::Http]);
        pool.release(&a, false);

        // b has no failures, so it wins until it fails as often as a.
        assert_eq!(pool.acquire().map(|p| p.host).as_deref(), Some("b"));
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(pool.acquire().map(|p| p.host).as_deref(), Some("b"));

        let b = Proxy::new("b", 8080, vec![ProxyProtocol::Http]);
        pool.release(&b, false);
        tokio::time::advance(Duration::from_millis(10)).await;
        // Tie on failures: a was used longest ago (never).
        assert_eq!(pool.acquire().map(|p| p.host).as_deref(), Some("a"));
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(pool.acquire().map(|p| p.host).as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_is_rate_limited_and_merges_by_identity() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            gate: None,
            proxies: vec![
                Proxy::new("1.1.1.1", 80, vec![ProxyProtocol::Http]),
                Proxy::new("1.1.1.1", 80, vec![ProxyProtocol::Https]),
                Proxy::new("2.2.2.2", 1080, vec![ProxyProtocol::Socks5]),
            ],
        });
        let pool = ProxyPool::new(3, Duration::from_secs(1800))
            .with_source(source.clone())
            .with_fallback(vec![Proxy::new("2.2.2.2", 1080, vec![ProxyProtocol::Socks5])]);

        assert_eq!(
            pool.refresh().await,
            RefreshOutcome::Refreshed { added: 2, size: 2 }
        );
        assert_eq!(pool.refresh().await, RefreshOutcome::Throttled);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1801)).await;
        assert_eq!(
            pool.refresh().await,
            RefreshOutcome::Refreshed { added: 0, size: 2 }
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_is_single_flight() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            gate: Some(gate.clone()),
            proxies: vec![Proxy::new("3.3.3.3", 3128, vec![ProxyProtocol::Http])],
        });
        let pool = Arc::new(ProxyPool::new(3, Duration::from_secs(1800)).with_source(source.clone()));

        let first = tokio::spawn({
            let pool = pool.clone();
            async move { pool.refresh().await }
        });
        while source.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(pool.refresh().await, RefreshOutcome::InFlight);
        gate.notify_one();
        assert_eq!(
            first.await.unwrap(),
            RefreshOutcome::Refreshed { added: 1, size: 1 }
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn evicted_proxies_are_not_resurrected() {
        let pool = pool_of(&["9.9.9.9"]);
        let p = Proxy::new("9.9.9.9", 8080, vec![ProxyProtocol::Http]);
        for _ in 0..3 {
            pool.release(&p, false);
        }
        assert_eq!(pool.add_proxies(vec![p]), 0);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.stats().evicted, 1);
    }

    #[test]
    fn concurrent_failures_evict_once() {
        let pool = Arc::new(pool_of(&["7.7.7.7"]));
        let p = Proxy::new("7.7.7.7", 8080, vec![ProxyProtocol::Http]);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let p = p.clone();
                std::thread::spawn(move || pool.release(&p, false))
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let evictions = outcomes
            .iter()
            .filter(|o| **o == ReleaseOutcome::Evicted)
            .count();
        assert_eq!(evictions, 1);
        assert_eq!(pool.stats().failures, 3);
    }

    #[test]
    fn socks_is_preferred_for_urls() {
        let p = Proxy::new("h", 1, vec![ProxyProtocol::Http, ProxyProtocol::Socks5]);
        assert_eq!(p.to_url(), "socks5://h:1");
        assert_eq!(p.to_chrome_arg(), "socks5://h:1");
    }
}
