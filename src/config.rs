use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::proxy::{Proxy, ProxyProtocol};

/// Engine-wide settings. Every field has a default; `from_env` overrides them
/// from the process environment (after `dotenv` has loaded `.env`).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub proxy: ProxyConfig,
    pub cache: CacheConfig,
    pub chain: ChainConfig,
    pub browser: BrowserConfig,
    pub hybrid: HybridConfig,
    pub search_api: SearchApiConfig,
    pub captcha: CaptchaConfig,
    pub discovery: DiscoveryConfig,
    pub content: ContentConfig,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub list_url: Option<String>,
    pub fallback: Vec<Proxy>,
    pub max_failures: u32,
    pub refresh_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Randomised pause between two queries of one caller, in milliseconds.
    pub query_delay_ms: (u64, u64),
    /// Multiplier applied to every in-strategy backoff delay. Zero disables sleeping.
    pub backoff_scale: f64,
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub pool_size: usize,
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
}

#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SearchApiConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub hourly_cap: usize,
    pub solve_rounds: u32,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub query_limit: usize,
}

#[derive(Debug, Clone)]
pub struct ContentConfig {
    pub per_domain_budget: usize,
    pub concurrency: usize,
    pub query_limit: usize,
    pub keywords_per_item: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig {
                list_url: None,
                fallback: Vec::new(),
                max_failures: 3,
                refresh_interval: Duration::from_secs(30 * 60),
            },
            cache: CacheConfig {
                ttl: Duration::from_secs(3600),
                redis_url: None,
            },
            chain: ChainConfig {
                query_delay_ms: (500, 5000),
                backoff_scale: 1.0,
            },
            browser: BrowserConfig {
                pool_size: 2,
                chrome_path: None,
                headless: true,
            },
            hybrid: HybridConfig {
                program: "python3".to_string(),
                args: vec!["scraper/serp_scraper.py".to_string()],
                timeout: Duration::from_secs(150),
            },
            search_api: SearchApiConfig {
                endpoint: "https://serpapi.com/search.json".to_string(),
                api_key: None,
            },
            captcha: CaptchaConfig {
                hourly_cap: 10,
                solve_rounds: 2,
            },
            discovery: DiscoveryConfig { query_limit: 30 },
            content: ContentConfig {
                per_domain_budget: 5,
                concurrency: 10,
                query_limit: 10,
                keywords_per_item: 5,
            },
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.proxy.list_url = env::var("PROXY_LIST_URL").ok().filter(|s| !s.is_empty());
        config.proxy.fallback = env::var("PROXY_FALLBACK")
            .map(|raw| parse_proxy_list(&raw, ','))
            .unwrap_or_default();
        config.proxy.max_failures = env_or("PROXY_MAX_FAILURES", config.proxy.max_failures);
        config.proxy.refresh_interval =
            Duration::from_secs(60 * env_or("PROXY_REFRESH_MINUTES", 30u64));

        config.cache.ttl = Duration::from_secs(env_or("CACHE_TTL_SECS", 3600u64));
        config.cache.redis_url = env::var("REDIS_URL").ok().filter(|s| !s.is_empty());

        let min_delay = env_or("QUERY_DELAY_MIN_MS", config.chain.query_delay_ms.0);
        let max_delay = env_or("QUERY_DELAY_MAX_MS", config.chain.query_delay_ms.1);
        config.chain.query_delay_ms = (min_delay.min(max_delay), max_delay.max(min_delay));

        config.browser.pool_size = env_or("BROWSER_POOL_SIZE", config.browser.pool_size).max(1);
        config.browser.chrome_path = env::var("CHROME_PATH").ok().map(PathBuf::from);
        config.browser.headless = env_or("BROWSER_HEADLESS", true);

        if let Ok(cmd) = env::var("HYBRID_SCRAPER_CMD") {
            let mut parts = cmd.split_whitespace().map(str::to_string);
            if let Some(program) = parts.next() {
                config.hybrid.program = program;
                config.hybrid.args = parts.collect();
            }
        }
        // Hard wall-clock budget for the subprocess, kept within 120-150s.
        let hybrid_secs = env_or("HYBRID_TIMEOUT_SECS", 150u64).clamp(120, 150);
        config.hybrid.timeout = Duration::from_secs(hybrid_secs);

        if let Ok(endpoint) = env::var("SEARCH_API_URL") {
            config.search_api.endpoint = endpoint;
        }
        config.search_api.api_key = env::var("SEARCH_API_KEY").ok().filter(|s| !s.is_empty());

        config.captcha.hourly_cap = env_or("CAPTCHA_HOURLY_CAP", config.captcha.hourly_cap);

        config.discovery.query_limit = env_or("DISCOVERY_QUERY_LIMIT", config.discovery.query_limit);

        config.content.per_domain_budget =
            env_or("CONTENT_PER_DOMAIN", config.content.per_domain_budget).max(1);
        config.content.concurrency = env_or("CONTENT_CONCURRENCY", config.content.concurrency).max(1);

        config
    }

    /// Settings for tests and dry runs: no pauses between queries or retries.
    pub fn without_delays(mut self) -> Self {
        self.chain.query_delay_ms = (0, 0);
        self.chain.backoff_scale = 0.0;
        self
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses `host:port` (optionally `scheme://host:port`) entries separated by `sep`.
pub fn parse_proxy_list(raw: &str, sep: char) -> Vec<Proxy> {
    raw.split(sep)
        .filter_map(|entry| parse_proxy(entry.trim()))
        .collect()
}

fn parse_proxy(entry: &str) -> Option<Proxy> {
    if entry.is_empty() || entry.starts_with('#') {
        return None;
    }
    let (protocol, rest) = match entry.split_once("://") {
        Some((scheme, rest)) => (ProxyProtocol::from_scheme(scheme)?, rest),
        None => (ProxyProtocol::Http, entry),
    };
    let (host, port) = rest.trim_end_matches('/').rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    Some(Proxy::new(host, port, vec![protocol]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_engine_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.proxy.max_failures, 3);
        assert_eq!(config.proxy.refresh_interval, Duration::from_secs(1800));
        assert_eq!(config.cache.ttl, Duration::from_secs(3600));
        assert_eq!(config.browser.pool_size, 2);
        assert_eq!(config.captcha.hourly_cap, 10);
        assert_eq!(config.chain.query_delay_ms, (500, 5000));
    }

    #[test]
    fn parses_proxy_entries() {
        let proxies = parse_proxy_list("1.2.3.4:8080, socks5://5.6.7.8:1080,bogus,#comment", ',');
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[0].host, "1.2.3.4");
        assert_eq!(proxies[0].port, 8080);
        assert_eq!(proxies[1].protocols, vec![ProxyProtocol::Socks5]);
    }

    #[test]
    fn without_delays_zeroes_pacing() {
        let config = EngineConfig::default().without_delays();
        assert_eq!(config.chain.query_delay_ms, (0, 0));
        assert_eq!(config.chain.backoff_scale, 0.0);
    }
}
