use std::sync::Arc;
use tracing::{info, warn};

use crate::backoff::Backoff;
use crate::cache::{MemoryCache, RedisCache, ResultCache};
use crate::config::EngineConfig;
use crate::content::ContentExtractor;
use crate::discovery::CompetitorDiscovery;
use crate::error::Result;
use crate::models::{ContentItem, StrategyKind};
use crate::orchestrator::{ChainReport, StrategyChain};
use crate::proxy::ProxyPool;
use crate::strategies::{
    BrowserPool, CaptchaBrowserStrategy, DirectHttpStrategy, HeadlessBrowserStrategy,
    HybridSubprocessStrategy, SearchApiStrategy, Strategy,
};

/// Entry points consumed by the route layer.
pub struct Engine {
    chain: Arc<StrategyChain>,
    proxies: Arc<ProxyPool>,
    discovery: CompetitorDiscovery,
    content: ContentExtractor,
}

impl Engine {
    /// Wires the full strategy chain from configuration. The external search
    /// API joins the chain only when a key is present; Redis is used for the
    /// result cache when reachable, otherwise results are cached in memory.
    pub async fn from_config(config: &EngineConfig) -> Result<Self> {
        let proxies = Arc::new(ProxyPool::from_config(&config.proxy)?);
        proxies.refresh().await;

        let cache: Arc<dyn ResultCache> = match &config.cache.redis_url {
            Some(url) => match RedisCache::connect(url, config.cache.ttl).await {
                Ok(redis) => Arc::new(redis),
                Err(e) => {
                    warn!(error = %e, "⚠️ redis unavailable, caching results in memory");
                    Arc::new(MemoryCache::new(config.cache.ttl))
                }
            },
            None => Arc::new(MemoryCache::new(config.cache.ttl)),
        };

        let browsers = Arc::new(BrowserPool::new(config.browser.clone()));
        let backoff = |kind: StrategyKind| {
            Backoff::for_tier(kind.cost_tier()).scaled(config.chain.backoff_scale)
        };

        let mut strategies: Vec<Arc<dyn Strategy>> = vec![
            Arc::new(CaptchaBrowserStrategy::new(
                browsers.clone(),
                proxies.clone(),
                &config.captcha,
            )),
            Arc::new(HybridSubprocessStrategy::new(
                config.hybrid.clone(),
                proxies.clone(),
            )),
            Arc::new(HeadlessBrowserStrategy::new(
                browsers,
                proxies.clone(),
                backoff(StrategyKind::HeadlessBrowser),
            )),
            Arc::new(DirectHttpStrategy::new(
                proxies.clone(),
                backoff(StrategyKind::DirectHttp),
            )),
        ];
        let search_api = SearchApiStrategy::new(config.search_api.clone())?;
        if search_api.is_configured() {
            strategies.push(Arc::new(search_api));
        } else {
            info!("search api key not set, chain ends at direct http");
        }

        Ok(Self::from_parts(strategies, cache, proxies, config))
    }

    /// Builds an engine over an explicit, already ordered strategy list.
    pub fn from_parts(
        strategies: Vec<Arc<dyn Strategy>>,
        cache: Arc<dyn ResultCache>,
        proxies: Arc<ProxyPool>,
        config: &EngineConfig,
    ) -> Self {
        let chain = Arc::new(
            StrategyChain::new(strategies, cache).with_query_delay(config.chain.query_delay_ms),
        );
        info!(order = ?chain.kinds(), "🚀 strategy chain ready");
        Self {
            discovery: CompetitorDiscovery::new(chain.clone(), config.discovery.query_limit),
            content: ContentExtractor::new(chain.clone(), config.content.clone()),
            chain,
            proxies,
        }
    }

    pub fn proxies(&self) -> &Arc<ProxyPool> {
        &self.proxies
    }

    pub fn strategy_order(&self) -> Vec<StrategyKind> {
        self.chain.kinds()
    }

    pub async fn discover_competitors(&self, seed_domain: &str, keywords: &[String], limit: usize) -> Vec<String> {
        self.discovery.discover(seed_domain, keywords, limit).await
    }

    pub async fn extract_competitor_content(
        &self,
        seed_domain: &str,
        competitors: &[String],
        keywords: &[String],
    ) -> Vec<ContentItem> {
        self.content.extract(seed_domain, competitors, keywords).await
    }

    /// One chained search with its per-strategy attempt log.
    pub async fn search(&self, query: &str, limit: usize) -> ChainReport {
        self.chain.search_detailed(query, limit).await
    }
}
