use competitor_crawler::cache::MemoryCache;
use competitor_crawler::proxy::ProxyProtocol;
use competitor_crawler::testing::{MockBehavior, MockStrategy};
use competitor_crawler::{Engine, EngineConfig, Proxy, ProxyPool, Resolution, Strategy, StrategyKind};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn engine(mocks: &[Arc<MockStrategy>]) -> Engine {
    let config = EngineConfig::default().without_delays();
    let strategies = mocks.iter().map(|m| m.clone() as Arc<dyn Strategy>).collect();
    Engine::from_parts(
        strategies,
        Arc::new(MemoryCache::new(config.cache.ttl)),
        Arc::new(ProxyPool::new(3, Duration::from_secs(1800))),
        &config,
    )
}

fn chain_of(behaviors: Vec<MockBehavior>) -> Vec<Arc<MockStrategy>> {
    StrategyKind::PRIORITY
        .iter()
        .zip(behaviors)
        .map(|(kind, behavior)| Arc::new(MockStrategy::new(*kind).with_default(behavior)))
        .collect()
}

#[tokio::test]
async fn discovery_with_every_strategy_empty_returns_nothing() {
    let mocks: Vec<_> = StrategyKind::PRIORITY
        .iter()
        .map(|kind| Arc::new(MockStrategy::new(*kind)))
        .collect();
    let domains = engine(&mocks).discover_competitors("example.com", &[], 5).await;
    assert!(domains.is_empty());
}

#[tokio::test]
async fn discovery_never_returns_the_seed_or_its_relatives() {
    let mocks = chain_of(vec![MockBehavior::links(&[
        "https://example.com/pricing",
        "https://app.example.com/",
        "https://example.co/",
        "https://rival.io/",
        "https://www.bing.com/ck/a?x",
        "https://another.net/blog",
    ])]);
    let domains = engine(&mocks)
        .discover_competitors("example.com", &["crm".to_string()], 10)
        .await;
    assert_eq!(
        domains.iter().cloned().collect::<HashSet<_>>(),
        HashSet::from(["rival.io".to_string(), "another.net".to_string()])
    );
    for domain in &domains {
        assert!(!domain.contains("example.com") && !"example.com".contains(domain.as_str()));
    }
}

#[tokio::test]
async fn chain_stops_at_first_productive_strategy() {
    let mocks = chain_of(vec![
        MockBehavior::Blocked,
        MockBehavior::Fail("exit status 1".to_string()),
        MockBehavior::Timeout,
        MockBehavior::links(&["https://rival.io/blog/a"]),
        MockBehavior::links(&["https://paid.io/"]),
    ]);
    let engine = engine(&mocks);
    let report = engine.search("sites like example.com", 10).await;

    assert_eq!(report.resolution, Resolution::Success(StrategyKind::DirectHttp));
    assert_eq!(report.attempts.len(), 4);
    assert_eq!(mocks[4].call_count(), 0);
}

#[tokio::test]
async fn repeated_query_is_answered_from_cache() {
    let mocks = chain_of(vec![MockBehavior::links(&["https://rival.io/a", "https://rival.io/b"])]);
    let engine = engine(&mocks);

    let first = engine.search("example.com competitors", 20).await;
    let second = engine.search("example.com competitors", 20).await;

    assert_eq!(
        serde_json::to_vec(&first.results).unwrap(),
        serde_json::to_vec(&second.results).unwrap()
    );
    assert_eq!(second.resolution, Resolution::Cached);
    assert_eq!(mocks[0].call_count(), 1);
}

#[tokio::test]
async fn homepage_only_competitor_yields_no_content() {
    let mocks = chain_of(vec![MockBehavior::links(&["https://b.com/"])]);
    let items = engine(&mocks)
        .extract_competitor_content("a.com", &["b.com".to_string()], &[])
        .await;
    assert!(items.is_empty());
}

#[tokio::test]
async fn extracted_content_is_unique_by_url_and_ranked() {
    let mock = Arc::new(
        MockStrategy::new(StrategyKind::DirectHttp)
            .on_query(
                "site:b.com blog",
                MockBehavior::links(&["https://b.com/blog/x", "https://b.com/pricing", "https://b.com/blog/y"]),
            )
            .on_query(
                "site:b.com article",
                MockBehavior::links(&["https://b.com/blog/y", "https://b.com/2024/01/z"]),
            )
            .on_query("site:c.io", MockBehavior::Blocked),
    );
    let items = engine(&[mock])
        .extract_competitor_content(
            "a.com",
            &["b.com".to_string(), "c.io".to_string(), "b.com".to_string()],
            &["growth".to_string()],
        )
        .await;

    let urls: Vec<_> = items.iter().map(|i| i.url.as_str()).collect();
    assert_eq!(urls.len(), urls.iter().collect::<HashSet<_>>().len());
    assert_eq!(items.len(), 3);
    assert!(items.windows(2).all(|w| w[0].traffic_score >= w[1].traffic_score));
    assert!(items.iter().all(|i| i.domain == "b.com"));
}

#[test]
fn failing_proxy_is_evicted_after_third_failure() {
    let pool = ProxyPool::new(3, Duration::from_secs(1800));
    pool.add_proxies(vec![Proxy::new("10.0.0.1", 8080, vec![ProxyProtocol::Http])]);
    assert_eq!(pool.size(), 1);

    for _ in 0..3 {
        let proxy = pool.acquire().expect("proxy still pooled");
        pool.release(&proxy, false);
    }

    assert!(pool.acquire().is_none());
    assert_eq!(pool.size(), 0);
}
