use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use tracing::{debug, warn};

use super::serp::{read_page, PageOutcome, SerpLayout};
use super::{paginate, Strategy, PAGE_SIZE};
use crate::backoff::Backoff;
use crate::detector::{Detector, PageView};
use crate::error::Result;
use crate::fingerprint::{Identity, IdentityGenerator};
use crate::models::{SearchResult, StrategyKind};
use crate::proxy::{Proxy, ProxyPool};

/// Google front-ends rotated per request.
pub const GOOGLE_DOMAINS: &[&str] = &[
    "https://www.google.com",
    "https://www.google.co.uk",
    "https://www.google.co.in",
    "https://www.google.ca",
    "https://www.google.com.au",
];

const MAX_PAGES: usize = 20;
const TRIES_PER_PAGE: u32 = 2;

/// Plain HTTP GETs against Google result pages with a randomized identity.
pub struct DirectHttpStrategy {
    proxies: Arc<ProxyPool>,
    identities: IdentityGenerator,
    detector: Detector,
    backoff: Backoff,
}

/// Everything random about one request, drawn up front.
struct RequestPlan {
    url: String,
    identity: Identity,
}

impl DirectHttpStrategy {
    pub fn new(proxies: Arc<ProxyPool>, backoff: Backoff) -> Self {
        Self {
            proxies,
            identities: IdentityGenerator::new(),
            detector: Detector::new(),
            backoff,
        }
    }

    fn plan(&self, query: &str, page: usize, attempt: u32) -> RequestPlan {
        let mut rng = rand::thread_rng();
        let domain = GOOGLE_DOMAINS.choose(&mut rng).copied().unwrap_or(GOOGLE_DOMAINS[0]);
        let start = page * PAGE_SIZE;

        let mut url = search_url(domain, query, start);
        if rng.gen_bool(0.5) {
            url.push_str("&filter=0");
        }
        if rng.gen_bool(0.5) {
            url.push_str("&pws=0");
        }
        if rng.gen_bool(0.3) {
            url.push_str("&nfpr=1");
        }

        let mut identity = self.identities.next_identity(attempt);
        let referer = if page > 0 {
            search_url(domain, query, start - PAGE_SIZE)
        } else {
            format!("{}/", domain)
        };
        identity.set_header("Referer", referer);
        identity.set_header("Cookie", consent_cookie(&mut rng));
        identity.set_header("Sec-Fetch-User", "?1");

        RequestPlan { url, identity }
    }

    fn read(&self, status: u16, body: &str, page: usize) -> PageOutcome {
        let view = PageView::from_http(status, body);
        read_page(&self.detector, &view, SerpLayout::Google, self.kind(), page * PAGE_SIZE)
    }

    async fn fetch_once(&self, plan: RequestPlan, proxy: Option<&Proxy>, page: usize) -> Result<PageOutcome> {
        let client = build_client(&plan.identity, proxy)?;
        debug!(url = %plan.url, proxied = proxy.is_some(), "GET");
        let mut response = client.get(&plan.url).send().await?;
        let status = response.status().as_u16();
        if status != 429 && status != 503 {
            response = response.error_for_status()?;
        }
        let body = response.text().await?;
        Ok(self.read(status, &body, page))
    }

    /// One results page, retried once with a fresh identity, domain and
    /// proxy when the first response is a block.
    async fn fetch_page(&self, query: &str, page: usize) -> Result<PageOutcome> {
        let mut last = Ok(PageOutcome::empty());
        for attempt in 0..TRIES_PER_PAGE {
            if attempt > 0 && !self.backoff.wait(attempt).await {
                break;
            }
            let plan = self.plan(query, page, attempt);
            let proxy = self.proxies.acquire_or_direct("direct http");
            let outcome = self.fetch_once(plan, proxy.as_ref(), page).await;

            if let Some(p) = proxy.as_ref() {
                let healthy = match &outcome {
                    Ok(PageOutcome::Blocked(_)) => false,
                    Ok(_) => true,
                    Err(e) => !e.charges_proxy(),
                };
                self.proxies.release(p, healthy);
            }

            match outcome {
                Ok(PageOutcome::Blocked(signal)) => {
                    warn!(page, attempt, %signal, "🛑 direct request blocked");
                    last = Ok(PageOutcome::Blocked(signal));
                }
                Err(e) if e.charges_proxy() => {
                    warn!(page, attempt, error = %e, "direct request failed");
                    last = Err(e);
                }
                other => return other,
            }
        }
        last
    }
}

fn search_url(domain: &str, query: &str, start: usize) -> String {
    format!(
        "{}/search?q={}&start={}&num={}&hl=en&gl=us",
        domain,
        urlencoding::encode(query),
        start,
        PAGE_SIZE
    )
}

fn consent_cookie(rng: &mut impl Rng) -> String {
    format!(
        "CONSENT=YES+cb.{}-{}-p0.en+FX+{}",
        chrono::Utc::now().format("%Y%m%d"),
        rng.gen_range(1..=20),
        rng.gen_range(100..=999)
    )
}

fn build_client(identity: &Identity, proxy: Option<&Proxy>) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &identity.headers {
        // reqwest negotiates compression itself.
        if name.eq_ignore_ascii_case("accept-encoding") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(identity.user_agent.clone())
        .timeout(identity.timeout());
    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.to_url())?);
    }
    Ok(builder.build()?)
}

#[async_trait]
impl Strategy for DirectHttpStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectHttp
    }

    async fn attempt(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        paginate(self.kind(), limit, MAX_PAGES, &self.backoff, |page| {
            self.fetch_page(query, page)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CostTier;
    use std::time::Duration;

    fn strategy() -> DirectHttpStrategy {
        DirectHttpStrategy::new(
            Arc::new(ProxyPool::new(3, Duration::from_secs(1800))),
            Backoff::for_tier(CostTier::Cheap).scaled(0.0),
        )
    }

    #[test]
    fn plan_rotates_domains_and_sets_referer_chain() {
        let s = strategy();
        let plan = s.plan("sites like a.com", 2, 0);
        assert!(GOOGLE_DOMAINS.iter().any(|d| plan.url.starts_with(d)));
        assert!(plan.url.contains("q=sites%20like%20a.com"));
        assert!(plan.url.contains("&start=20&num=10&hl=en&gl=us"));
        let referer = plan.identity.header("Referer").unwrap();
        assert!(referer.contains("&start=10"));
        assert!(plan.identity.header("Cookie").unwrap().starts_with("CONSENT=YES+cb."));
    }

    #[test]
    fn first_page_refers_to_the_home_page() {
        let plan = strategy().plan("x", 0, 1);
        let referer = plan.identity.header("Referer").unwrap();
        assert!(referer.ends_with(".com/") || referer.ends_with(".uk/") || referer.ends_with(".in/")
            || referer.ends_with(".ca/") || referer.ends_with(".au/"));
    }

    #[test]
    fn reads_block_status_before_parsing() {
        let s = strategy();
        assert!(matches!(s.read(429, "<html></html>", 0), PageOutcome::Blocked(_)));
        assert_eq!(s.read(200, "<html><body>nothing</body></html>", 0), PageOutcome::empty());
    }

    #[test]
    fn client_builds_with_and_without_proxy() {
        let identity = IdentityGenerator::new().next_identity(2);
        assert!(build_client(&identity, None).is_ok());
        let proxy = Proxy::new("10.0.0.1", 1080, vec![crate::proxy::ProxyProtocol::Socks5]);
        assert!(build_client(&identity, Some(&proxy)).is_ok());
    }
}
