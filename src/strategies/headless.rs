use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::browser_pool::{load_dom, BrowserPool};
use super::serp::{bing_search_url, read_page, PageOutcome, SerpLayout};
use super::{paginate, settle_proxy, Strategy, PAGE_SIZE};
use crate::backoff::Backoff;
use crate::detector::{Detector, PageView};
use crate::error::Result;
use crate::fingerprint::{Identity, IdentityGenerator};
use crate::models::{SearchResult, StrategyKind};
use crate::proxy::{Proxy, ProxyPool};

const MAX_PAGES: usize = 5;
const SETTLE: Duration = Duration::from_secs(3);
/// Chrome start-up and navigation slack on top of the identity timeout.
const LAUNCH_SLACK: Duration = Duration::from_secs(20);

/// Renders Bing result pages in a pooled headless Chrome.
pub struct HeadlessBrowserStrategy {
    browsers: Arc<BrowserPool>,
    proxies: Arc<ProxyPool>,
    identities: IdentityGenerator,
    detector: Detector,
    backoff: Backoff,
}

impl HeadlessBrowserStrategy {
    pub fn new(browsers: Arc<BrowserPool>, proxies: Arc<ProxyPool>, backoff: Backoff) -> Self {
        Self {
            browsers,
            proxies,
            identities: IdentityGenerator::new(),
            detector: Detector::new(),
            backoff,
        }
    }

    fn read(&self, dom: &str, page: usize) -> PageOutcome {
        let view = PageView::from_dom(dom);
        read_page(&self.detector, &view, SerpLayout::Bing, self.kind(), page * PAGE_SIZE)
    }

    async fn fetch_page(
        &self,
        query: &str,
        page: usize,
        identity: &Identity,
        proxy: Option<&Proxy>,
    ) -> Result<PageOutcome> {
        let url = bing_search_url(query, page);
        let budget = identity.timeout() + LAUNCH_SLACK;
        let dom = self
            .browsers
            .run_page(identity, proxy, budget, move |tab| load_dom(tab, &url, SETTLE))
            .await?;
        Ok(self.read(&dom, page))
    }
}

#[async_trait]
impl Strategy for HeadlessBrowserStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HeadlessBrowser
    }

    async fn attempt(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let identity = self.identities.next_identity(0);
        let proxy = self.proxies.acquire_or_direct("headless browser");

        let outcome = paginate(self.kind(), limit, MAX_PAGES, &self.backoff, |page| {
            self.fetch_page(query, page, &identity, proxy.as_ref())
        })
        .await;

        settle_proxy(&self.proxies, proxy.as_ref(), &outcome);
        outcome
    }
}
