use async_trait::async_trait;
use headless_chrome::Tab;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::browser_pool::BrowserPool;
use super::serp::{read_page, PageOutcome, SerpLayout};
use super::{pages_for, settle_proxy, Collector, Strategy, PAGE_SIZE};
use crate::backoff::SlidingWindow;
use crate::config::CaptchaConfig;
use crate::detector::{Detector, PageView, Verdict};
use crate::error::Result;
use crate::fingerprint::IdentityGenerator;
use crate::models::{SearchResult, StrategyKind};
use crate::proxy::ProxyPool;

const MAX_PAGES: usize = 3;
const GOOGLE_HOME: &str = "https://www.google.com/?hl=en";

/// Widgets worth a click when a checkbox-style challenge is shown.
const CHALLENGE_TARGETS: &[&str] = &[
    "iframe[src*='recaptcha'][title*='reCAPTCHA']",
    "iframe[src*='recaptcha']",
    "iframe[src*='hcaptcha']",
    ".cf-turnstile iframe",
    "#recaptcha-anchor",
    "input[type='checkbox']",
];

const CONSENT_SCRIPT: &str = r#"
    (() => {
        const text = document.body ? document.body.textContent : '';
        if (text.includes('Before you continue') || text.includes('Avant de continuer') || text.includes('cookies')) {
            const accept = document.querySelector('button[id*="accept"], button[id*="agree"], button[id*="L2AGLb"], form[action*="consent"] button');
            if (accept) {
                accept.click();
                return "consent_clicked";
            }
            return "consent_found_no_button";
        }
        return "no_consent";
    })();
"#;

/// Drives Google's home page like a visitor would and tries the built-in
/// checkbox heuristics when a challenge shows up.
///
/// Every attempt is counted in a rolling hourly window; once the window is
/// full the strategy reports itself saturated so the chain tries it last.
pub struct CaptchaBrowserStrategy {
    browsers: Arc<BrowserPool>,
    proxies: Arc<ProxyPool>,
    identities: IdentityGenerator,
    detector: Detector,
    window: SlidingWindow,
    solve_rounds: u32,
}

impl CaptchaBrowserStrategy {
    pub fn new(browsers: Arc<BrowserPool>, proxies: Arc<ProxyPool>, config: &CaptchaConfig) -> Self {
        Self {
            browsers,
            proxies,
            identities: IdentityGenerator::new(),
            detector: Detector::new(),
            window: SlidingWindow::hourly(config.hourly_cap),
            solve_rounds: config.solve_rounds,
        }
    }

    pub fn requests_this_hour(&self) -> usize {
        self.window.count()
    }

    fn budget(&self, pages: usize) -> Duration {
        Duration::from_secs(60)
            + Duration::from_secs(20) * pages as u32
            + Duration::from_secs(15) * self.solve_rounds
    }
}

/// Feeds the pages one browser session produced into a collector.
fn collect(kind: StrategyKind, limit: usize, pages: Vec<PageOutcome>) -> Result<Vec<SearchResult>> {
    let mut collector = Collector::new(kind, limit);
    for page in pages {
        if !collector.absorb(Ok(page))? {
            break;
        }
    }
    Ok(collector.finish())
}

fn pause(min_ms: u64, max_ms: u64) {
    let millis = rand::thread_rng().gen_range(min_ms..=max_ms);
    std::thread::sleep(Duration::from_millis(millis));
}

fn read_current(tab: &Tab, detector: &Detector, offset: usize) -> anyhow::Result<PageOutcome> {
    let html = tab.get_content()?;
    let view = PageView::from_dom(&html);
    Ok(read_page(
        detector,
        &view,
        SerpLayout::Google,
        StrategyKind::CaptchaSolvingBrowser,
        offset,
    ))
}

fn is_challenged(tab: &Tab, detector: &Detector) -> anyhow::Result<bool> {
    let html = tab.get_content()?;
    Ok(matches!(
        detector.classify(&PageView::from_dom(&html)),
        Verdict::Blocked(_)
    ))
}

fn accept_consent(tab: &Tab) -> anyhow::Result<()> {
    let result = tab.evaluate(CONSENT_SCRIPT, false)?;
    if let Some(serde_json::Value::String(state)) = result.value {
        debug!(state = %state, "consent check");
        if state == "consent_clicked" {
            std::thread::sleep(Duration::from_secs(2));
            tab.wait_until_navigated()?;
        }
    }
    Ok(())
}

fn type_query(tab: &Tab, query: &str) -> anyhow::Result<()> {
    let search_box = match tab.wait_for_element("textarea[name='q']") {
        Ok(el) => el,
        Err(_) => tab.wait_for_element("input[name='q']")?,
    };
    search_box.click()?;
    tab.evaluate(
        r#"
        const input = document.querySelector('textarea[name="q"]') || document.querySelector('input[name="q"]');
        if (input) { input.value = ''; input.focus(); }
    "#,
        false,
    )?;
    pause(300, 600);
    for c in query.chars() {
        tab.type_str(&c.to_string())?;
        pause(100, 250);
    }
    pause(300, 700);
    tab.press_key("Enter")?;
    tab.wait_until_navigated()?;
    Ok(())
}

/// Clicks the first challenge widget found. Cross-origin frames cannot be
/// scripted, so this goes through real mouse events on the element.
fn click_challenge(tab: &Tab) -> bool {
    for target in CHALLENGE_TARGETS {
        if let Ok(element) = tab.find_element(target) {
            if element.click().is_ok() {
                debug!(target, "clicked challenge widget");
                return true;
            }
        }
    }
    false
}

/// Spends solve rounds until the page is no longer a challenge.
fn try_solve(tab: &Tab, detector: &Detector, max_rounds: u32, used: &mut u32) -> anyhow::Result<bool> {
    while *used < max_rounds {
        *used += 1;
        info!(round = *used, max_rounds, "🧩 attempting challenge");
        if !click_challenge(tab) {
            debug!("no clickable challenge widget");
        }
        pause(4_000, 7_000);
        let _ = tab.wait_until_navigated();
        if !is_challenged(tab, detector)? {
            info!(round = *used, "✅ challenge cleared");
            return Ok(true);
        }
    }
    Ok(false)
}

/// One whole browser session: home page, consent, typed query, then up to
/// `pages` result pages through the next-page control.
fn google_session(
    tab: &Tab,
    query: &str,
    pages: usize,
    detector: Detector,
    solve_rounds: u32,
) -> anyhow::Result<Vec<PageOutcome>> {
    tab.navigate_to(GOOGLE_HOME)?;
    tab.wait_until_navigated()?;
    pause(3_000, 5_000);
    accept_consent(tab)?;

    let mut used = 0;
    if is_challenged(tab, &detector)? && !try_solve(tab, &detector, solve_rounds, &mut used)? {
        return Ok(vec![read_current(tab, &detector, 0)?]);
    }

    type_query(tab, query)?;
    pause(2_000, 3_500);

    let mut outcomes = Vec::new();
    for page in 0..pages {
        let offset = page * PAGE_SIZE;
        let mut outcome = read_current(tab, &detector, offset)?;
        if matches!(outcome, PageOutcome::Blocked(_))
            && try_solve(tab, &detector, solve_rounds, &mut used)?
        {
            outcome = read_current(tab, &detector, offset)?;
        }
        let more = matches!(
            &outcome,
            PageOutcome::Page { results, has_next } if *has_next && !results.is_empty()
        );
        outcomes.push(outcome);
        if !more || page + 1 == pages {
            break;
        }
        match tab.find_element("a#pnnext") {
            Ok(next) => {
                next.click()?;
                tab.wait_until_navigated()?;
                pause(1_500, 3_000);
            }
            Err(_) => break,
        }
    }
    Ok(outcomes)
}

#[async_trait]
impl Strategy for CaptchaBrowserStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CaptchaSolvingBrowser
    }

    fn is_saturated(&self) -> bool {
        self.window.is_saturated()
    }

    async fn attempt(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.window.record(self.kind().as_str());

        let pages = pages_for(limit, MAX_PAGES);
        let identity = self.identities.next_identity(0);
        let proxy = self.proxies.acquire_or_direct("captcha browser");
        let detector = self.detector;
        let solve_rounds = self.solve_rounds;
        let owned_query = query.to_string();

        let outcome = self
            .browsers
            .run_page(&identity, proxy.as_ref(), self.budget(pages), move |tab| {
                google_session(tab, &owned_query, pages, detector, solve_rounds)
            })
            .await
            .and_then(|sessions| collect(self.kind(), limit, sessions));

        settle_proxy(&self.proxies, proxy.as_ref(), &outcome);
        outcome
    }
}
