use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::error::{Result, ScrapeError};
use crate::fingerprint::{Identity, STEALTH_SCRIPT};
use crate::proxy::Proxy;

/// Bounded set of Chrome instances shared by the browser-driven strategies.
///
/// At most `pool_size` Chrome processes are alive at once, idle ones included.
/// A browser is checked out for exactly one page job; afterwards it goes back
/// to the idle list if it was launched without a proxy and the job succeeded,
/// otherwise it is dropped (which kills the Chrome process). Idle browsers are
/// closed first whenever a launch would exceed the bound.
pub struct BrowserPool {
    config: BrowserConfig,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Browser>>>,
}

impl BrowserPool {
    pub fn new(config: BrowserConfig) -> Self {
        let size = config.pool_size.max(1);
        Self {
            config,
            permits: Arc::new(Semaphore::new(size)),
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Runs `job` against a fresh tab prepared with `identity`.
    ///
    /// headless_chrome is blocking, so the whole page lifecycle runs on the
    /// blocking thread pool under a wall-clock `budget`. The pool slot stays
    /// taken until the blocking work really ends, even after a timeout.
    pub async fn run_page<T, F>(
        &self,
        identity: &Identity,
        proxy: Option<&Proxy>,
        budget: Duration,
        job: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScrapeError::Browser("browser pool closed".to_string()))?;

        let reusable = proxy.is_none();
        let checked_out = if reusable { self.idle.lock().pop() } else { None };
        let config = self.config.clone();
        let identity = identity.clone();
        let proxy_arg = proxy.map(Proxy::to_chrome_arg);
        let idle = self.idle.clone();
        let permits = self.permits.clone();
        let cap = self.config.pool_size.max(1);

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let browser = match checked_out {
                Some(browser) if browser.get_version().is_ok() => browser,
                _ => {
                    let surplus = evict_surplus(&mut *idle.lock(), in_flight(&permits, cap), cap);
                    if !surplus.is_empty() {
                        debug!(closed = surplus.len(), "closing idle browsers before launch");
                    }
                    drop(surplus);
                    launch(&config, &identity, proxy_arg.as_deref())?
                }
            };
            let outcome = drive(&browser, &identity, job);
            if reusable && outcome.is_ok() {
                let mut idle = idle.lock();
                if has_idle_room(idle.len(), in_flight(&permits, cap), cap) {
                    idle.push(browser);
                }
            }
            outcome
        });

        match tokio::time::timeout(budget, task).await {
            Err(_) => {
                warn!(budget_secs = budget.as_secs(), "⏱️ browser page exceeded its budget");
                Err(ScrapeError::Timeout(budget))
            }
            Ok(Err(join)) => Err(ScrapeError::Browser(join.to_string())),
            Ok(Ok(Err(e))) => Err(ScrapeError::Browser(e.to_string())),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }
}

/// Page jobs holding a permit, the caller's own included.
fn in_flight(permits: &Semaphore, cap: usize) -> usize {
    cap.saturating_sub(permits.available_permits())
}

/// Removes the oldest idle entries until idle plus in-flight fits in `cap`.
/// The caller is about to launch, so its own job is already in `in_flight`.
fn evict_surplus<T>(idle: &mut Vec<T>, in_flight: usize, cap: usize) -> Vec<T> {
    let keep = cap.saturating_sub(in_flight);
    if idle.len() <= keep {
        return Vec::new();
    }
    let excess = idle.len() - keep;
    idle.drain(..excess).collect()
}

/// `in_flight` still counts the job handing its browser back.
fn has_idle_room(idle_len: usize, in_flight: usize, cap: usize) -> bool {
    idle_len + in_flight <= cap
}

fn launch(config: &BrowserConfig, identity: &Identity, proxy_arg: Option<&str>) -> anyhow::Result<Browser> {
    let ua_arg = format!("--user-agent={}", identity.user_agent);
    let lang_arg = format!("--lang={}", identity.accept_language().split(',').next().unwrap_or("en-US"));
    let proxy_flag = proxy_arg.map(|p| format!("--proxy-server={}", p));

    let mut args = vec![
        OsStr::new("--disable-blink-features=AutomationControlled"),
        OsStr::new("--no-sandbox"),
        OsStr::new("--disable-dev-shm-usage"),
        OsStr::new("--disable-infobars"),
        OsStr::new("--window-position=0,0"),
        OsStr::new("--ignore-certificate-errors"),
        OsStr::new("--ignore-certificate-errors-spki-list"),
        OsStr::new(&ua_arg),
        OsStr::new(&lang_arg),
    ];
    if let Some(flag) = proxy_flag.as_ref() {
        args.push(OsStr::new(flag));
    }

    info!(proxied = proxy_arg.is_some(), "🚀 launching Chrome");
    let browser = Browser::new(LaunchOptions {
        headless: config.headless,
        window_size: Some((1920, 1080)),
        path: config.chrome_path.clone(),
        idle_browser_timeout: Duration::from_secs(600),
        args,
        ..Default::default()
    })?;
    Ok(browser)
}

fn drive<T, F>(browser: &Browser, identity: &Identity, job: F) -> anyhow::Result<T>
where
    F: FnOnce(&Tab) -> anyhow::Result<T>,
{
    let tab = browser.new_tab()?;
    tab.set_user_agent(
        &identity.user_agent,
        Some(identity.accept_language()),
        identity.platform(),
    )?;
    tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
        source: STEALTH_SCRIPT.to_string(),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })?;

    let outcome = job(tab.as_ref());
    if let Err(e) = tab.close(true) {
        debug!(error = %e, "tab close failed");
    }
    outcome
}

/// Navigates and returns the rendered DOM once it has settled.
pub(super) fn load_dom(tab: &Tab, url: &str, settle: Duration) -> anyhow::Result<String> {
    tab.navigate_to(url)?;
    tab.wait_until_navigated()?;
    skim(tab);
    std::thread::sleep(settle);
    Ok(tab.get_content()?)
}

/// Light scroll so lazy result blocks render; failures are irrelevant.
pub(super) fn skim(tab: &Tab) {
    let _ = tab.evaluate(
        r#"
        (function() {
            let scrolled = 0;
            const interval = setInterval(() => {
                window.scrollBy(0, 50 + Math.random() * 50);
                scrolled += 100;
                if (scrolled > 600) {
                    clearInterval(interval);
                    window.scrollBy(0, -200);
                }
            }, 100 + Math.random() * 100);
        })();
    "#,
        false,
    );
}
