use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{settle_proxy, Strategy, SIMILAR_DOMAIN_CAP};
use crate::config::HybridConfig;
use crate::error::{Result, ScrapeError};
use crate::models::{SearchResult, StrategyKind};
use crate::proxy::ProxyPool;
use crate::urls::{decode_search_url, is_search_engine_host, is_self_match, normalize_domain};

/// Result record printed by the external scraper.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}

/// Delegates retrieval to an external scraper process.
///
/// Protocol: `<program> <args..> search <query> <limit>` or
/// `<program> <args..> similar <domain>`. The process may log freely on stdout
/// as long as the output ends with one JSON array. A hard wall-clock timeout
/// applies and the child is killed when it is exceeded.
pub struct HybridSubprocessStrategy {
    config: HybridConfig,
    proxies: Arc<ProxyPool>,
}

impl HybridSubprocessStrategy {
    pub fn new(config: HybridConfig, proxies: Arc<ProxyPool>) -> Self {
        Self { config, proxies }
    }

    async fn run(&self, subcommand: &[String]) -> Result<String> {
        let proxy = self.proxies.acquire_or_direct("hybrid subprocess");

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .args(subcommand)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(p) = &proxy {
            let url = p.to_url();
            cmd.env("HTTP_PROXY", &url).env("HTTPS_PROXY", &url);
        }

        debug!(program = %self.config.program, ?subcommand, "spawning scraper process");
        let outcome = match tokio::time::timeout(self.config.timeout, cmd.output()).await {
            Err(_) => Err(ScrapeError::SubprocessFailure(format!(
                "no answer within {:?}, killed",
                self.config.timeout
            ))),
            Ok(Err(e)) => Err(ScrapeError::SubprocessFailure(format!("spawn failed: {}", e))),
            Ok(Ok(output)) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
                Err(ScrapeError::SubprocessFailure(format!(
                    "exited with {}: {}",
                    output.status, tail
                )))
            }
            Ok(Ok(output)) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
        };

        settle_proxy(&self.proxies, proxy.as_ref(), &outcome);
        outcome
    }
}

/// Log lines the scraper prints when a page was refused. It still exits 0 and
/// prints whatever it collected, often `[]`.
const BLOCK_MARKERS: &[&str] = &[
    "get blocked",
    "captcha",
    "rate limit",
    "status code 429",
    "status code 403",
    "unusual traffic",
];

const ERROR_MARKERS: &[&str] = &["error: status code", "error in python scraping"];

/// Explains an empty array from the log lines printed before it.
fn empty_output_error(stdout: &str) -> Option<ScrapeError> {
    let log = stdout.to_lowercase();
    if let Some(marker) = BLOCK_MARKERS.iter().find(|m| log.contains(*m)) {
        return Some(ScrapeError::Blocked(format!("scraper reported \"{}\"", marker)));
    }
    ERROR_MARKERS.iter().find(|m| log.contains(*m)).map(|marker| {
        ScrapeError::SubprocessFailure(format!("scraper reported \"{}\"", marker))
    })
}

/// Parses the JSON array that ends `stdout`, skipping any log lines before it.
fn parse_json_tail<T: DeserializeOwned>(stdout: &str) -> Result<Vec<T>> {
    let mut starts = Vec::new();
    let mut pos = 0;
    for line in stdout.split_inclusive('\n') {
        starts.push((pos, line));
        pos += line.len();
    }
    for (start, line) in starts.into_iter().rev() {
        if !line.trim_start().starts_with('[') {
            continue;
        }
        if let Ok(parsed) = serde_json::from_str::<Vec<T>>(stdout[start..].trim()) {
            return Ok(parsed);
        }
    }
    Err(ScrapeError::SubprocessFailure(
        "output did not end with a JSON array".to_string(),
    ))
}

fn to_results(records: Vec<RawRecord>, limit: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for record in records {
        let link = decode_search_url(&record.link);
        if !link.starts_with("http") || !seen.insert(link.clone()) {
            continue;
        }
        // The scraper numbers each page from 1; rank across the merged pages.
        results.push(SearchResult {
            position: results.len() as u32 + 1,
            title: record.title.trim().to_string(),
            link,
            snippet: record.snippet.trim().to_string(),
            origin: StrategyKind::HybridSubprocess,
        });
        if results.len() >= limit {
            break;
        }
    }
    results
}

fn to_domains(raw: Vec<String>, seed: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|d| normalize_domain(d))
        .filter(|d| !d.is_empty() && !is_self_match(d, seed) && !is_search_engine_host(d))
        .filter(|d| seen.insert(d.clone()))
        .take(SIMILAR_DOMAIN_CAP)
        .collect()
}

#[async_trait]
impl Strategy for HybridSubprocessStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HybridSubprocess
    }

    async fn attempt(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let stdout = self
            .run(&["search".to_string(), query.to_string(), limit.to_string()])
            .await?;
        let records: Vec<RawRecord> = parse_json_tail(&stdout)?;
        let results = to_results(records, limit);
        if results.is_empty() {
            if let Some(err) = empty_output_error(&stdout) {
                warn!(query, error = %err, "hybrid scraper returned nothing");
                return Err(err);
            }
        }
        info!(query, found = results.len(), "hybrid scraper finished");
        Ok(results)
    }

    async fn find_similar_domains(&self, domain: &str) -> Vec<String> {
        let seed = normalize_domain(domain);
        let stdout = match self.run(&["similar".to_string(), seed.clone()]).await {
            Ok(stdout) => stdout,
            Err(e) => {
                warn!(domain = %seed, error = %e, "hybrid similar-domain lookup failed");
                return Vec::new();
            }
        };
        match parse_json_tail::<String>(&stdout) {
            Ok(raw) => to_domains(raw, &seed),
            Err(e) => {
                warn!(domain = %seed, error = %e, "unreadable similar-domain output");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const SEARCH_OUTPUT: &str = r#"Scraping page 1 (results 1-10)
[INFO] using domain https://www.google.ca
Found 2 results on page 1
[
  {
    "title": "Pricing guide",
    "link": "https://rival.io/blog/pricing",
    "snippet": "How to price",
    "position": 1,
    "source": "google-python-post"
  },
  {
    "title": "Dup",
    "link": "https://rival.io/blog/pricing",
    "snippet": "",
    "position": 2
  },
  {
    "title": "Other",
    "link": "https://other.io/post",
    "position": 3
  }
]
"#;

    fn shell(script: &str, timeout: Duration) -> HybridSubprocessStrategy {
        HybridSubprocessStrategy::new(
            HybridConfig {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                timeout,
            },
            Arc::new(ProxyPool::new(3, Duration::from_secs(1800))),
        )
    }

    #[test]
    fn json_tail_skips_log_lines() {
        let records: Vec<RawRecord> = parse_json_tail(SEARCH_OUTPUT).unwrap();
        assert_eq!(records.len(), 3);
        let results = to_results(records, 10);
        let links: Vec<_> = results.iter().map(|r| r.link.as_str()).collect();
        assert_eq!(links, vec!["https://rival.io/blog/pricing", "https://other.io/post"]);
        assert_eq!(results[1].position, 2);
    }

    #[test]
    fn positions_continue_across_scraped_pages() {
        let stdout = r#"Scraping page 1 (results 1-10)
Scraping page 2 (results 11-20)
[{"link":"https://r.io/1","position":1},{"link":"https://r.io/2","position":2},{"link":"https://r.io/11","position":1}]
"#;
        let records: Vec<RawRecord> = parse_json_tail(stdout).unwrap();
        let positions: Vec<_> = to_results(records, 10).iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn quiet_empty_output_is_plain_empty() {
        assert!(empty_output_error("Found 0 results on page 1\n[]\n").is_none());
    }

    #[tokio::test]
    async fn blocked_scraper_with_empty_array_is_blocked() {
        let script = r#"echo "GET blocked (CAPTCHA or rate limit), skipping page"; echo "Error: Status code 429"; echo "[]""#;
        let s = shell(script, Duration::from_secs(10));
        let err = s.attempt("sites like a.com", 10).await.unwrap_err();
        assert!(err.is_blocked());
    }

    #[tokio::test]
    async fn failed_scrape_with_empty_array_is_a_subprocess_failure() {
        let s = shell(r#"echo "Error in Python scraping: boom"; echo "[]""#, Duration::from_secs(10));
        let err = s.attempt("q", 10).await.unwrap_err();
        assert!(matches!(err, ScrapeError::SubprocessFailure(_)));
    }

    #[tokio::test]
    async fn chain_moves_past_a_blocked_scraper() {
        use crate::cache::MemoryCache;
        use crate::orchestrator::{Resolution, StrategyChain};
        use crate::testing::{MockBehavior, MockStrategy};

        let captcha = Arc::new(
            MockStrategy::new(StrategyKind::CaptchaSolvingBrowser).with_default(MockBehavior::Blocked),
        );
        let hybrid = Arc::new(shell(
            r#"echo "GET blocked (CAPTCHA or rate limit)..."; echo "Error: Status code 429"; echo "[]""#,
            Duration::from_secs(10),
        ));
        let direct = Arc::new(
            MockStrategy::new(StrategyKind::DirectHttp)
                .with_default(MockBehavior::links(&["https://rival.io/blog/a"])),
        );
        let strategies = vec![captcha as Arc<dyn Strategy>, hybrid, direct.clone()];
        let chain = StrategyChain::new(strategies, Arc::new(MemoryCache::new(Duration::from_secs(60))))
            .with_query_delay((0, 0));

        let report = chain.search_detailed("sites like a.com", 10).await;
        assert_eq!(report.resolution, Resolution::Success(StrategyKind::DirectHttp));
        assert_eq!(direct.call_count(), 1);
        assert_eq!(report.results.len(), 1);
    }

    #[test]
    fn output_without_array_is_a_failure() {
        let err = parse_json_tail::<String>("Error in Python scraping: boom\n").unwrap_err();
        assert!(matches!(err, ScrapeError::SubprocessFailure(_)));
    }

    #[test]
    fn similar_domains_are_normalised_and_filtered() {
        let raw = vec![
            "www.rival.io".to_string(),
            "rival.io".to_string(),
            "blog.example.com".to_string(),
            "google.com".to_string(),
            "other.io".to_string(),
        ];
        assert_eq!(to_domains(raw, "example.com"), vec!["rival.io", "other.io"]);
    }

    #[tokio::test]
    async fn runs_the_search_protocol() {
        let script = r#"echo "query=$1 limit=$2"; printf '[{"title":"T","link":"https://rival.io/x","snippet":""}]\n'"#;
        let s = shell(script, Duration::from_secs(10));
        let results = s.attempt("sites like a.com", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].origin, StrategyKind::HybridSubprocess);
        assert_eq!(results[0].position, 1);
    }

    #[tokio::test]
    async fn slow_process_is_killed_at_the_deadline() {
        let s = shell("sleep 5", Duration::from_millis(100));
        let err = s.attempt("q", 10).await.unwrap_err();
        assert!(matches!(err, ScrapeError::SubprocessFailure(_)));
    }

    #[tokio::test]
    async fn crashing_process_is_a_subprocess_failure() {
        let s = shell("echo oops >&2; exit 3", Duration::from_secs(10));
        let err = s.attempt("q", 10).await.unwrap_err();
        assert!(matches!(err, ScrapeError::SubprocessFailure(_)));
        assert!(s.find_similar_domains("example.com").await.is_empty());
    }
}
