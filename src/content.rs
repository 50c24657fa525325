//! Article discovery on competitor domains and the traffic heuristic.
//!
//! Each competitor domain gets a handful of article-biased `site:` queries.
//! Results that point at a homepage, a transactional page or another host
//! are dropped; the rest are scored from SERP rank and URL shape.

use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::config::ContentConfig;
use crate::models::{ContentItem, SearchResult, TrafficLevel};
use crate::orchestrator::StrategyChain;
use crate::urls::normalize_domain;

const BASE_SCORE: u32 = 10;
const ARTICLE_PATH_BONUS: u32 = 5;
const COM_BONUS: u32 = 2;

static ARTICLE_PATH: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)/(blog|blogs|article|articles|post|posts|news|guide|guides|insights|resources|learn|stories)(/|$)|/(19|20)\d{2}/\d{1,2}(/|$)",
    )
    .ok()
});

const NON_ARTICLE_PREFIXES: &[&str] = &[
    "/pricing",
    "/plans",
    "/cart",
    "/checkout",
    "/login",
    "/signin",
    "/sign-in",
    "/signup",
    "/sign-up",
    "/register",
    "/account",
    "/contact",
    "/about",
    "/careers",
    "/jobs",
    "/privacy",
    "/terms",
    "/legal",
    "/search",
    "/tag",
];

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "because",
    "been", "before", "best", "but", "by", "can", "could", "did", "do", "does", "for", "from",
    "get", "had", "has", "have", "how", "if", "in", "into", "is", "it", "its", "just", "like",
    "make", "more", "most", "new", "not", "now", "of", "on", "one", "or", "our", "out", "over",
    "should", "so", "some", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "to", "top", "up", "use", "using", "was", "way", "ways", "we", "what",
    "when", "where", "which", "while", "who", "why", "will", "with", "without", "you", "your",
];

/// The `site:` queries issued for one competitor domain.
pub fn article_queries(domain: &str, keywords: &[String]) -> Vec<String> {
    let mut queries = vec![format!("site:{} blog", domain), format!("site:{} article", domain)];
    let mut seen = HashSet::new();
    for keyword in keywords {
        let keyword = keyword.trim();
        if !keyword.is_empty() && seen.insert(keyword.to_lowercase()) {
            queries.push(format!("site:{} {}", domain, keyword));
        }
    }
    queries
}

/// Whether `link` can be an article on `domain`: same host or a subdomain,
/// not the homepage, not a transactional or account page.
pub fn is_article_candidate(link: &str, domain: &str) -> bool {
    let Ok(parsed) = Url::parse(link) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host != domain && !host.ends_with(&format!(".{}", domain)) {
        return false;
    }

    let path = parsed.path().trim_end_matches('/').to_ascii_lowercase();
    if path.is_empty() {
        return false;
    }
    !NON_ARTICLE_PREFIXES
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{}/", prefix)))
}

/// `10 + max(0, 11 - position) + 5 for article-looking paths + 2 for .com`.
pub fn traffic_score(position: u32, link: &str) -> u32 {
    let position_bonus = 11u32.saturating_sub(position);
    let (path, host) = match Url::parse(link) {
        Ok(parsed) => (
            parsed.path().to_string(),
            parsed.host_str().unwrap_or_default().to_ascii_lowercase(),
        ),
        Err(_) => (String::new(), String::new()),
    };
    let article_bonus = if ARTICLE_PATH.as_ref().map_or(false, |re| re.is_match(&path)) {
        ARTICLE_PATH_BONUS
    } else {
        0
    };
    let tld_bonus = if host.ends_with(".com") { COM_BONUS } else { 0 };
    BASE_SCORE + position_bonus + article_bonus + tld_bonus
}

/// Top `n` non-stopword terms of `text` by frequency; ties keep first appearance.
pub fn extract_keywords(text: &str, n: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let words = text
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|w| w.trim_matches('-').to_lowercase())
        .filter(|w| w.chars().count() >= 3)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOPWORDS.contains(&w.as_str()));
    for (order, word) in words.enumerate() {
        counts.entry(word).or_insert((0, order)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(n).map(|(word, _)| word).collect()
}

/// Scores one search result, or `None` when it is not an article of `domain`.
pub fn score_result(result: &SearchResult, domain: &str, keywords_per_item: usize) -> Option<ContentItem> {
    if !is_article_candidate(&result.link, domain) {
        return None;
    }
    let score = traffic_score(result.position, &result.link);
    let title = match result.title.trim() {
        "" => result.link.clone(),
        t => t.to_string(),
    };
    let description = match result.snippet.trim() {
        "" => title.clone(),
        s => s.to_string(),
    };
    let keywords = extract_keywords(&format!("{} {}", title, result.snippet), keywords_per_item);
    Some(ContentItem {
        title,
        url: result.link.clone(),
        domain: domain.to_string(),
        description,
        traffic_level: TrafficLevel::from_score(score),
        traffic_score: score,
        keywords,
    })
}

/// Deduplicates by URL (highest score wins) and orders by score, then URL.
pub fn aggregate(batches: Vec<Vec<ContentItem>>) -> Vec<ContentItem> {
    let mut by_url: HashMap<String, ContentItem> = HashMap::new();
    for item in batches.into_iter().flatten() {
        let better = by_url
            .get(&item.url)
            .map_or(true, |existing| item.traffic_score > existing.traffic_score);
        if better {
            by_url.insert(item.url.clone(), item);
        }
    }
    let mut items: Vec<ContentItem> = by_url.into_values().collect();
    items.sort_by(|a, b| b.traffic_score.cmp(&a.traffic_score).then_with(|| a.url.cmp(&b.url)));
    items
}

pub struct ContentExtractor {
    chain: Arc<StrategyChain>,
    config: ContentConfig,
}

impl ContentExtractor {
    pub fn new(chain: Arc<StrategyChain>, config: ContentConfig) -> Self {
        Self { chain, config }
    }

    /// Scored articles across `competitors`, at most `per_domain_budget` per
    /// domain. Domains run with bounded concurrency; queries within a domain
    /// run one after another.
    pub async fn extract(&self, seed_domain: &str, competitors: &[String], keywords: &[String]) -> Vec<ContentItem> {
        let seed = normalize_domain(seed_domain);
        let mut seen = HashSet::new();
        // Only the seed itself is skipped; callers choose their competitors.
        let domains: Vec<String> = competitors
            .iter()
            .map(|d| normalize_domain(d))
            .filter(|d| !d.is_empty() && *d != seed)
            .filter(|d| seen.insert(d.clone()))
            .collect();

        let batches: Vec<Vec<ContentItem>> = stream::iter(domains)
            .map(|domain| async move { self.extract_domain(&domain, keywords).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let items = aggregate(batches);
        info!(seed = %seed, items = items.len(), "📰 content extraction finished");
        items
    }

    async fn extract_domain(&self, domain: &str, keywords: &[String]) -> Vec<ContentItem> {
        let budget = self.config.per_domain_budget.max(1);
        let mut items = Vec::new();
        let mut seen = HashSet::new();

        for (i, query) in article_queries(domain, keywords).iter().enumerate() {
            if items.len() >= budget {
                break;
            }
            if i > 0 {
                self.chain.pace().await;
            }
            for result in self.chain.search(query, self.config.query_limit).await {
                let Some(item) = score_result(&result, domain, self.config.keywords_per_item) else {
                    continue;
                };
                if seen.insert(item.url.clone()) {
                    items.push(item);
                    if items.len() >= budget {
                        break;
                    }
                }
            }
        }

        debug!(domain, items = items.len(), "domain extraction done");
        items
    }
}
