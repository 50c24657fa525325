use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::orchestrator::StrategyChain;
use crate::urls::{competitor_host, is_search_engine_host, is_self_match, normalize_domain};

/// Finds domains competing with a seed domain through chained searches.
pub struct CompetitorDiscovery {
    chain: Arc<StrategyChain>,
    query_limit: usize,
}

/// Query templates for `seed`: generic competitor queries, then one
/// keyword-scoped query per non-blank keyword phrase.
pub fn build_templates(seed: &str, keywords: &[String]) -> Vec<String> {
    let mut templates = vec![
        format!("sites like {}", seed),
        format!("{} alternatives", seed),
        format!("{} competitors", seed),
        format!("companies similar to {}", seed),
    ];
    let mut seen = HashSet::new();
    for keyword in keywords {
        let keyword = keyword.trim();
        if keyword.is_empty() || !seen.insert(keyword.to_lowercase()) {
            continue;
        }
        templates.push(format!("{} sites like {}", keyword, seed));
    }
    templates
}

impl CompetitorDiscovery {
    pub fn new(chain: Arc<StrategyChain>, query_limit: usize) -> Self {
        Self {
            chain,
            query_limit: query_limit.max(1),
        }
    }

    /// Up to `limit` competitor domains, never the seed or anything that
    /// contains it or is contained by it. An empty answer is not an error.
    pub async fn discover(&self, seed_domain: &str, keywords: &[String], limit: usize) -> Vec<String> {
        let seed = normalize_domain(seed_domain);
        if seed.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut templates = build_templates(&seed, keywords);
        templates.shuffle(&mut rand::thread_rng());

        let mut domains = Vec::new();
        let mut seen = HashSet::new();
        for (i, query) in templates.iter().enumerate() {
            if domains.len() >= limit {
                break;
            }
            if i > 0 {
                self.chain.pace().await;
            }
            let results = self.chain.search(query, self.query_limit).await;
            debug!(query = %query, results = results.len(), "discovery query done");
            for result in results {
                if let Some(host) = competitor_host(&result.link, &seed) {
                    if seen.insert(host.clone()) {
                        domains.push(host);
                        if domains.len() >= limit {
                            break;
                        }
                    }
                }
            }
        }

        if domains.len() < limit {
            for candidate in self.chain.find_similar_domains(&seed).await {
                let host = normalize_domain(&candidate);
                if host.is_empty() || is_self_match(&host, &seed) || is_search_engine_host(&host) {
                    continue;
                }
                if seen.insert(host.clone()) {
                    domains.push(host);
                    if domains.len() >= limit {
                        break;
                    }
                }
            }
        }

        info!(seed = %seed, found = domains.len(), limit, "🔎 competitor discovery finished");
        domains
    }
}
