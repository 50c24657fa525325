use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

// ============================================================================
// Strategy identity
// ============================================================================

/// The retrieval backends, listed in chain priority order (most evasive first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    CaptchaSolvingBrowser,
    HybridSubprocess,
    HeadlessBrowser,
    DirectHttp,
    ExternalSearchApi,
}

impl StrategyKind {
    pub const PRIORITY: [StrategyKind; 5] = [
        StrategyKind::CaptchaSolvingBrowser,
        StrategyKind::HybridSubprocess,
        StrategyKind::HeadlessBrowser,
        StrategyKind::DirectHttp,
        StrategyKind::ExternalSearchApi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::CaptchaSolvingBrowser => "captcha_browser",
            StrategyKind::HybridSubprocess => "hybrid_subprocess",
            StrategyKind::HeadlessBrowser => "headless_browser",
            StrategyKind::DirectHttp => "direct_http",
            StrategyKind::ExternalSearchApi => "search_api",
        }
    }

    pub fn cost_tier(&self) -> CostTier {
        match self {
            StrategyKind::CaptchaSolvingBrowser | StrategyKind::HeadlessBrowser => {
                CostTier::Expensive
            }
            StrategyKind::HybridSubprocess | StrategyKind::ExternalSearchApi => {
                CostTier::Moderate
            }
            StrategyKind::DirectHttp => CostTier::Cheap,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How expensive one attempt of a strategy is; drives backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostTier {
    Cheap,
    Moderate,
    Expensive,
}

// ============================================================================
// Search results
// ============================================================================

/// One organic result from a SERP. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SearchResult {
    /// 1-based rank on the results page(s).
    pub position: u32,
    pub title: String,
    pub link: String,
    pub snippet: String,
    pub origin: StrategyKind,
}

// ============================================================================
// Scored content
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLevel {
    Low,
    Medium,
    High,
}

impl TrafficLevel {
    pub fn from_score(score: u32) -> Self {
        if score >= 20 {
            TrafficLevel::High
        } else if score >= 15 {
            TrafficLevel::Medium
        } else {
            TrafficLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficLevel::Low => "low",
            TrafficLevel::Medium => "medium",
            TrafficLevel::High => "high",
        }
    }
}

/// A competitor article derived from a search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContentItem {
    pub title: String,
    pub url: String,
    pub domain: String,
    pub description: String,
    pub traffic_level: TrafficLevel,
    pub traffic_score: u32,
    pub keywords: Vec<String>,
}
