//! Competitor content discovery over a chain of search strategies.
//!
//! A query goes through the result cache, then through each retrieval
//! strategy in priority order until one returns results. Competitor
//! discovery and content extraction are built on top of that chain.

pub mod api;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod content;
pub mod detector;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod orchestrator;
pub mod proxy;
pub mod scheduler;
pub mod store;
pub mod strategies;
pub mod testing;
pub mod urls;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Result, ScrapeError};
pub use models::{ContentItem, SearchResult, StrategyKind, TrafficLevel};
pub use orchestrator::{ChainReport, Resolution, StrategyChain};
pub use proxy::{Proxy, ProxyPool};
pub use strategies::Strategy;
