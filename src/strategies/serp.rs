//! Organic-result extraction for the Google and Bing SERP layouts.
//!
//! Everything here is synchronous: `scraper::Html` is not `Send`, so callers
//! parse inside a plain function and only carry the owned results across
//! await points.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

use crate::detector::{BlockSignal, Detector, PageView, Verdict};
use crate::models::{SearchResult, StrategyKind};
use crate::urls::{decode_search_url, host_of, is_search_engine_host};

/// What one fetched results page amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Page {
        results: Vec<SearchResult>,
        has_next: bool,
    },
    Blocked(BlockSignal),
}

impl PageOutcome {
    pub fn empty() -> Self {
        PageOutcome::Page {
            results: Vec::new(),
            has_next: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerpLayout {
    Google,
    Bing,
}

struct LayoutSelectors {
    container: Selector,
    title: Selector,
    link: Selector,
    snippet: Selector,
    next: Selector,
}

impl LayoutSelectors {
    fn parse(container: &str, title: &str, link: &str, snippet: &str, next: &str) -> Option<Self> {
        Some(Self {
            container: Selector::parse(container).ok()?,
            title: Selector::parse(title).ok()?,
            link: Selector::parse(link).ok()?,
            snippet: Selector::parse(snippet).ok()?,
            next: Selector::parse(next).ok()?,
        })
    }
}

static GOOGLE: Lazy<Option<LayoutSelectors>> = Lazy::new(|| {
    LayoutSelectors::parse(
        "div.g, div.tF2Cxc, div.MjjYud",
        "h3",
        "a[href]",
        ".VwiC3b, .lEBKkf, div[data-snc], .IsZvec, .st",
        "a#pnnext",
    )
});

static BING: Lazy<Option<LayoutSelectors>> = Lazy::new(|| {
    LayoutSelectors::parse(
        "li.b_algo",
        "h2",
        "h2 > a[href], a.tilk[href]",
        ".b_caption p, p.b_lineclamp2, p",
        "a.sb_pagN, a[title='Next page']",
    )
});

fn selectors(layout: SerpLayout) -> Option<&'static LayoutSelectors> {
    match layout {
        SerpLayout::Google => GOOGLE.as_ref(),
        SerpLayout::Bing => BING.as_ref(),
    }
}

fn collapse_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves an anchor href to the destination URL, or `None` for internal links.
fn destination(href: &str) -> Option<String> {
    let link = decode_search_url(href);
    if !link.starts_with("http") {
        return None;
    }
    let host = host_of(&link)?;
    if is_search_engine_host(&host) {
        None
    } else {
        Some(link)
    }
}

/// Extracts organic results, numbering them from `offset + 1`.
pub fn parse_results(
    document: &Html,
    layout: SerpLayout,
    origin: StrategyKind,
    offset: usize,
) -> Vec<SearchResult> {
    let Some(sel) = selectors(layout) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for container in document.select(&sel.container) {
        let Some(title) = container.select(&sel.title).next().map(collapse_text) else {
            continue;
        };
        if title.is_empty() {
            continue;
        }
        let link = container
            .select(&sel.link)
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| href.starts_with("http") || href.starts_with("/url?"))
            .find_map(destination);
        let Some(link) = link else {
            continue;
        };
        // Google nests result containers; the first occurrence wins.
        if !seen.insert(link.clone()) {
            continue;
        }
        let snippet = container
            .select(&sel.snippet)
            .map(collapse_text)
            .find(|s| !s.is_empty())
            .unwrap_or_default();

        results.push(SearchResult {
            position: (offset + results.len() + 1) as u32,
            title,
            link,
            snippet,
            origin,
        });
    }
    results
}

pub fn has_next_page(document: &Html, layout: SerpLayout) -> bool {
    selectors(layout)
        .map(|sel| document.select(&sel.next).next().is_some())
        .unwrap_or(false)
}

/// Classifies a fetched page and, when usable, extracts its results.
pub fn read_page(
    detector: &Detector,
    view: &PageView,
    layout: SerpLayout,
    origin: StrategyKind,
    offset: usize,
) -> PageOutcome {
    match detector.classify(view) {
        Verdict::Blocked(signal) => PageOutcome::Blocked(signal),
        Verdict::Empty => PageOutcome::empty(),
        Verdict::Usable { .. } => PageOutcome::Page {
            results: parse_results(view.document(), layout, origin, offset),
            has_next: has_next_page(view.document(), layout),
        },
    }
}

/// Bing results URL for zero-based `page`.
pub fn bing_search_url(query: &str, page: usize) -> String {
    let mut url = format!(
        "https://www.bing.com/search?q={}&cc=US&setlang=en",
        urlencoding::encode(query)
    );
    if page > 0 {
        url.push_str(&format!("&first={}", page * super::PAGE_SIZE + 1));
    }
    url
}
