//! Block/CAPTCHA detection shared by every strategy.
//!
//! Both raw HTTP bodies and rendered browser DOMs are reduced to a
//! [`PageView`] (lowercased text plus a parsed document for selector probes),
//! so one classifier serves all retrieval paths.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

/// Markup that only appears on verification / challenge pages.
const CHALLENGE_SELECTORS: &[&str] = &[
    "form#captcha-form",
    "form[action*='sorry']",
    "#recaptcha",
    ".g-recaptcha",
    "iframe[src*='recaptcha']",
    ".h-captcha",
    "iframe[src*='hcaptcha']",
    "[data-sitekey]",
    "#challenge-form",
    "#cf-challenge-running",
    ".cf-turnstile",
    "#b_captcha",
];

/// Phrases served with automated-traffic warnings.
const CHALLENGE_PHRASES: &[&str] = &[
    "unusual traffic from your computer network",
    "our systems have detected unusual traffic",
    "automated queries",
    "prove you're not a robot",
    "prove your humanity",
    "i'm not a robot",
    "verify you are human",
    "are you a robot",
    "one last step",
    "to continue, please type the characters",
];

/// Containers of organic results on the supported SERP layouts.
pub const RESULT_NODE_SELECTOR: &str = "div.g, div.tF2Cxc, div.MjjYud, li.b_algo";

static CHALLENGE: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| {
    CHALLENGE_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok().map(|sel| (*s, sel)))
        .collect()
});

static RESULT_NODES: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse(RESULT_NODE_SELECTOR).ok());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSignal {
    Status(u16),
    Selector(&'static str),
    Phrase(&'static str),
}

impl std::fmt::Display for BlockSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockSignal::Status(code) => write!(f, "http status {}", code),
            BlockSignal::Selector(sel) => write!(f, "challenge markup `{}`", sel),
            BlockSignal::Phrase(p) => write!(f, "challenge phrase \"{}\"", p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Blocked(BlockSignal),
    Empty,
    Usable { result_nodes: usize },
}

/// A normalised view of a fetched page.
pub struct PageView {
    status: Option<u16>,
    text: String,
    document: Html,
}

impl PageView {
    pub fn from_http(status: u16, body: &str) -> Self {
        Self::build(Some(status), body)
    }

    /// Rendered DOM from a browser tab; no status code is available.
    pub fn from_dom(html: &str) -> Self {
        Self::build(None, html)
    }

    fn build(status: Option<u16>, html: &str) -> Self {
        let document = Html::parse_document(html);
        let text = document
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Self {
            status,
            text,
            document,
        }
    }

    pub fn document(&self) -> &Html {
        &self.document
    }

    pub fn has_selector(&self, selector: &Selector) -> bool {
        self.document.select(selector).next().is_some()
    }

    pub fn contains_text(&self, phrase: &str) -> bool {
        self.text.contains(phrase)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Detector;

impl Detector {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, page: &PageView) -> Verdict {
        if let Some(code) = page.status {
            if code == 429 || code == 503 {
                return Verdict::Blocked(BlockSignal::Status(code));
            }
        }
        for (name, selector) in CHALLENGE.iter() {
            if page.has_selector(selector) {
                return Verdict::Blocked(BlockSignal::Selector(name));
            }
        }
        for phrase in CHALLENGE_PHRASES {
            if page.contains_text(phrase) {
                return Verdict::Blocked(BlockSignal::Phrase(phrase));
            }
        }

        let result_nodes = RESULT_NODES
            .as_ref()
            .map(|sel| page.document.select(sel).count())
            .unwrap_or(0);
        if result_nodes == 0 {
            Verdict::Empty
        } else {
            Verdict::Usable { result_nodes }
        }
    }

    /// Convenience for raw HTML bodies.
    pub fn classify_html(&self, status: u16, body: &str) -> Verdict {
        self.classify(&PageView::from_http(status, body))
    }
}
