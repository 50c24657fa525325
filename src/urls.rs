//! Link helpers shared by the SERP parsers, discovery and scoring.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use url::Url;

/// Hostname of `link`, lowercased and without a leading `www.`.
pub fn host_of(link: &str) -> Option<String> {
    let parsed = Url::parse(link).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Normalises a user-supplied domain (`https://www.Example.com/` -> `example.com`).
pub fn normalize_domain(domain: &str) -> String {
    let trimmed = domain.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    host_of(&candidate).unwrap_or_else(|| trimmed.trim_start_matches("www.").to_ascii_lowercase())
}

/// True when `host` equals, contains, or is contained by `seed`.
pub fn is_self_match(host: &str, seed: &str) -> bool {
    host == seed || host.contains(seed) || seed.contains(host)
}

/// True for hosts belonging to the search engines themselves.
pub fn is_search_engine_host(host: &str) -> bool {
    const ENGINES: &[&str] = &["google.", "bing.", "microsoft.", "gstatic.", "googleusercontent.", "youtube."];
    ENGINES
        .iter()
        .any(|e| host.starts_with(e) || host.contains(&format!(".{}", e)))
}

/// Host of `link` when it can count as a competitor of `seed`.
pub fn competitor_host(link: &str, seed: &str) -> Option<String> {
    let host = host_of(link)?;
    if is_self_match(&host, seed) || is_search_engine_host(&host) {
        None
    } else {
        Some(host)
    }
}

/// Unwraps Bing/Google redirect links to the real destination.
pub fn decode_search_url(link: &str) -> String {
    // Bing: https://www.bing.com/ck/a?...&u=a1aHR0c...
    if link.contains("bing.com/ck/a") {
        if let Ok(parsed) = Url::parse(link) {
            if let Some((_, encoded)) = parsed.query_pairs().find(|(k, _)| k == "u") {
                let payload = encoded.strip_prefix("a1").unwrap_or(&encoded);
                let payload = payload.trim_end_matches('=');
                let decoded = URL_SAFE_NO_PAD
                    .decode(payload)
                    .or_else(|_| STANDARD_NO_PAD.decode(payload));
                if let Ok(bytes) = decoded {
                    if let Ok(target) = String::from_utf8(bytes) {
                        return target;
                    }
                }
            }
        }
    }

    // Google: /url?q=https... or https://www.google.com/url?url=https...
    let is_google_redirect =
        link.starts_with("/url?") || (link.contains("google.") && link.contains("/url?"));
    if is_google_redirect {
        let absolute = if link.starts_with('/') {
            format!("https://www.google.com{}", link)
        } else {
            link.to_string()
        };
        if let Ok(parsed) = Url::parse(&absolute) {
            if let Some((_, target)) = parsed
                .query_pairs()
                .find(|(k, _)| k == "q" || k == "url")
            {
                if target.starts_with("http") {
                    return target.into_owned();
                }
            }
        }
    }

    link.to_string()
}
