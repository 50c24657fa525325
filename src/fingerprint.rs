use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.2420.65",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
        "Mozilla/5.0 (iPad; CPU OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    ]
});

/// Ordered from most common to least; later attempts draw from a wider slice.
const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.8,en-US;q=0.7",
    "en-US,en;q=0.8,fr;q=0.5",
    "en-CA,en;q=0.9,fr-CA;q=0.8",
    "en-US,en;q=0.9,es;q=0.4",
    "en-AU,en;q=0.9",
    "en-US,en;q=0.7,de;q=0.3",
];

const ACCEPT_ENCODINGS: &[&str] = &["gzip, deflate, br", "gzip, deflate", "br, gzip"];

const TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Chicago",
    "America/Los_Angeles",
    "Europe/London",
    "America/Toronto",
    "Australia/Sydney",
];

const BASE_TIMEOUT_MS: u64 = 20_000;
const TIMEOUT_STEP_MS: u64 = 5_000;

/// JS injected before any page script in browser strategies.
pub const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 4 });
    const originalToDataURL = HTMLCanvasElement.prototype.toDataURL;
    HTMLCanvasElement.prototype.toDataURL = function(...args) {
        if (this.width > 0 && this.height > 0) {
            const context = this.getContext('2d');
            if (context) {
                const imageData = context.getImageData(0, 0, this.width, this.height);
                if (imageData.data.length > 3) {
                    imageData.data[3] = Math.max(0, Math.min(255, imageData.data[3] + (Math.random() > 0.5 ? 1 : -1)));
                    context.putImageData(imageData, 0, 0);
                }
            }
        }
        return originalToDataURL.apply(this, args);
    };
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(parameter) {
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter.apply(this, [parameter]);
    };
    window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };
    ['RTCPeerConnection', 'webkitRTCPeerConnection', 'mozRTCPeerConnection', 'msRTCPeerConnection'].forEach(className => {
        if (window[className]) window[className] = undefined;
    });
"#;

/// A randomized request identity for one attempt.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub timeout_ms: u64,
}

impl Identity {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn accept_language(&self) -> &str {
        self.header("Accept-Language").unwrap_or("en-US,en;q=0.9")
    }

    pub fn platform(&self) -> Option<&str> {
        self.header("sec-ch-ua-platform").map(|p| p.trim_matches('"'))
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityGenerator;

impl IdentityGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn user_agents() -> &'static [&'static str] {
        &USER_AGENTS
    }

    /// Builds the identity for retry number `attempt` (0 = first try).
    ///
    /// The pools drawn from widen and more optional headers are toggled as
    /// `attempt` grows, so retries do not converge on one fingerprint.
    pub fn next_identity(&self, attempt: u32) -> Identity {
        let mut rng = rand::thread_rng();
        let user_agent = USER_AGENTS
            .choose(&mut rng)
            .copied()
            .unwrap_or("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36");

        let spread = (1 + 2 * attempt as usize).min(ACCEPT_LANGUAGES.len());
        let language = ACCEPT_LANGUAGES[..spread]
            .choose(&mut rng)
            .copied()
            .unwrap_or(ACCEPT_LANGUAGES[0]);
        let encoding = if attempt == 0 {
            ACCEPT_ENCODINGS[0]
        } else {
            ACCEPT_ENCODINGS.choose(&mut rng).copied().unwrap_or(ACCEPT_ENCODINGS[0])
        };

        let mut headers = vec![
            ("User-Agent".to_string(), user_agent.to_string()),
            (
                "Accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8".to_string(),
            ),
            ("Accept-Language".to_string(), language.to_string()),
            ("Accept-Encoding".to_string(), encoding.to_string()),
            ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
        ];

        if let Some(platform) = platform_hint(user_agent) {
            headers.push(("sec-ch-ua-platform".to_string(), format!("\"{}\"", platform)));
            if platform == "iOS" || platform == "Android" {
                headers.push(("sec-ch-ua-mobile".to_string(), "?1".to_string()));
            }
        }
        if let Some(brand) = brand_hint(user_agent) {
            headers.push(("sec-ch-ua".to_string(), brand));
        }

        // Optional headers: none on the first try, a growing random subset after.
        let optional: [(&str, &[&str]); 6] = [
            ("Sec-Fetch-Dest", &["document"]),
            ("Sec-Fetch-Mode", &["navigate"]),
            ("Sec-Fetch-Site", &["none", "same-origin"]),
            ("DNT", &["1", "0"]),
            ("Cache-Control", &["max-age=0", "no-cache"]),
            ("X-Timezone-Hint", TIMEZONES),
        ];
        let toggle_probability = (attempt as f64 * 0.25).min(0.9);
        for (name, values) in optional {
            if attempt > 0 && rng.gen_bool(toggle_probability) {
                if let Some(value) = values.choose(&mut rng) {
                    headers.push((name.to_string(), value.to_string()));
                }
            }
        }

        Identity {
            user_agent: user_agent.to_string(),
            headers,
            timeout_ms: BASE_TIMEOUT_MS + TIMEOUT_STEP_MS * attempt as u64,
        }
    }
}

fn platform_hint(user_agent: &str) -> Option<&'static str> {
    if user_agent.contains("Windows") {
        Some("Windows")
    } else if user_agent.contains("iPhone") || user_agent.contains("iPad") {
        Some("iOS")
    } else if user_agent.contains("Macintosh") {
        Some("macOS")
    } else if user_agent.contains("Android") {
        Some("Android")
    } else if user_agent.contains("Linux") {
        Some("Linux")
    } else {
        None
    }
}

fn brand_hint(user_agent: &str) -> Option<String> {
    let major = |marker: &str| {
        user_agent
            .split(marker)
            .nth(1)
            .and_then(|rest| rest.split('.').next())
            .map(str::to_string)
    };
    if user_agent.contains("Chrome/") {
        let version = major("Chrome/")?;
        Some(format!(
            "\"Google Chrome\";v=\"{v}\", \"Chromium\";v=\"{v}\", \"Not.A/Brand\";v=\"24\"",
            v = version
        ))
    } else {
        None
    }
}
