//! Retry pacing used by every strategy and by the query pacer.
//!
//! In-strategy retries (next page, fallback request) wait
//! `random(0, base * factor^attempt)` ("full jitter"), for at most
//! `MAX_ATTEMPTS` attempts. Parameters come from the strategy's cost tier.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::models::CostTier;

pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base_ms: u64,
    pub factor: f64,
    pub max_attempts: u32,
    pub cap_ms: u64,
    /// Multiplier on every delay; 0 disables sleeping (tests, dry runs).
    pub scale: f64,
}

impl Backoff {
    pub fn for_tier(tier: CostTier) -> Self {
        let (base_ms, cap_ms) = match tier {
            CostTier::Cheap => (500, 8_000),
            CostTier::Moderate => (1_000, 15_000),
            CostTier::Expensive => (2_000, 30_000),
        };
        Self {
            base_ms,
            factor: 2.0,
            max_attempts: MAX_ATTEMPTS,
            cap_ms,
            scale: 1.0,
        }
    }

    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale = scale.max(0.0);
        self
    }

    /// Upper bound of the jitter window for `attempt` (0-indexed).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let raw = self.base_ms as f64 * self.factor.powi(attempt as i32) * self.scale;
        Duration::from_millis(raw.min(self.cap_ms as f64 * self.scale).max(0.0) as u64)
    }

    /// Full-jitter delay for `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }

    /// Whether another attempt is allowed after `attempt` attempts were made.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Sleeps before retry `attempt`. Returns false once attempts are used up.
    pub async fn wait(&self, attempt: u32) -> bool {
        if !self.allows(attempt) {
            return false;
        }
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
            sleep(delay).await;
        }
        true
    }
}

/// Randomised pause between two distinct queries of one caller.
pub async fn pause_between_queries(range_ms: (u64, u64)) {
    let (min, max) = range_ms;
    if max == 0 {
        return;
    }
    let millis = rand::thread_rng().gen_range(min.min(max)..=max);
    sleep(Duration::from_millis(millis)).await;
}

/// Rolling-window request counter (timestamps within the last `window`).
pub struct SlidingWindow {
    cap: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(cap: usize, window: Duration) -> Self {
        Self {
            cap,
            window,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn hourly(cap: usize) -> Self {
        Self::new(cap, Duration::from_secs(3600))
    }

    fn prune(&self, stamps: &mut VecDeque<Instant>) {
        let now = Instant::now();
        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn count(&self) -> usize {
        let mut stamps = self.stamps.lock();
        self.prune(&mut stamps);
        stamps.len()
    }

    pub fn is_saturated(&self) -> bool {
        self.count() >= self.cap
    }

    /// Records one request. Never refuses; returns false when the cap was
    /// already reached so callers can log the overrun.
    pub fn record(&self, label: &str) -> bool {
        let mut stamps = self.stamps.lock();
        self.prune(&mut stamps);
        let within = stamps.len() < self.cap;
        stamps.push_back(Instant::now());
        if !within {
            warn!(
                label,
                used = stamps.len(),
                cap = self.cap,
                "⚠️ rolling rate window exceeded"
            );
        }
        within
    }
}
