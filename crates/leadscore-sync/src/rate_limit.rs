//! Upstream rate-limit detection and the pool-wide pause gate.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Longest single sleep while waiting on the gate; the deadline is rechecked after each.
const WAIT_TICK: Duration = Duration::from_secs(5);

const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "quota",
    "resource_exhausted",
];

const RETRY_HINTS: &[&str] = &["retry after", "retry-after", "retrydelay", "retry in"];

/// Recognize a rate-limit failure by its message and extract the suggested pause.
///
/// Returns `None` for anything that is not a rate limit. When the message carries no
/// usable retry hint the pause defaults to [`DEFAULT_RETRY_AFTER`].
pub fn detect_rate_limit(message: &str) -> Option<Duration> {
    let lowered = message.to_lowercase();
    if !RATE_LIMIT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return None;
    }
    let hinted = RETRY_HINTS
        .iter()
        .find_map(|hint| seconds_after(&lowered, hint))
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);
    Some(hinted.unwrap_or(DEFAULT_RETRY_AFTER))
}

/// First integer that follows `marker`, allowing a few separator characters in between.
fn seconds_after(haystack: &str, marker: &str) -> Option<u64> {
    let start = haystack.find(marker)? + marker.len();
    let rest = haystack[start..]
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '=' | '"' | '\''));
    let digits = rest
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>();
    digits.parse().ok()
}

/// Shared pause deadline. Workers trip it; the scheduler checks it before each batch.
#[derive(Debug, Default)]
pub struct RateLimitGate {
    paused_until: Mutex<Option<Instant>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause new dispatches for `retry_after`. An existing later deadline is kept.
    pub async fn trip(&self, retry_after: Duration) {
        let deadline = Instant::now() + retry_after;
        let mut paused_until = self.paused_until.lock().await;
        match *paused_until {
            Some(current) if current >= deadline => {}
            _ => {
                warn!(
                    retry_after_secs = retry_after.as_secs(),
                    "upstream rate limit hit; pausing new batches"
                );
                *paused_until = Some(deadline);
            }
        }
    }

    pub async fn remaining(&self) -> Option<Duration> {
        let paused_until = self.paused_until.lock().await;
        paused_until
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    pub async fn is_paused(&self) -> bool {
        self.remaining().await.is_some()
    }

    pub async fn clear(&self) {
        *self.paused_until.lock().await = None;
    }

    /// Block until the gate is open. Returns how long was spent waiting.
    pub async fn wait_until_clear(&self) -> Duration {
        let started = Instant::now();
        let mut announced = false;
        while let Some(left) = self.remaining().await {
            if !announced {
                info!(seconds = left.as_secs(), "waiting for rate-limit pause to lapse");
                announced = true;
            } else {
                debug!(seconds = left.as_secs(), "rate-limit pause countdown");
            }
            sleep(left.min(WAIT_TICK)).await;
        }
        if announced {
            self.clear().await;
        }
        started.elapsed()
    }
}
