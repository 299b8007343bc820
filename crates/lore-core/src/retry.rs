use chrono::{DateTime, Utc};

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 425 || status == 429 || status >= 500
}

pub fn is_rate_limited_status(status: u16) -> bool {
    status == 429
}

/// Parses a `Retry-After` value given either as (possibly fractional) seconds or as an
/// HTTP date.
pub fn parse_retry_after_ms(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }
    if let Ok(seconds) = raw.parse::<f64>() {
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        return Some((seconds * 1000.0).ceil() as u64);
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at
        .signed_duration_since(Utc::now())
        .num_milliseconds();
    if delay_ms <= 0 {
        return Some(0);
    }
    u64::try_from(delay_ms).ok()
}

/// Fixed-delay retry budget: one initial attempt plus up to `max_retries` retries, each
/// preceded by `delay_ms` (or a longer server-provided delay).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelayRetry {
    pub max_retries: usize,
    pub delay_ms: u64,
}

impl Default for FixedDelayRetry {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl FixedDelayRetry {
    pub fn new(max_retries: usize, delay_ms: u64) -> Self {
        Self {
            max_retries,
            delay_ms,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    /// `attempts_made` counts attempts already performed, including the first one.
    pub fn allows_another_attempt(&self, attempts_made: usize) -> bool {
        attempts_made < self.max_attempts()
    }

    pub fn delay_ms(&self, retry_after_ms: Option<u64>) -> u64 {
        match retry_after_ms {
            Some(retry_after_ms) => self.delay_ms.max(retry_after_ms),
            None => self.delay_ms,
        }
    }
}
