//! Reconnect policy shared by the bus and broker transports.
//!
//! Both clients are wrapped in a connect → stream → on error, back off →
//! reconnect loop by their adapters. The delay schedule lives here so the
//! two transports behave identically under network churn.

use std::time::Duration;

/// Largest accepted jitter, in percent of the nominal delay.
pub const MAX_JITTER_PERCENT: u8 = 100;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Backoff policy for transport reconnection.
///
/// The nominal delay before attempt `n + 1` is
/// `initial_delay * multiplier^n`, capped at `max_delay`. Each delay is then
/// spread by up to `jitter_percent` either way, so displays sharing a
/// broker do not all reconnect in the same instant after it restarts. The
/// spread is derived from the attempt number, which keeps schedules
/// reproducible in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Nominal delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on any delay, jitter included. Default: 30s.
    pub max_delay: Duration,

    /// Growth factor between consecutive attempts. Default: 2.
    /// `1` gives a constant delay.
    pub multiplier: u32,

    /// Spread applied to each delay, in percent. Default: 25.
    pub jitter_percent: u8,

    /// Maximum consecutive failed attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            jitter_percent: 25,
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Whether `attempt` failed attempts exhaust the retry budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries.is_some_and(|max| attempt >= max)
    }

    /// Delay to wait after `attempt` consecutive failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        let growth = self.multiplier.max(1).saturating_pow(attempt);
        let nominal = self.initial_delay.saturating_mul(growth).min(self.max_delay);
        (nominal.saturating_mul(self.spread_percent(attempt)) / 100).min(self.max_delay)
    }

    /// A percentage in `100 - jitter ..= 100 + jitter`, scattered across
    /// attempts by a multiplicative hash.
    fn spread_percent(&self, attempt: u32) -> u32 {
        let jitter = u32::from(self.jitter_percent.min(MAX_JITTER_PERCENT));
        if jitter == 0 {
            return 100;
        }
        let span = 2 * jitter + 1;
        let scatter = attempt.wrapping_mul(0x9E37_79B1).rotate_right(16) % span;
        100 - jitter + scatter
    }
}

// ── Tests ────────────────────────────────────────────────────────────
