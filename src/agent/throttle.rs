//! Rate limiting of logpoint output.
//!
//! Each logpoint counts emitted messages in a one-second window. When the count reaches
//! the limit, the logpoint is suspended for `log_delay_seconds`. Re-enabling is done by
//! the caller with a timer (see [`crate::agent::timer`]), after it checks that the
//! breakpoint still exists.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    /// Zero means no limit.
    pub max_logs_per_second: u32,
    pub log_delay_seconds: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_logs_per_second: 50,
            log_delay_seconds: 1,
        }
    }
}

/// What to do with a logpoint after a message is emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Continue,
    /// Rate limit reached, listener must be disabled until the given instant.
    Suspend { until: Duration },
}

#[derive(Clone, Debug)]
pub struct LogPointThrottle {
    max_per_window: u32,
    delay: Duration,
    window_end: Duration,
    count_in_window: u32,
    suppressed_until: Option<Duration>,
}

impl LogPointThrottle {
    pub fn new(config: &LogConfig) -> Self {
        Self {
            max_per_window: config.max_logs_per_second,
            delay: Duration::from_secs(config.log_delay_seconds),
            window_end: Duration::ZERO,
            count_in_window: 0,
            suppressed_until: None,
        }
    }

    /// Register a hit at monotonic instant `now`. Return true if a message may be emitted.
    pub fn admit(&mut self, now: Duration) -> bool {
        if self.suppressed_until.is_some() {
            return false;
        }
        if now > self.window_end || self.window_end.is_zero() {
            self.count_in_window = 0;
            self.window_end = now + WINDOW;
        }
        self.max_per_window == 0 || self.count_in_window < self.max_per_window
    }

    /// Account a message emitted at monotonic instant `now`.
    pub fn record(&mut self, now: Duration) -> Decision {
        self.count_in_window += 1;
        if self.max_per_window > 0 && self.count_in_window >= self.max_per_window {
            let until = now.saturating_add(self.delay);
            self.suppressed_until = Some(until);
            return Decision::Suspend { until };
        }
        Decision::Continue
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed_until.is_some()
    }

    pub fn suppressed_until(&self) -> Option<Duration> {
        self.suppressed_until
    }

    /// Lift suspension.
    pub fn reenable(&mut self) {
        self.suppressed_until = None;
    }
}
