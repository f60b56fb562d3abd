//! Retry configuration with jitter support.

use rand::Rng;
use std::time::Duration;

/// Retry policy for transient I/O failures.
///
/// **Important**: Retries are only safe for idempotent operations:
/// - `exists` / `get_file` probes: always safe to retry
/// - `put_file_if_not_exists`: safe (a replayed write is a no-op)
/// - Plain `put_file`: callers must ensure the write is idempotent
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Additional attempts after the first failure.
    pub retry_limit: u32,
    /// Wait between attempts.
    pub retry_wait: Duration,
    /// Jitter mode applied to the wait (prevents thundering herd)
    pub jitter: JitterMode,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            retry_wait: Duration::from_secs(1),
            jitter: JitterMode::None,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry limit
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Set the wait between attempts
    pub fn with_retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = wait;
        self
    }

    /// Set jitter mode
    pub fn with_jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check if another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.retry_limit
    }

    /// The wait before the next attempt, with jitter applied
    pub fn delay(&self) -> Duration {
        apply_jitter(self.retry_wait, &self.jitter)
    }
}

/// Jitter mode for retry waits (following AWS SDK patterns).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum JitterMode {
    /// No jitter - use the exact configured wait
    #[default]
    None,
    /// Full jitter: random delay between 0 and the configured wait
    Full,
    /// Equal jitter: half fixed + half random
    Equal,
}

/// Apply jitter to a wait duration.
pub fn apply_jitter(delay: Duration, mode: &JitterMode) -> Duration {
    let mut rng = rand::thread_rng();

    match mode {
        JitterMode::None => delay,
        JitterMode::Full => {
            // Random between 0 and delay
            Duration::from_secs_f64(rng.gen::<f64>() * delay.as_secs_f64())
        }
        JitterMode::Equal => {
            // Half fixed + half random
            let half = delay.as_secs_f64() / 2.0;
            Duration::from_secs_f64(half + rng.gen::<f64>() * half)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_budget() {
        let config = RetryConfig::new().with_retry_limit(2);
        assert!(config.should_retry(0));
        assert!(config.should_retry(1));
        assert!(!config.should_retry(2));

        let none = RetryConfig::new().with_retry_limit(0);
        assert!(!none.should_retry(0));
    }

    #[test]
    fn no_jitter_is_exact() {
        let config = RetryConfig::new()
            .with_retry_wait(Duration::from_millis(250))
            .with_jitter(JitterMode::None);
        assert_eq!(config.delay(), Duration::from_millis(250));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let wait = Duration::from_millis(100);
        for _ in 0..100 {
            let full = apply_jitter(wait, &JitterMode::Full);
            assert!(full <= wait);

            let equal = apply_jitter(wait, &JitterMode::Equal);
            assert!(equal >= wait / 2);
            assert!(equal <= wait);
        }
    }
}
