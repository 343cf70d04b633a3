//! Reconnect backoff: exponential delay with jitter and an attempt cap.

use std::time::Duration;

/// When and how often the session retries after losing its connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap for any single delay.
    pub max_delay: Duration,
    /// Jitter ratio (0.0..=1.0) applied symmetrically to each delay.
    pub jitter_ratio: f64,
    /// Consecutive attempts before giving up; None retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.2,
            max_attempts: Some(10),
        }
    }
}

impl ReconnectPolicy {
    /// Whether reconnect attempt number `attempt` (1-based) may run.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }

    /// Exponential delay for the given attempt (1-based), before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Spread `delay` uniformly over `delay ± delay * jitter_ratio`.
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let millis = delay.as_millis() as f64;
        let spread = millis * ratio;
        let low = (millis - spread).max(0.0);
        let high = millis + spread;
        Duration::from_millis((low + random_unit() * (high - low)).round() as u64)
    }

    /// Jittered delay for the given attempt.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.with_jitter(self.backoff_delay(attempt))
    }
}

/// Uniform sample in [0, 1) from OS randomness; 0.5 if the OS source fails.
fn random_unit() -> f64 {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0.5;
    }
    (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter_ratio: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = policy(None);
        assert_eq!(p.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(p.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(p.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(p.backoff_delay(4), Duration::from_millis(500));
        assert_eq!(p.backoff_delay(200), Duration::from_millis(500));
        assert_eq!(p.next_delay(2), Duration::from_millis(200));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let p = policy(Some(3));
        assert!(p.should_retry(1));
        assert!(p.should_retry(3));
        assert!(!p.should_retry(4));
        assert!(policy(None).should_retry(u32::MAX));
    }

    #[test]
    fn jitter_stays_in_range() {
        let p = ReconnectPolicy {
            jitter_ratio: 0.25,
            ..policy(None)
        };
        for _ in 0..200 {
            let d = p.with_jitter(Duration::from_millis(1_000));
            assert!(d >= Duration::from_millis(750), "{:?}", d);
            assert!(d <= Duration::from_millis(1_250), "{:?}", d);
        }
    }
}
