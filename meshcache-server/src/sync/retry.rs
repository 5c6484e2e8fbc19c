use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter for failed sync deliveries
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// True once `retry_count` retries have been used up
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count > self.max_retries
    }

    /// Backoff ceiling for the given retry (1-based): base * 2^(n-1), capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Backoff with jitter drawn from [ceiling / 2, ceiling]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ceiling = self.backoff(retry).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::rng().random_range(ceiling / 2..=ceiling);
        Duration::from_millis(jittered)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1));
        for _ in 0..100 {
            let d = policy.delay_for(2);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(10));
        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));

        let none = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert!(none.is_exhausted(1));
        assert_eq!(none.delay_for(1), Duration::ZERO);
    }
}
