//! Exponential backoff with additive jitter for transient storage conflicts

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Source of the random component added to each backoff step.
///
/// Returns a value in `[0, max)`.
pub trait JitterSource: Send + Sync {
    fn jitter(&self, max: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandJitter;

impl JitterSource for RandJitter {
    fn jitter(&self, max: Duration) -> Duration {
        let max_ms = max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

/// Always returns the same fraction of the allowed range
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn jitter(&self, max: Duration) -> Duration {
        max.mul_f64(self.0.clamp(0.0, 1.0))
    }
}

#[derive(Clone)]
pub struct BackoffPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    jitter: Arc<dyn JitterSource>,
}

impl std::fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

impl BackoffPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            jitter: Arc::new(RandJitter),
        }
    }

    pub fn with_jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    /// `base * 2^attempt`, without jitter
    pub fn step(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Delay before retrying after failed attempt number `attempt` (0-based):
    /// `step(attempt) + uniform(0, step(attempt))`
    pub fn delay(&self, attempt: u32) -> Duration {
        let step = self.step(attempt);
        step + self.jitter.jitter(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_double() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(50));
        assert_eq!(policy.step(0), Duration::from_millis(50));
        assert_eq!(policy.step(1), Duration::from_millis(100));
        assert_eq!(policy.step(2), Duration::from_millis(200));
        assert_eq!(policy.step(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_stays_within_jitter_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..4 {
            let step = policy.step(attempt);
            for _ in 0..50 {
                let delay = policy.delay(attempt);
                assert!(delay >= step && delay < step * 2, "{delay:?} outside [{step:?}, {:?})", step * 2);
            }
        }
    }

    #[test]
    fn test_fixed_jitter_is_deterministic() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(100)).with_jitter(FixedJitter(0.5));
        assert_eq!(policy.delay(0), Duration::from_millis(150));
        assert_eq!(policy.delay(1), Duration::from_millis(300));

        let none = BackoffPolicy::new(3, Duration::from_millis(100)).with_jitter(FixedJitter(0.0));
        assert_eq!(none.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_zero_base_never_sleeps() {
        let policy = BackoffPolicy::new(3, Duration::ZERO);
        assert_eq!(policy.delay(2), Duration::ZERO);
    }
}
