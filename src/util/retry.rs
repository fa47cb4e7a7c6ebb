use rand::{thread_rng, Rng};
use std::time::Duration;

/// Bounded exponential backoff with optional jitter.
///
/// A policy is immutable; each retried operation takes its own
/// [`RetryHandle`] so concurrent callers never share attempt counters.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter_fraction: f64,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: None,
            jitter_fraction: 0.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = if max_delay.is_zero() {
            None
        } else {
            Some(max_delay)
        };
        self
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.max(0.0);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn handle(&self) -> RetryHandle {
        RetryHandle {
            policy: self.clone(),
            attempts: 0,
        }
    }

    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let shift = attempt.saturating_sub(1).min(31);
        let factor = 1u128 << shift;
        let scaled = self.base_delay.as_millis().saturating_mul(factor);
        let raw = Duration::from_millis(scaled.min(u128::from(u64::MAX)) as u64);
        let bounded = match self.max_delay {
            Some(max) => raw.min(max),
            None => raw,
        };
        if bounded.is_zero() || self.jitter_fraction <= 0.0 {
            return bounded;
        }
        let jitter = self.jitter_fraction.min(1.0);
        let factor = thread_rng().gen_range((1.0 - jitter).max(0.0)..=1.0 + jitter);
        let jittered = (bounded.as_millis() as f64 * factor).round().max(0.0);
        Duration::from_millis(jittered.min(u128::from(u64::MAX) as f64) as u64)
    }
}

/// Per-operation attempt counter for a [`RetryPolicy`].
pub struct RetryHandle {
    policy: RetryPolicy,
    attempts: usize,
}

impl RetryHandle {
    /// Returns the delay before the next attempt, or `None` once the
    /// attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts + 1 >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.delay_for_attempt(self.attempts))
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::RetryPolicy;
    use std::time::Duration;

    #[test]
    fn exhausts_after_max_attempts() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(1));
        let mut handle = policy.handle();
        assert!(handle.next_delay().is_some());
        assert!(handle.next_delay().is_some());
        assert!(handle.next_delay().is_none());
        assert_eq!(handle.attempts(), 2);
    }

    #[test]
    fn delays_grow_and_respect_cap() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(25));
        let mut handle = policy.handle();
        let first = handle.next_delay().expect("first delay");
        let second = handle.next_delay().expect("second delay");
        let third = handle.next_delay().expect("third delay");
        assert_eq!(first, Duration::from_millis(10));
        assert_eq!(second, Duration::from_millis(20));
        assert_eq!(third, Duration::from_millis(25));
    }

    #[test]
    fn single_attempt_policy_never_delays() {
        let policy = RetryPolicy::exponential(1, Duration::from_millis(10));
        let mut handle = policy.handle();
        assert!(handle.next_delay().is_none());
    }
}
