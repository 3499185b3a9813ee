use std::time::Duration;

/// Exponential reconnect schedule: `base`, doubled per consecutive failure,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    /// Consecutive failed reconnects allowed before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub const fn unbounded() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }

    pub const fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::unbounded()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Failed reconnects since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next reconnect, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.policy.max_attempts.is_some_and(|max| self.attempt >= max) {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.attempt = self.attempt.saturating_add(1);
        Some(self.policy.base.saturating_mul(factor).min(self.policy.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(delays: impl Iterator<Item = Option<Duration>>) -> Vec<Option<u64>> {
        delays.map(|d| d.map(|d| d.as_secs())).collect()
    }

    #[test]
    fn doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(RetryPolicy::unbounded());
        let delays = secs((0..8).map(|_| backoff.next_delay()));
        assert_eq!(delays, [1, 2, 4, 8, 16, 30, 30, 30].map(Some));
    }

    #[test]
    fn bounded_policy_gives_up() {
        let mut backoff = Backoff::new(RetryPolicy::bounded(5));
        let delays = secs((0..7).map(|_| backoff.next_delay()));
        assert_eq!(delays, vec![Some(1), Some(2), Some(4), Some(8), Some(16), None, None]);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(RetryPolicy::bounded(2));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn huge_attempt_counts_stay_capped() {
        let mut backoff = Backoff::new(RetryPolicy::unbounded());
        backoff.attempt = 40;
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(30)));
    }
}
