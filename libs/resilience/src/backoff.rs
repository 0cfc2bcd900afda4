use rand::Rng;
use std::time::Duration;
use tokio::time;

/// Exponential backoff with full jitter.
///
/// Each attempt doubles the ceiling up to `cap`; the actual delay is drawn
/// uniformly from `[0, ceiling]` so that a fleet of reconnecting clients does
/// not stampede the server in lockstep.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last `reset`.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Uncapped growth would overflow u64 milliseconds long before the cap
    /// matters; clamp the shift instead.
    fn ceiling(&self) -> Duration {
        let shift = self.attempt.min(20);
        let ceiling_ms = (self.base.as_millis() as u64)
            .saturating_mul(1u64 << shift)
            .min(self.cap.as_millis() as u64);
        Duration::from_millis(ceiling_ms)
    }

    /// Compute the next delay and advance the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let delay_ms = rand::rng().random_range(0..=ceiling.as_millis() as u64);
        let delay = Duration::from_millis(delay_ms);
        tracing::debug!(attempt = self.attempt, delay_ms, "backoff delay computed");
        delay
    }

    /// Sleep for the next delay.
    pub async fn sleep_next(&mut self) {
        time::sleep(self.next_delay()).await;
    }

    /// Forget accumulated attempts after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_never_exceeds_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        for _ in 0..50 {
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_ceiling_growth_and_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        assert_eq!(backoff.ceiling(), Duration::from_millis(500));

        backoff.attempt = 3;
        assert_eq!(backoff.ceiling(), Duration::from_millis(4000));

        backoff.attempt = 12;
        assert_eq!(backoff.ceiling(), Duration::from_secs(30));

        // Far past the clamp point nothing overflows.
        backoff.attempt = u32::MAX;
        assert_eq!(backoff.ceiling(), Duration::from_secs(30));
    }

    #[test]
    fn test_reset_restarts_the_schedule() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert_eq!(backoff.attempt(), 5);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.ceiling(), Duration::from_millis(500));
    }
}
