//! Retry backoff with jitter
//!
//! Exponential backoff for transient provider errors. Jitter spreads
//! retries from concurrent workers so a rate-limited provider is not hit
//! by a synchronized thundering herd.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    /// Creates a schedule with the given base delay and cap
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// Delay before retry number `attempt` (0-based)
    ///
    /// Without jitter: `base * 2^attempt`, capped at `max`. With jitter,
    /// a uniformly random delay up to that bound.
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    /// Deterministic variant for tests: caller supplies the RNG
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let delay_ms = if self.jitter { rng.gen_range(0..=exp) } else { exp };
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_without_jitter_is_exponential() {
        let backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(800),
            false,
        );
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            backoff.delay_with_rng(0, &mut rng),
            Duration::from_millis(100)
        );
        assert_eq!(
            backoff.delay_with_rng(1, &mut rng),
            Duration::from_millis(200)
        );
        assert_eq!(
            backoff.delay_with_rng(2, &mut rng),
            Duration::from_millis(400)
        );
        assert_eq!(
            backoff.delay_with_rng(3, &mut rng),
            Duration::from_millis(800)
        );
        // Capped beyond the max
        assert_eq!(
            backoff.delay_with_rng(9, &mut rng),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn test_with_jitter_is_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), true);
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 0..8 {
            assert!(backoff.delay_with_rng(attempt, &mut rng) <= Duration::from_millis(800));
        }
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), false);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            backoff.delay_with_rng(u32::MAX, &mut rng),
            Duration::from_secs(60)
        );
    }
}
