use std::time::Duration;

use rand::Rng;

/// Delay before the first reconnect of an episode.
pub const DEFAULT_FLOOR: Duration = Duration::from_millis(1_000);
/// Upper bound of the nominal delay.
pub const DEFAULT_CEILING: Duration = Duration::from_secs(30);
/// Spread applied around each sleep, as a fraction of the nominal delay.
pub const DEFAULT_JITTER: f64 = 0.2;

/// Reconnect timing of a session link.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// First nominal delay of an episode.
    pub floor: Duration,
    /// Largest nominal delay.
    pub ceiling: Duration,
    /// `0.0` disables jitter, as do negative and non-finite values; capped at `1.0`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: DEFAULT_FLOOR,
            ceiling: DEFAULT_CEILING,
            jitter: DEFAULT_JITTER,
        }
    }
}

/// Doubling backoff with a ceiling.
///
/// [`Backoff::next_delay`] yields the nominal sequence `floor * 2^(k-1)` capped at the
/// ceiling; jitter only affects the sleep returned by [`Backoff::jittered`].
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Start at the floor.
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.floor.min(config.ceiling);
        Self {
            config,
            current,
            attempts: 0,
        }
    }

    /// Nominal delay of the next retry; doubles the stored delay for the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempts = self.attempts.saturating_add(1);
        self.current = self
            .current
            .checked_mul(2)
            .unwrap_or(self.config.ceiling)
            .min(self.config.ceiling);
        delay
    }

    /// Randomize `nominal` by up to ±jitter.
    pub fn jittered(&self, nominal: Duration) -> Duration {
        let jitter = self.config.jitter;
        if !jitter.is_finite() || jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let jitter = jitter.min(1.0);
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        nominal.mul_f64(factor)
    }

    /// Back to the floor; called when a connection opens.
    pub fn reset(&mut self) {
        self.current = self.config.floor.min(self.config.ceiling);
        self.attempts = 0;
    }

    /// Delay the next retry would use.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_the_floor() {
        let mut backoff = Backoff::default();
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            [1_000, 2_000, 4_000, 8_000, 16_000].map(Duration::from_millis)
        );
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn delays_stop_at_the_ceiling() {
        let mut backoff = Backoff::default();
        let delays: Vec<_> = (0..8).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[5], Duration::from_secs(30));
        assert_eq!(delays[7], Duration::from_secs(30));
    }

    #[test]
    fn reset_returns_to_the_floor() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.current(), DEFAULT_FLOOR);
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), DEFAULT_FLOOR);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = Backoff::default();
        let nominal = Duration::from_secs(10);
        for _ in 0..100 {
            let delay = backoff.jittered(nominal);
            assert!(delay >= Duration::from_secs(8), "{delay:?}");
            assert!(delay <= Duration::from_secs(12), "{delay:?}");
        }
    }

    #[test]
    fn zero_jitter_keeps_the_nominal_delay() {
        let backoff = Backoff::new(BackoffConfig {
            jitter: 0.0,
            ..BackoffConfig::default()
        });
        assert_eq!(
            backoff.jittered(Duration::from_millis(1_500)),
            Duration::from_millis(1_500)
        );
    }

    #[test]
    fn unusable_jitter_keeps_the_nominal_delay() {
        for jitter in [f64::NAN, f64::INFINITY, -0.5] {
            let backoff = Backoff::new(BackoffConfig {
                jitter,
                ..BackoffConfig::default()
            });
            assert_eq!(
                backoff.jittered(Duration::from_millis(800)),
                Duration::from_millis(800)
            );
        }
    }
}
