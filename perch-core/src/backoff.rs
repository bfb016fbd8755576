//! Retry pacing between engine attempts.

use std::time::Duration;

/// Stateful generator of successive retry delays.
///
/// The single strategy-style pluggable point of the engines: callers who
/// need bespoke pacing implement this and hand it to the engine config.
pub trait BackoffPolicy: Send {
    /// Produces the next delay and advances the generator.
    fn next_delay(&mut self) -> Duration;

    /// Rewinds the generator to its initial interval.
    fn reset(&mut self);
}

/// Randomized exponential backoff with no terminal elapsed-time cap.
///
/// Each delay is drawn uniformly from
/// `current * [1 - randomization, 1 + randomization]`, after which the
/// current interval grows by `multiplier` up to `max_interval`. The
/// generator never gives up; stopping is the caller's concern.
pub struct ExponentialBackoff {
    initial_interval: Duration,
    multiplier: f64,
    randomization_factor: f64,
    max_interval: Duration,
    current: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        let initial_interval = Duration::from_millis(500);
        Self {
            initial_interval,
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_interval: Duration::from_secs(60),
            current: initial_interval,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self.current = interval;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let spread = self.randomization_factor * (2.0 * rand::random::<f64>() - 1.0);
        let delay = self.current.mul_f64(1.0 + spread);
        let next = self.current.mul_f64(self.multiplier);
        self.current = next.min(self.max_interval);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial_interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_jitter_bounds() {
        let mut backoff = ExponentialBackoff::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_randomization_factor(0.5);
        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(50));
        assert!(delay <= Duration::from_millis(150));
    }

    #[test]
    fn intervals_grow_up_to_the_cap() {
        let mut backoff = ExponentialBackoff::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(Duration::from_millis(350));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
    }

    #[test]
    fn reset_rewinds_to_the_initial_interval() {
        let mut backoff = ExponentialBackoff::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_multiplier(3.0)
            .with_randomization_factor(0.0);

        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
