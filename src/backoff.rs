//! Backoff for failed background renewals
//!
//! When a proactive renewal exhausts its retry policy while a still-valid
//! token is cached, the failure is not surfaced to callers. Instead the
//! whole renewal is re-scheduled after a delay governed by the types here,
//! escalating on consecutive failures so a struggling identity platform is
//! not hammered, and resetting as soon as a renewal succeeds.

use std::time::Duration;

/// Configuration for re-scheduling failed background renewals
#[derive(Clone, Debug)]
pub struct RenewalBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: u32,
}

impl Default for RenewalBackoff {
    /// Default backoff configuration
    ///
    /// Starts at 100 ms, doubling on each consecutive failure, capped at
    /// 15 seconds.
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(15),
            multiplier: 2,
        }
    }
}

impl RenewalBackoff {
    /// Constructs a new backoff configuration
    ///
    /// The first failure is delayed by `initial_delay`; each consecutive
    /// failure multiplies the delay by `multiplier`, capped at `max_delay`.
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: multiplier.max(1),
        }
    }

    /// Begins tracking a fresh failure streak
    pub fn delays(&self) -> RenewalDelays {
        RenewalDelays {
            config: self.clone(),
            last_delay: None,
        }
    }
}

/// Stateful tracker of the current failure streak
#[derive(Debug)]
pub struct RenewalDelays {
    config: RenewalBackoff,
    last_delay: Option<Duration>,
}

impl RenewalDelays {
    /// Reports a success, resetting the streak
    pub fn reset(&mut self) {
        self.last_delay = None;
    }

    /// Reports a failure and returns the delay to wait before the next
    /// renewal attempt
    pub fn failure(&mut self) -> Duration {
        let next = match self.last_delay {
            Some(last) => last
                .saturating_mul(self.config.multiplier)
                .min(self.config.max_delay),
            None => self.config.initial_delay,
        };
        self.last_delay = Some(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_escalate_and_cap() {
        let mut delays =
            RenewalBackoff::new(Duration::from_millis(100), Duration::from_millis(350), 2)
                .delays();

        assert_eq!(delays.failure(), Duration::from_millis(100));
        assert_eq!(delays.failure(), Duration::from_millis(200));
        assert_eq!(delays.failure(), Duration::from_millis(350));
        assert_eq!(delays.failure(), Duration::from_millis(350));
    }

    #[test]
    fn success_resets_the_streak() {
        let mut delays = RenewalBackoff::default().delays();

        assert_eq!(delays.failure(), Duration::from_millis(100));
        assert_eq!(delays.failure(), Duration::from_millis(200));

        delays.reset();

        assert_eq!(delays.failure(), Duration::from_millis(100));
    }
}
