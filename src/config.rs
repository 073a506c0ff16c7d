use std::time::Duration;

use thiserror::Error;

use crate::backoff::RenewalBackoff;
use crate::clock::UnixMillis;
use crate::tokens::Token;

/// An invalid manager configuration value
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The expiration refresh ratio was outside the half-open interval (0, 1]
    #[error("expiration refresh ratio must be within (0, 1], got {0}")]
    RefreshRatio(f64),
}

/// Governs how a single issuance attempt sequence is retried
///
/// The policy is stateless across renewal cycles: every acquisition starts
/// from the first attempt again. The default is a fixed delay between
/// attempts; a multiplier greater than one opts in to exponential backoff.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    backoff_multiplier: u32,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Default retry policy
    ///
    /// Up to 3 attempts with a fixed 3 ms delay between them.
    fn default() -> Self {
        Self::new(3, Duration::from_millis(3))
    }
}

impl RetryPolicy {
    /// Constructs a fixed-delay retry policy
    ///
    /// `max_attempts` is clamped to at least one attempt.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff_multiplier: 1,
            max_delay: Duration::from_secs(15),
        }
    }

    /// Opts in to exponential backoff between attempts
    ///
    /// The delay before attempt `n + 1` becomes `delay * multiplier^(n - 1)`,
    /// capped at `max_delay`. A multiplier of 1 keeps the delay fixed.
    pub fn with_backoff(mut self, multiplier: u32, max_delay: Duration) -> Self {
        self.backoff_multiplier = multiplier.max(1);
        self.max_delay = max_delay;
        self
    }

    /// The maximum number of issuance attempts per acquisition
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The delay to wait after `failed_attempts` consecutive failures
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1);
        let factor = self.backoff_multiplier.saturating_pow(exponent);
        self.delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Configuration for a [`TokenManager`][crate::TokenManager]
///
/// The renewal point for a token is the earlier of the ratio point
/// (`lifetime * expiration_refresh_ratio` after issuance) and the fixed
/// bound (`lower_refresh_bound` before expiry), clamped to never be in the
/// past.
#[derive(Clone, Debug)]
pub struct TokenManagerConfig {
    expiration_refresh_ratio: f64,
    lower_refresh_bound: Duration,
    issuance_timeout: Duration,
    retry_policy: RetryPolicy,
    renewal_backoff: RenewalBackoff,
}

impl Default for TokenManagerConfig {
    /// Default manager configuration
    ///
    /// Renews at 80% of a token's lifetime with no lower bound, bounds each
    /// issuance attempt at 100 ms, and uses the default retry policy and
    /// renewal backoff.
    fn default() -> Self {
        Self {
            expiration_refresh_ratio: 0.8,
            lower_refresh_bound: Duration::ZERO,
            issuance_timeout: Duration::from_millis(100),
            retry_policy: RetryPolicy::default(),
            renewal_backoff: RenewalBackoff::default(),
        }
    }
}

impl TokenManagerConfig {
    /// Sets the fraction of a token's lifetime after which renewal is
    /// triggered
    pub fn with_expiration_refresh_ratio(mut self, ratio: f64) -> Result<Self, ConfigError> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::RefreshRatio(ratio));
        }
        self.expiration_refresh_ratio = ratio;
        Ok(self)
    }

    /// Sets the minimum time before expiry at which renewal must happen
    /// regardless of the ratio
    pub fn with_lower_refresh_bound(mut self, bound: Duration) -> Self {
        self.lower_refresh_bound = bound;
        self
    }

    /// Sets the maximum wait for a single issuer call
    pub fn with_issuance_timeout(mut self, timeout: Duration) -> Self {
        self.issuance_timeout = timeout;
        self
    }

    /// Sets the retry policy for issuance attempt sequences
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the backoff applied when a background renewal exhausts its
    /// retries
    pub fn with_renewal_backoff(mut self, backoff: RenewalBackoff) -> Self {
        self.renewal_backoff = backoff;
        self
    }

    /// The maximum wait for a single issuer call
    #[inline]
    pub fn issuance_timeout(&self) -> Duration {
        self.issuance_timeout
    }

    /// The retry policy for issuance attempt sequences
    #[inline]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub(crate) fn renewal_backoff(&self) -> &RenewalBackoff {
        &self.renewal_backoff
    }

    /// The delay after issuance at which the token should be renewed
    ///
    /// Computed as the earlier of the ratio point and the fixed bound before
    /// expiry. The result is zero, meaning renew immediately, whenever the
    /// bound exceeds the token's whole lifetime.
    pub fn next_renewal_delay(&self, token: &Token) -> Duration {
        let lifetime = token.lifetime();
        let ratio_point = lifetime.mul_f64(self.expiration_refresh_ratio);
        let bound_point = lifetime.saturating_sub(self.lower_refresh_bound);
        ratio_point.min(bound_point)
    }

    /// How long from `now` until the token should be renewed
    pub fn next_renewal_in(&self, token: &Token, now: UnixMillis) -> Duration {
        let renew_at = token.issued_at() + self.next_renewal_delay(token);
        renew_at.saturating_since(now)
    }
}
