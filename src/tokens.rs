use std::time::Duration;

use crate::clock::UnixMillis;
use crate::{AccessToken, AccessTokenRef};

/// A token issued by the identity platform, with its lifetime information
///
/// Tokens are immutable: a renewal produces a new `Token` that supersedes
/// the previous one, it never edits it in place. The expiry is strictly
/// later than the issuance time by construction.
#[derive(Debug)]
pub struct Token {
    credential: AccessToken,
    issued_at: UnixMillis,
    expires_at: UnixMillis,
}

impl Token {
    /// Constructs a token issued at `issued_at` and valid for `lifetime`
    ///
    /// A zero lifetime is bumped to one millisecond so that the expiry is
    /// always strictly later than the issuance time.
    pub fn new(credential: AccessToken, issued_at: UnixMillis, lifetime: Duration) -> Self {
        let lifetime = lifetime.max(Duration::from_millis(1));
        Self {
            credential,
            issued_at,
            expires_at: issued_at + lifetime,
        }
    }

    /// The opaque credential string
    #[inline]
    pub fn credential(&self) -> &AccessTokenRef {
        &self.credential
    }

    /// The time at which the token was issued
    #[inline]
    pub fn issued_at(&self) -> UnixMillis {
        self.issued_at
    }

    /// The time at which the token expires
    #[inline]
    pub fn expires_at(&self) -> UnixMillis {
        self.expires_at
    }

    /// The duration between issuance and expiry
    #[inline]
    pub fn lifetime(&self) -> Duration {
        self.expires_at.saturating_since(self.issued_at)
    }

    /// Whether the token has expired as of the provided time
    #[inline]
    pub fn is_expired_at(&self, time: UnixMillis) -> bool {
        time >= self.expires_at
    }

    /// How much longer the token remains valid as of the provided time
    #[inline]
    pub fn remaining_at(&self, time: UnixMillis) -> Duration {
        self.expires_at.saturating_since(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(lifetime_ms: u64) -> Token {
        Token::new(
            AccessToken::from_static("tok"),
            UnixMillis(10_000),
            Duration::from_millis(lifetime_ms),
        )
    }

    #[test]
    fn expiry_is_always_after_issuance() {
        let t = token(0);
        assert!(t.expires_at() > t.issued_at());
        assert_eq!(t.lifetime(), Duration::from_millis(1));
    }

    #[test]
    fn expiry_checks_against_a_point_in_time() {
        let t = token(1_000);
        assert!(!t.is_expired_at(UnixMillis(10_999)));
        assert!(t.is_expired_at(UnixMillis(11_000)));
        assert_eq!(
            t.remaining_at(UnixMillis(10_400)),
            Duration::from_millis(600)
        );
        assert_eq!(t.remaining_at(UnixMillis(12_000)), Duration::ZERO);
    }
}
