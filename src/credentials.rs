//! Cache credentials derived from issued tokens
//!
//! The cache authenticates with a username and password pair. For tokens
//! issued by the identity platform, the username is the object ID (`oid`)
//! claim carried in the token itself and the password is the raw token.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use tokio::sync::watch;

use crate::clock::{Clock, System, UnixMillis};
use crate::config::TokenManagerConfig;
use crate::issuer::TokenIssuer;
use crate::manager::{TokenError, TokenManager};
use crate::tokens::Token;
use crate::{AccessToken, AccessTokenRef};

/// A username and password pair for authenticating to the cache
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    username: Option<String>,
    password: AccessToken,
    expires_at: UnixMillis,
}

impl Credentials {
    fn from_token(token: &Token) -> Self {
        Self {
            username: object_id_claim(token.credential()),
            password: token.credential().to_owned(),
            expires_at: token.expires_at(),
        }
    }

    /// The username to authenticate with, when the token carries one
    ///
    /// Tokens that are not JWTs, or JWTs without an `oid` claim, produce no
    /// username; the cache then authenticates with the default user.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The password to authenticate with
    pub fn password(&self) -> &AccessTokenRef {
        &self.password
    }

    /// The time at which these credentials stop being accepted
    pub fn expires_at(&self) -> UnixMillis {
        self.expires_at
    }
}

/// Extracts the `oid` claim from a JWT without validating its signature
///
/// The claim is informational here, so the payload is decoded on a
/// best-effort basis and any malformed input simply yields no username.
fn object_id_claim(credential: &AccessTokenRef) -> Option<String> {
    #[derive(Deserialize)]
    struct Claims {
        oid: Option<String>,
    }

    let mut segments = credential.as_str().split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let _signature = segments.next()?;

    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Claims = serde_json::from_slice(&decoded).ok()?;
    claims.oid
}

/// Supplies always-fresh cache credentials backed by a [`TokenManager`]
///
/// This is the type cache clients integrate with: each call returns
/// credentials derived from the manager's current token, renewed in the
/// background well before expiry.
#[derive(Debug)]
pub struct CredentialsProvider<C = System> {
    manager: TokenManager<C>,
}

impl<C> Clone for CredentialsProvider<C> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

impl CredentialsProvider<System> {
    /// Constructs a provider over the given issuer using the system clock
    pub fn new(issuer: impl TokenIssuer + 'static, config: TokenManagerConfig) -> Self {
        Self {
            manager: TokenManager::new(issuer, config),
        }
    }
}

impl<C: Clock + Send + Sync + 'static> CredentialsProvider<C> {
    /// Constructs a provider using the given clock
    pub fn with_clock(
        issuer: impl TokenIssuer + 'static,
        config: TokenManagerConfig,
        clock: C,
    ) -> Self {
        Self {
            manager: TokenManager::with_clock(issuer, config, clock),
        }
    }

    /// Returns credentials backed by the current token
    pub async fn get_credentials(&self) -> Result<Credentials, TokenError> {
        let token = self.manager.get_token().await?;
        Ok(Credentials::from_token(&token))
    }

    /// Returns credentials, blocking the calling thread
    ///
    /// Same contract as [`get_credentials`][Self::get_credentials]; see
    /// [`TokenManager::get_token_blocking`] for the runtime requirements.
    pub fn get_credentials_blocking(&self) -> Result<Credentials, TokenError> {
        let token = self.manager.get_token_blocking()?;
        Ok(Credentials::from_token(&token))
    }

    /// Subscribes to token publications from the underlying manager
    ///
    /// Clients that must re-authenticate existing connections when the
    /// password rotates can watch this channel instead of polling.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Token>>> {
        self.manager.subscribe()
    }

    /// Permanently shuts down the underlying manager
    pub fn dispose(&self) {
        self.manager.dispose();
    }

    /// The underlying token manager
    pub fn token_manager(&self) -> &TokenManager<C> {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::issuer::IssuanceError;
    use async_trait::async_trait;
    use std::time::Duration;

    fn jwt_with_oid(oid: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"oid":"{oid}","aud":"cache"}}"#));
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn username_comes_from_the_oid_claim() {
        let token = Token::new(
            AccessToken::new(jwt_with_oid("my-object-id")),
            UnixMillis(1_000),
            Duration::from_secs(60),
        );

        let credentials = Credentials::from_token(&token);
        assert_eq!(credentials.username(), Some("my-object-id"));
        assert_eq!(credentials.password(), token.credential());
        assert_eq!(credentials.expires_at(), UnixMillis(61_000));
    }

    #[test]
    fn opaque_tokens_produce_no_username() {
        let token = Token::new(
            AccessToken::from_static("not-a-jwt"),
            UnixMillis(0),
            Duration::from_secs(60),
        );

        assert_eq!(Credentials::from_token(&token).username(), None);
    }

    #[test]
    fn jwts_without_an_oid_claim_produce_no_username() {
        let header = URL_SAFE_NO_PAD.encode("{}");
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"someone"}"#);
        let token = Token::new(
            AccessToken::new(format!("{header}.{payload}.sig")),
            UnixMillis(0),
            Duration::from_secs(60),
        );

        assert_eq!(Credentials::from_token(&token).username(), None);
    }

    struct JwtIssuer {
        clock: TestClock,
    }

    #[async_trait]
    impl TokenIssuer for JwtIssuer {
        async fn issue(&self) -> Result<Token, IssuanceError> {
            Ok(Token::new(
                AccessToken::new(jwt_with_oid("provider-user")),
                self.clock.now(),
                Duration::from_secs(3600),
            ))
        }
    }

    #[tokio::test]
    async fn provides_credentials_from_the_managed_token() {
        let clock = TestClock::new(UnixMillis(5_000));
        let provider = CredentialsProvider::with_clock(
            JwtIssuer {
                clock: clock.clone(),
            },
            TokenManagerConfig::default(),
            clock,
        );

        let credentials = provider.get_credentials().await.unwrap();
        assert_eq!(credentials.username(), Some("provider-user"));
        assert_eq!(credentials.expires_at(), UnixMillis(3_605_000));

        provider.dispose();
        assert!(matches!(
            provider.get_credentials().await,
            Err(TokenError::Disposed)
        ));
    }
}
