//! DTOs for interacting with the identity platform's token endpoints

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::clock::UnixMillis;
use crate::tokens::Token;
use crate::{AccessToken, ClientIdRef, ClientSecretRef, Scope};

use super::IssuanceError;

/// Seconds on the wire, tolerating both number and string encodings
///
/// The v2 token endpoint returns `expires_in` as a JSON number; the instance
/// metadata service returns it as a string.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Seconds(pub u64);

impl<'de> Deserialize<'de> for Seconds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Seconds(n)),
            Raw::Text(s) => s
                .parse()
                .map(Seconds)
                .map_err(|_| serde::de::Error::custom(format!("invalid seconds value: {s:?}"))),
        }
    }
}

/// A successful response from a token endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: AccessToken,
    #[serde(default)]
    pub expires_in: Option<Seconds>,
    #[serde(default)]
    pub expires_on: Option<Seconds>,
}

impl TokenResponse {
    /// Builds a [`Token`] issued at `now` from the response's expiry metadata
    ///
    /// An absolute `expires_on` timestamp wins over a relative `expires_in`
    /// lifetime when both are present.
    pub fn into_token(self, now: UnixMillis) -> Result<Token, IssuanceError> {
        let lifetime = match (self.expires_on, self.expires_in) {
            (Some(on), _) => UnixMillis(on.0.saturating_mul(1_000)).saturating_since(now),
            (None, Some(expires_in)) => Duration::from_secs(expires_in.0),
            (None, None) => {
                return Err(IssuanceError::InvalidToken(
                    "response carried no expiry metadata".into(),
                ))
            }
        };

        if lifetime.is_zero() {
            return Err(IssuanceError::InvalidToken(
                "token was already expired on arrival".into(),
            ));
        }

        Ok(Token::new(self.access_token, now, lifetime))
    }
}

/// The form body of a client credentials exchange
#[derive(Debug, Serialize)]
pub(crate) struct ClientCredentialsForm<'a> {
    grant_type: &'static str,
    client_id: &'a ClientIdRef,
    client_secret: &'a ClientSecretRef,
    scope: String,
}

impl<'a> ClientCredentialsForm<'a> {
    pub fn new(
        client_id: &'a ClientIdRef,
        client_secret: &'a ClientSecretRef,
        scopes: &[Scope],
    ) -> Self {
        Self {
            grant_type: "client_credentials",
            client_id,
            client_secret,
            scope: scopes
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}
