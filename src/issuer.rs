//! Token issuers
//!
//! A [`TokenIssuer`] wraps one call to the remote identity platform and is
//! the pluggable seam of the crate: the manager does not care whether tokens
//! come from the instance metadata service, a service principal exchange, or
//! a chain of fallbacks. Implementations must be safe to call repeatedly and
//! must not retain per-call mutable state; every call contacts the platform
//! and may return a different token.

use async_trait::async_trait;
use thiserror::Error;

use crate::clock::UnixMillis;
use crate::tokens::Token;

pub mod default_chain;
pub(crate) mod dto;
pub mod managed_identity;
pub mod service_principal;

pub use default_chain::DefaultChainIssuer;
pub use managed_identity::{ManagedIdentityId, ManagedIdentityIssuer};
pub use service_principal::{ServicePrincipalIssuer, DEFAULT_SCOPE};

/// A source of freshly issued tokens
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Requests a new token from the identity platform
    async fn issue(&self) -> Result<Token, IssuanceError>;
}

/// An error while requesting a token from the identity platform
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// Unable to send the token request to the platform
    #[error("error sending token request to the identity platform")]
    Transport(#[source] reqwest::Error),
    /// The platform answered with a non-success status
    #[error("identity platform rejected the token request ({status}): {body}")]
    Rejected {
        /// The HTTP status of the rejection
        status: u16,
        /// The body of the rejection, as returned by the platform
        body: String,
    },
    /// Unable to deserialize the token response body
    #[error("error deserializing token response from the identity platform")]
    Body(#[from] serde_json::Error),
    /// The platform returned a token without a usable lifetime
    #[error("identity platform returned an unusable token: {0}")]
    InvalidToken(String),
    /// The identity parameters themselves are unusable
    #[error("invalid identity configuration: {0}")]
    Configuration(String),
}

impl IssuanceError {
    /// Whether the failure is worth retrying
    ///
    /// Transport failures and throttling or server-side rejections are
    /// transient; malformed responses and configuration errors will not get
    /// better on a retry and should fail fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            Self::Body(_) | Self::InvalidToken(_) | Self::Configuration(_) => false,
        }
    }
}

/// Turns an HTTP response from a token endpoint into a [`Token`]
pub(crate) async fn read_token_response(
    response: reqwest::Response,
    now: UnixMillis,
) -> Result<Token, IssuanceError> {
    let status = response.status();

    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from the identity platform"
    );

    if !status.is_success() {
        let body = response.text().await.map_err(IssuanceError::Transport)?;
        return Err(IssuanceError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let body = response.bytes().await.map_err(IssuanceError::Transport)?;
    let parsed: dto::TokenResponse = serde_json::from_slice(&body)?;
    parsed.into_token(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(IssuanceError::Rejected {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(IssuanceError::Rejected {
            status: 429,
            body: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn rejected_credentials_and_bad_configuration_fail_fast() {
        assert!(!IssuanceError::Rejected {
            status: 401,
            body: String::new()
        }
        .is_retryable());
        assert!(!IssuanceError::Configuration("bad scope".into()).is_retryable());
        assert!(!IssuanceError::InvalidToken("no expiry".into()).is_retryable());
    }
}
