//! Background management of Entra ID tokens for Azure Cache for Redis clients
//!
//! Connecting to a managed Redis cache with Entra ID authentication means the
//! connection password is a short-lived token issued by the identity platform.
//! This library keeps a current, valid token available to the cache client at
//! all times: it proactively renews the token in the background before it
//! expires, bounds transient issuance failures with a retry policy, and serves
//! blocking as well as cooperative callers without ever duplicating refresh
//! work.
//!
//! The moving parts:
//!
//! * [`issuer::TokenIssuer`] is the capability that exchanges identity
//!   parameters for a fresh [`Token`]. Three interchangeable strategies are
//!   provided: [managed identity][issuer::ManagedIdentityIssuer],
//!   [service principal][issuer::ServicePrincipalIssuer], and an
//!   [environment-driven default chain][issuer::DefaultChainIssuer].
//! * [`TokenManager`] owns the current token and drives the renewal engine.
//!   Once the first token has been acquired, a background task re-arms a
//!   cancellable delayed renewal after every publication, so callers on the
//!   common path always hit the cache.
//! * [`CredentialsProvider`] adapts the current token into the
//!   username/password pair the cache client expects.
//!
//! # Example
//!
//! ```no_run
//! use entra_tokens::{
//!     issuer::ServicePrincipalIssuer, ClientId, ClientSecret, CredentialsProvider, TenantId,
//!     TokenManagerConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let issuer = ServicePrincipalIssuer::new(
//!     TenantId::from_static("00000000-0000-0000-0000-000000000000"),
//!     ClientId::from_static("my-app"),
//!     ClientSecret::from_static("my-secret"),
//! );
//!
//! let provider = CredentialsProvider::new(issuer, TokenManagerConfig::default());
//!
//! let credentials = provider.get_credentials().await?;
//! tracing::info!(
//!     username = credentials.username(),
//!     "connecting to the cache with a fresh token"
//! );
//! # Ok(())
//! # }
//! ```
//!
//! Renewal is scheduled at the earlier of the configured fraction of the
//! token's lifetime and a fixed bound before expiry, so even unusually
//! short-lived tokens are renewed before callers can observe them expiring.
//! While a renewal is in flight, readers of the still-valid current token are
//! never blocked.
//!
//! A runnable demonstration that authenticates from the environment and pulls
//! credentials on an interval lives in the `demos` folder.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backoff;
mod braids;
pub mod clock;
mod config;
mod credentials;
pub mod issuer;
mod manager;
mod tokens;

pub use braids::*;
pub use config::{ConfigError, RetryPolicy, TokenManagerConfig};
pub use credentials::{Credentials, CredentialsProvider};
pub use issuer::{IssuanceError, TokenIssuer};
pub use manager::{AttemptError, TokenError, TokenManager};
pub use tokens::Token;
