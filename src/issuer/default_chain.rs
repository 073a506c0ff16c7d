//! A credential chain that tries several issuers in order
//!
//! Mirrors the behavior of a default credential chain: candidates are tried
//! in order until one produces a token, which makes the same configuration
//! work on a developer machine (service principal from the environment) and
//! on Azure compute (managed identity) without code changes.

use std::{env, fmt};

use async_trait::async_trait;

use crate::tokens::Token;
use crate::{ClientId, ClientSecret, Scope, TenantId};

use super::{
    IssuanceError, ManagedIdentityIssuer, ServicePrincipalIssuer, TokenIssuer,
};

/// A token issuer that falls through an ordered list of candidates
pub struct DefaultChainIssuer {
    candidates: Vec<(String, Box<dyn TokenIssuer>)>,
}

impl DefaultChainIssuer {
    /// Constructs an empty chain
    pub fn new() -> Self {
        Self {
            candidates: Vec::new(),
        }
    }

    /// Builds the environment-driven default chain for the given scope
    ///
    /// A service principal candidate is included when `AZURE_TENANT_ID`,
    /// `AZURE_CLIENT_ID`, and `AZURE_CLIENT_SECRET` are all set; the managed
    /// identity of the running compute resource is always the final
    /// fallback.
    pub fn from_env(scope: Scope) -> Self {
        let mut chain = Self::new();

        if let (Ok(tenant), Ok(client_id), Ok(client_secret)) = (
            env::var("AZURE_TENANT_ID"),
            env::var("AZURE_CLIENT_ID"),
            env::var("AZURE_CLIENT_SECRET"),
        ) {
            chain = chain.with_candidate(
                "service-principal",
                ServicePrincipalIssuer::new(
                    TenantId::new(tenant),
                    ClientId::new(client_id),
                    ClientSecret::new(client_secret),
                )
                .with_scopes([scope.clone()]),
            );
        }

        chain.with_candidate(
            "managed-identity",
            ManagedIdentityIssuer::system_assigned(scope),
        )
    }

    /// Appends a candidate to the chain
    pub fn with_candidate(mut self, name: impl Into<String>, issuer: impl TokenIssuer + 'static) -> Self {
        self.candidates.push((name.into(), Box::new(issuer)));
        self
    }
}

impl Default for DefaultChainIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DefaultChainIssuer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DefaultChainIssuer")
            .field(
                "candidates",
                &self
                    .candidates
                    .iter()
                    .map(|(n, _)| n.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[async_trait]
impl TokenIssuer for DefaultChainIssuer {
    async fn issue(&self) -> Result<Token, IssuanceError> {
        let mut last_error = None;

        for (name, issuer) in &self.candidates {
            match issuer.issue().await {
                Ok(token) => {
                    tracing::debug!(candidate = %name, "credential chain candidate produced a token");
                    return Ok(token);
                }
                Err(error) => {
                    tracing::debug!(
                        candidate = %name,
                        error = &error as &dyn std::error::Error,
                        "credential chain candidate failed, trying next"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            IssuanceError::Configuration("credential chain has no candidates".into())
        }))
    }
}
