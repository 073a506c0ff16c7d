//! A token issuer authenticating as a service principal
//!
//! Performs the client credentials exchange against the tenant's v2 token
//! endpoint using an application's client ID and secret.

use async_trait::async_trait;

use crate::clock::{Clock, System};
use crate::tokens::Token;
use crate::{ClientId, ClientSecret, Scope, TenantId};

use super::{dto, read_token_response, IssuanceError, TokenIssuer};

const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// The default scope requested for cache access
pub const DEFAULT_SCOPE: &str = "https://redis.azure.com/.default";

/// A token issuer using a service principal's client credentials
#[derive(Clone, Debug)]
pub struct ServicePrincipalIssuer {
    client: reqwest::Client,
    authority: String,
    tenant: TenantId,
    client_id: ClientId,
    client_secret: ClientSecret,
    scopes: Vec<Scope>,
}

impl ServicePrincipalIssuer {
    /// Constructs an issuer for the given service principal
    ///
    /// Tokens are requested for [`DEFAULT_SCOPE`] unless overridden with
    /// [`with_scopes`][Self::with_scopes].
    pub fn new(tenant: TenantId, client_id: ClientId, client_secret: ClientSecret) -> Self {
        Self {
            client: reqwest::Client::new(),
            authority: DEFAULT_AUTHORITY.to_owned(),
            tenant,
            client_id,
            client_secret,
            scopes: vec![Scope::from_static(DEFAULT_SCOPE)],
        }
    }

    /// Uses a pre-configured HTTP client
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Overrides the authority host used for the exchange
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Replaces the scopes requested for the token
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant
        )
    }
}

#[async_trait]
impl TokenIssuer for ServicePrincipalIssuer {
    #[tracing::instrument(
        err,
        skip(self),
        fields(tenant = %self.tenant, client_id = %self.client_id),
    )]
    async fn issue(&self) -> Result<Token, IssuanceError> {
        tracing::trace!("requesting token from the tenant token endpoint");

        let form =
            dto::ClientCredentialsForm::new(&self.client_id, &self.client_secret, &self.scopes);

        let response = self
            .client
            .post(self.token_url())
            .form(&form)
            .send()
            .await
            .map_err(IssuanceError::Transport)?;

        read_token_response(response, System.now()).await
    }
}
