//! A token issuer backed by the Azure Instance Metadata Service
//!
//! Workloads running on Azure compute can obtain tokens for their managed
//! identity from a link-local metadata endpoint, with no stored secret.

use async_trait::async_trait;

use crate::clock::{Clock, System};
use crate::tokens::Token;
use crate::{ClientId, Scope};

use super::{read_token_response, IssuanceError, TokenIssuer};

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";

/// Selects which managed identity the metadata service should authenticate
///
/// A system-assigned identity needs no discriminator; a user-assigned
/// identity is picked out by one of three identifier kinds.
#[derive(Clone, Debug)]
pub enum ManagedIdentityId {
    /// The identity assigned to the compute resource itself
    SystemAssigned,
    /// A user-assigned identity selected by its client ID
    ClientId(ClientId),
    /// A user-assigned identity selected by its object ID
    ObjectId(String),
    /// A user-assigned identity selected by its Azure resource ID
    ResourceId(String),
}

impl ManagedIdentityId {
    fn query_pair(&self) -> Option<(&'static str, &str)> {
        match self {
            Self::SystemAssigned => None,
            Self::ClientId(id) => Some(("client_id", id.as_str())),
            Self::ObjectId(id) => Some(("object_id", id)),
            Self::ResourceId(id) => Some(("mi_res_id", id)),
        }
    }
}

/// A token issuer using the managed identity of the running compute resource
#[derive(Clone, Debug)]
pub struct ManagedIdentityIssuer {
    client: reqwest::Client,
    endpoint: String,
    identity: ManagedIdentityId,
    resource: Scope,
}

impl ManagedIdentityIssuer {
    /// Constructs an issuer for the system-assigned managed identity
    pub fn system_assigned(resource: Scope) -> Self {
        Self::new(ManagedIdentityId::SystemAssigned, resource)
    }

    /// Constructs an issuer for the given managed identity
    pub fn new(identity: ManagedIdentityId, resource: Scope) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: IMDS_ENDPOINT.to_owned(),
            identity,
            resource,
        }
    }

    /// Uses a pre-configured HTTP client
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Overrides the metadata service endpoint
    ///
    /// Useful against Arc-enabled servers or a local stand-in during tests.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl TokenIssuer for ManagedIdentityIssuer {
    #[tracing::instrument(
        err,
        skip(self),
        fields(identity = ?self.identity, resource = %self.resource),
    )]
    async fn issue(&self) -> Result<Token, IssuanceError> {
        tracing::trace!("requesting token from the instance metadata service");

        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("api-version", IMDS_API_VERSION),
                ("resource", self.resource.as_resource()),
            ])
            .header("Metadata", "true");

        if let Some(pair) = self.identity.query_pair() {
            request = request.query(&[pair]);
        }

        let response = request.send().await.map_err(IssuanceError::Transport)?;
        read_token_response(response, System.now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn issues_a_token_for_the_system_assigned_identity() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(header("Metadata", "true"))
            .and(query_param("api-version", IMDS_API_VERSION))
            .and(query_param("resource", "https://redis.azure.com"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"access_token":"imds-token","expires_in":"86400","token_type":"Bearer"}"#,
                "application/json",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let issuer =
            ManagedIdentityIssuer::system_assigned(Scope::from_static("https://redis.azure.com/.default"))
                .with_endpoint(server.uri());

        let token = issuer.issue().await.unwrap();
        assert_eq!(token.credential().as_str(), "imds-token");
        assert_eq!(token.lifetime(), Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn selects_a_user_assigned_identity_by_client_id() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("client_id", "my-identity"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"access_token":"uami-token","expires_in":"3600"}"#,
                "application/json",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let issuer = ManagedIdentityIssuer::new(
            ManagedIdentityId::ClientId(ClientId::from_static("my-identity")),
            Scope::from_static("https://redis.azure.com"),
        )
        .with_endpoint(server.uri());

        let token = issuer.issue().await.unwrap();
        assert_eq!(token.credential().as_str(), "uami-token");
    }

    #[tokio::test]
    async fn service_errors_are_classified_as_retryable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("temporary failure"))
            .mount(&server)
            .await;

        let issuer = ManagedIdentityIssuer::system_assigned(Scope::from_static(
            "https://redis.azure.com",
        ))
        .with_endpoint(server.uri());

        let err = issuer.issue().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, IssuanceError::Rejected { status: 500, .. }));
    }

    #[tokio::test]
    async fn identity_rejections_are_not_retryable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_request"}"#),
            )
            .mount(&server)
            .await;

        let issuer = ManagedIdentityIssuer::system_assigned(Scope::from_static(
            "https://redis.azure.com",
        ))
        .with_endpoint(server.uri());

        let err = issuer.issue().await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
