//! Outbound collaborator contracts: identity providers and email.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Tokens returned by a provider's code exchange. Held only for the
/// duration of the callback; revoked as soon as the identity is fetched.
#[derive(Debug, Clone)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
}

/// Identity as reported by the provider.
#[derive(Debug, Clone)]
pub struct ProviderIdentity {
    pub provider_user_id: String,
    pub email: String,
    pub display_name: String,
    pub icon_url: Option<String>,
    pub email_verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenExchangeError {
    /// The provider rejected the code or the PKCE verifier.
    #[error("provider rejected the authorization code")]
    CredentialsInvalid,
    /// Transport failure or unusable response from the token endpoint.
    #[error("token endpoint request failed")]
    ExchangeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdentityFetchError {
    /// The response arrived but did not carry a usable identity.
    #[error("provider returned an invalid identity")]
    InvalidIdentity,
    #[error("identity endpoint request failed")]
    FetchFailed,
}

/// One round trip with an external identity provider. The wire-level OAuth2
/// details stay behind this boundary.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Authorization URL embedding the signed state and the PKCE challenge.
    fn authorization_url(&self, state: &str, code_verifier: &str) -> Url;

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderTokens, TokenExchangeError>;

    async fn fetch_identity(
        &self,
        tokens: &ProviderTokens,
    ) -> Result<ProviderIdentity, IdentityFetchError>;

    /// Best-effort cleanup. Implementations log failures and never surface
    /// them; a failed revocation must not fail the surrounding callback.
    async fn revoke_tokens(&self, tokens: &ProviderTokens);
}

#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn send_verification_email(&self, email: &str, code: &str) -> Result<()>;
}
