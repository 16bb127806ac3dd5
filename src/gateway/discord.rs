//! Discord identity provider gateway.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::auth::federated::code_challenge_s256;
use crate::auth::gateway::{
    IdentityFetchError, ProviderGateway, ProviderIdentity, ProviderTokens, TokenExchangeError,
};

use super::ProviderCredentials;

const AUTHORIZATION_ENDPOINT: &str = "https://discord.com/oauth2/authorize";
const TOKEN_ENDPOINT: &str = "https://discord.com/api/oauth2/token";
const REVOCATION_ENDPOINT: &str = "https://discord.com/api/oauth2/token/revoke";
const USER_ENDPOINT: &str = "https://discord.com/api/v10/users/@me";
const SCOPE: &str = "identify email";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    global_name: Option<String>,
    avatar: Option<String>,
    #[serde(default)]
    verified: bool,
    email: Option<String>,
}

pub struct DiscordGateway {
    http: Client,
    credentials: ProviderCredentials,
}

impl DiscordGateway {
    #[must_use]
    pub fn new(http: Client, credentials: ProviderCredentials) -> Self {
        Self { http, credentials }
    }
}

#[async_trait]
impl ProviderGateway for DiscordGateway {
    fn authorization_url(&self, state: &str, code_verifier: &str) -> Url {
        let mut url = Url::parse(AUTHORIZATION_ENDPOINT).expect("static endpoint url");
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("redirect_uri", self.credentials.redirect_uri.as_str())
            .append_pair("scope", SCOPE)
            .append_pair("state", state)
            .append_pair("code_challenge", &code_challenge_s256(code_verifier))
            .append_pair("code_challenge_method", "S256");
        url
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderTokens, TokenExchangeError> {
        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
                ("client_id", &self.credentials.client_id),
                (
                    "client_secret",
                    self.credentials.client_secret.expose_secret(),
                ),
                ("code_verifier", code_verifier),
            ])
            .send()
            .await
            .map_err(|err| {
                debug!("discord token endpoint unreachable: {err}");
                TokenExchangeError::ExchangeFailed
            })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(TokenExchangeError::CredentialsInvalid);
        }
        if !status.is_success() {
            return Err(TokenExchangeError::ExchangeFailed);
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|_| TokenExchangeError::ExchangeFailed)?;
        Ok(ProviderTokens {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            id_token: None,
        })
    }

    async fn fetch_identity(
        &self,
        tokens: &ProviderTokens,
    ) -> Result<ProviderIdentity, IdentityFetchError> {
        let response = self
            .http
            .get(USER_ENDPOINT)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|_| IdentityFetchError::FetchFailed)?;

        if !response.status().is_success() {
            return Err(IdentityFetchError::FetchFailed);
        }

        let user: DiscordUser = response
            .json()
            .await
            .map_err(|_| IdentityFetchError::InvalidIdentity)?;
        // An identity without an email cannot drive login/signup decisions.
        let email = user.email.ok_or(IdentityFetchError::InvalidIdentity)?;

        let icon_url = user.avatar.as_deref().map(|avatar| {
            format!(
                "https://cdn.discordapp.com/avatars/{}/{avatar}.png",
                user.id
            )
        });

        Ok(ProviderIdentity {
            provider_user_id: user.id,
            email,
            display_name: user.global_name.unwrap_or(user.username),
            icon_url,
            email_verified: user.verified,
        })
    }

    async fn revoke_tokens(&self, tokens: &ProviderTokens) {
        let result = self
            .http
            .post(REVOCATION_ENDPOINT)
            .form(&[
                ("token", tokens.access_token.as_str()),
                ("client_id", self.credentials.client_id.as_str()),
                (
                    "client_secret",
                    self.credentials.client_secret.expose_secret(),
                ),
            ])
            .send()
            .await;
        if let Err(err) = result {
            warn!("failed to revoke discord token: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn authorization_url_uses_discord_endpoint() {
        let gateway = DiscordGateway::new(
            Client::new(),
            ProviderCredentials {
                client_id: "client-id".to_string(),
                client_secret: SecretString::from("client-secret"),
                redirect_uri: Url::parse("https://api.pordisto.dev/callback").expect("url"),
            },
        );
        let url = gateway.authorization_url("signed-state", "verifier");
        assert!(url.as_str().starts_with(AUTHORIZATION_ENDPOINT));
        assert!(url.query_pairs().any(|(k, v)| k == "scope" && v == SCOPE));
    }

    #[test]
    fn discord_user_shape_decodes() {
        let user: DiscordUser = serde_json::from_value(serde_json::json!({
            "id": "discord-user-1",
            "username": "person",
            "discriminator": "0",
            "global_name": "Person",
            "avatar": "abc123",
            "verified": true,
            "email": "person@example.com",
        }))
        .expect("decode");
        assert_eq!(user.id, "discord-user-1");
        assert_eq!(user.global_name.as_deref(), Some("Person"));
        assert!(user.verified);
    }
}
