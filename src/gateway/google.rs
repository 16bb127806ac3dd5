//! Google identity provider gateway.
//!
//! The identity comes from the ID token the token endpoint returns. The
//! token arrived over TLS directly from Google, so its claims are decoded
//! without signature verification.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
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

const AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const REVOCATION_ENDPOINT: &str = "https://oauth2.googleapis.com/revoke";
const SCOPE: &str = "openid profile email";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
}

#[derive(Deserialize)]
struct IdTokenClaims {
    sub: String,
    name: String,
    email: String,
    picture: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

pub struct GoogleGateway {
    http: Client,
    credentials: ProviderCredentials,
}

impl GoogleGateway {
    #[must_use]
    pub fn new(http: Client, credentials: ProviderCredentials) -> Self {
        Self { http, credentials }
    }
}

/// Decode the claims segment of a JWT without verifying the signature.
fn decode_id_token_claims(id_token: &str) -> Option<IdTokenClaims> {
    let mut segments = id_token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[async_trait]
impl ProviderGateway for GoogleGateway {
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
                debug!("google token endpoint unreachable: {err}");
                TokenExchangeError::ExchangeFailed
            })?;

        let status = response.status();
        if status.is_client_error() {
            // Bad code, reused code, or PKCE mismatch.
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
            id_token: tokens.id_token,
        })
    }

    async fn fetch_identity(
        &self,
        tokens: &ProviderTokens,
    ) -> Result<ProviderIdentity, IdentityFetchError> {
        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or(IdentityFetchError::InvalidIdentity)?;
        let claims =
            decode_id_token_claims(id_token).ok_or(IdentityFetchError::InvalidIdentity)?;

        Ok(ProviderIdentity {
            provider_user_id: claims.sub,
            email: claims.email,
            display_name: claims.name,
            icon_url: claims.picture,
            email_verified: claims.email_verified,
        })
    }

    async fn revoke_tokens(&self, tokens: &ProviderTokens) {
        let result = self
            .http
            .post(REVOCATION_ENDPOINT)
            .form(&[("token", tokens.access_token.as_str())])
            .send()
            .await;
        if let Err(err) = result {
            warn!("failed to revoke google token: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn gateway() -> GoogleGateway {
        GoogleGateway::new(
            Client::new(),
            ProviderCredentials {
                client_id: "client-id".to_string(),
                client_secret: SecretString::from("client-secret"),
                redirect_uri: Url::parse("https://api.pordisto.dev/callback").expect("url"),
            },
        )
    }

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let url = gateway().authorization_url("signed-state", "verifier");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("state".to_string(), "signed-state".to_string())));
        assert!(pairs.contains(&("code_challenge_method".to_string(), "S256".to_string())));
        assert!(pairs
            .iter()
            .any(|(k, v)| k == "code_challenge" && v == &code_challenge_s256("verifier")));
        assert!(!url.as_str().contains("client-secret"));
    }

    #[test]
    fn id_token_claims_decode() {
        let claims = serde_json::json!({
            "sub": "google-user-1",
            "name": "Person",
            "email": "person@example.com",
            "picture": "https://example.com/avatar.png",
            "email_verified": true,
        });
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let token = format!("eyJhbGciOiJSUzI1NiJ9.{payload}.signature");

        let decoded = decode_id_token_claims(&token).expect("claims");
        assert_eq!(decoded.sub, "google-user-1");
        assert!(decoded.email_verified);
    }

    #[test]
    fn malformed_id_token_yields_none() {
        assert!(decode_id_token_claims("only-one-segment").is_none());
        assert!(decode_id_token_claims("a.!!!.c").is_none());
    }
}
