//! Outbound adapters: identity providers and email delivery.

mod discord;
mod email;
mod google;

pub use discord::DiscordGateway;
pub use email::{LogEmailGateway, OutboxEmailGateway};
pub use google::GoogleGateway;

/// Credentials for one OAuth2 application registration.
#[derive(Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: secrecy::SecretString,
    pub redirect_uri: url::Url,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("redirect_uri", &self.redirect_uri.as_str())
            .finish()
    }
}
