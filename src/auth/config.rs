//! Auth configuration: surface base URLs and the state-signing secret.

use secrecy::SecretString;
use url::Url;

use super::redirect::ClientSurface;

/// Read-only after process start; shared via `Arc`.
#[derive(Clone)]
pub struct AuthConfig {
    web_base_url: Url,
    mobile_base_url: Url,
    state_secret: SecretString,
}

impl AuthConfig {
    #[must_use]
    pub fn new(web_base_url: Url, mobile_base_url: Url, state_secret: SecretString) -> Self {
        Self {
            web_base_url,
            mobile_base_url,
            state_secret,
        }
    }

    #[must_use]
    pub fn with_web_base_url(mut self, url: Url) -> Self {
        self.web_base_url = url;
        self
    }

    #[must_use]
    pub fn with_mobile_base_url(mut self, url: Url) -> Self {
        self.mobile_base_url = url;
        self
    }

    /// Allow-listed redirect base for a client surface.
    #[must_use]
    pub fn surface_base(&self, surface: ClientSurface) -> &Url {
        match surface {
            ClientSurface::Web => &self.web_base_url,
            ClientSurface::Mobile => &self.mobile_base_url,
        }
    }

    #[must_use]
    pub fn state_secret(&self) -> &SecretString {
        &self.state_secret
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("web_base_url", &self.web_base_url.as_str())
            .field("mobile_base_url", &self.mobile_base_url.as_str())
            .field("state_secret", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_base_picks_the_right_url() {
        let config = AuthConfig::new(
            Url::parse("https://app.pordisto.dev").expect("web"),
            Url::parse("pordisto://app").expect("mobile"),
            SecretString::from("state-secret"),
        );
        assert_eq!(
            config.surface_base(ClientSurface::Web).as_str(),
            "https://app.pordisto.dev/"
        );
        assert_eq!(config.surface_base(ClientSurface::Mobile).scheme(), "pordisto");
    }

    #[test]
    fn debug_redacts_the_secret() {
        let config = AuthConfig::new(
            Url::parse("https://app.pordisto.dev").expect("web"),
            Url::parse("pordisto://app").expect("mobile"),
            SecretString::from("state-secret"),
        );
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("state-secret"));
    }
}
