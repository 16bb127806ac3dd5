//! Client surfaces and redirect allow-listing.
//!
//! Every federated round trip starts and ends on a client surface (web app
//! or mobile app). Redirect targets supplied by the client are resolved
//! against that surface's allow-listed base and rejected if they escape it.

use url::Url;

/// Which client surface initiated the flow. Carried through the signed
/// state so the callback can pick the right redirect base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientSurface {
    Web,
    Mobile,
}

impl ClientSurface {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Mobile => "mobile",
        }
    }
}

impl std::fmt::Display for ClientSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClientSurface {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "web" => Ok(Self::Web),
            "mobile" => Ok(Self::Mobile),
            _ => Err(()),
        }
    }
}

/// Resolve a client-supplied redirect against the surface base.
///
/// Returns `None` when the result would leave the base's scheme/host/port,
/// so absolute URLs pointing elsewhere and protocol-relative tricks both
/// fail closed.
#[must_use]
pub fn validate_redirect_uri(base: &Url, redirect: &str) -> Option<Url> {
    let target = if redirect.is_empty() { "/" } else { redirect };
    let joined = base.join(target).ok()?;
    if joined.scheme() != base.scheme()
        || joined.host_str() != base.host_str()
        || joined.port() != base.port()
    {
        return None;
    }
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://app.pordisto.dev").expect("base url")
    }

    #[test]
    fn accepts_relative_paths() {
        let url = validate_redirect_uri(&base(), "/settings/connections").expect("valid");
        assert_eq!(url.as_str(), "https://app.pordisto.dev/settings/connections");
    }

    #[test]
    fn empty_redirect_falls_back_to_root() {
        let url = validate_redirect_uri(&base(), "").expect("valid");
        assert_eq!(url.path(), "/");
    }

    #[test]
    fn rejects_absolute_url_to_other_host() {
        assert!(validate_redirect_uri(&base(), "https://evil.example/phish").is_none());
    }

    #[test]
    fn rejects_protocol_relative_url() {
        assert!(validate_redirect_uri(&base(), "//evil.example/phish").is_none());
    }

    #[test]
    fn accepts_absolute_url_on_same_origin() {
        let url =
            validate_redirect_uri(&base(), "https://app.pordisto.dev/welcome").expect("valid");
        assert_eq!(url.path(), "/welcome");
    }

    #[test]
    fn mobile_scheme_base_works() {
        let mobile = Url::parse("pordisto://app").expect("mobile base");
        let url = validate_redirect_uri(&mobile, "/login/done").expect("valid");
        assert_eq!(url.scheme(), "pordisto");
    }
}
