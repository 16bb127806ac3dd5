pub(crate) mod association;
pub(crate) mod auth;
pub(crate) mod federated;
pub(crate) mod health;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

/// Pull the opaque session token out of the `Authorization` header.
/// Cookie transport is the frontend proxy's concern; the API speaks bearer.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::extract_bearer_token;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn bearer_token_is_extracted_and_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer  abc.def "),
        );
        assert_eq!(extract_bearer_token(&headers), Some("abc.def".to_string()));
    }

    #[test]
    fn missing_or_empty_header_yields_none() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer "),
        );
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
