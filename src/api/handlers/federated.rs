//! Federated login/signup/link endpoints.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::api::AppState;
use crate::auth::federated::{
    CallbackQuery, FederatedCallbackError, FederatedIntent, FederatedRequestError, GrantFlow,
};
use crate::auth::session::{ExternalProvider, UserId};
use crate::auth::ClientSurface;

use super::extract_bearer_token;

#[derive(Deserialize, Debug)]
pub struct RequestQuery {
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub surface: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct RequestResponse {
    pub state: String,
    pub code_verifier: String,
    pub redirect_to_client: String,
    pub redirect_to_provider: String,
}

#[derive(Deserialize, Debug)]
pub struct ProviderCallbackQuery {
    pub state: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub redirect_uri: String,
    pub code_verifier: String,
}

#[derive(Serialize, Debug)]
pub struct GrantResponse {
    pub token: String,
    pub flow: &'static str,
    pub redirect_url: String,
}

#[derive(Serialize, Debug)]
pub struct CallbackErrorResponse {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub association_token: Option<String>,
}

fn parse_provider(raw: &str) -> Option<ExternalProvider> {
    raw.parse().ok()
}

fn parse_intent(raw: &str) -> Option<FederatedIntent> {
    match raw {
        "login" => Some(FederatedIntent::Login),
        "signup" => Some(FederatedIntent::Signup),
        "link" => Some(FederatedIntent::Link),
        _ => None,
    }
}

fn grant_flow_name(flow: GrantFlow) -> &'static str {
    match flow {
        GrantFlow::LoggedIn => "login",
        GrantFlow::SignedUp => "signup",
        GrantFlow::Linked => "link",
    }
}

async fn link_user_from_headers(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<UserId, (StatusCode, String)> {
    let token = extract_bearer_token(headers)
        .ok_or((StatusCode::UNAUTHORIZED, "Missing session".to_string()))?;
    state
        .flows
        .validate_login(&token)
        .await
        .map(|(session, _)| session.user_id)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid session".to_string()))
}

pub async fn request(
    state: Extension<Arc<AppState>>,
    Path((provider, flow)): Path<(String, String)>,
    Query(query): Query<RequestQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(provider) = parse_provider(&provider) else {
        return (StatusCode::NOT_FOUND, "Unknown provider".to_string()).into_response();
    };
    let Some(intent) = parse_intent(&flow) else {
        return (StatusCode::NOT_FOUND, "Unknown flow".to_string()).into_response();
    };

    let surface = match query.surface.as_deref().unwrap_or("web").parse::<ClientSurface>() {
        Ok(surface) => surface,
        Err(()) => {
            return (StatusCode::BAD_REQUEST, "Unknown surface".to_string()).into_response();
        }
    };

    // Link flows bind the signed state to the authenticated caller.
    let link_user = if intent == FederatedIntent::Link {
        match link_user_from_headers(&state, &headers).await {
            Ok(user_id) => Some(user_id),
            Err(response) => return response.into_response(),
        }
    } else {
        None
    };

    match state
        .federated
        .request(provider, surface, &query.redirect_uri, link_user)
    {
        Ok(request) => Json(RequestResponse {
            state: request.state,
            code_verifier: request.code_verifier,
            redirect_to_client: request.redirect_to_client.into(),
            redirect_to_provider: request.redirect_to_provider.into(),
        })
        .into_response(),
        Err(FederatedRequestError::UnknownProvider) => {
            (StatusCode::NOT_FOUND, "Unknown provider".to_string()).into_response()
        }
        Err(FederatedRequestError::InvalidRedirectUri) => {
            (StatusCode::BAD_REQUEST, "Invalid redirect URI".to_string()).into_response()
        }
        Err(FederatedRequestError::Internal(err)) => {
            error!("federated request failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
                .into_response()
        }
    }
}

pub async fn callback(
    state: Extension<Arc<AppState>>,
    Path((provider, flow)): Path<(String, String)>,
    Query(query): Query<ProviderCallbackQuery>,
) -> impl IntoResponse {
    let Some(provider) = parse_provider(&provider) else {
        return (StatusCode::NOT_FOUND, "Unknown provider".to_string()).into_response();
    };
    let Some(intent) = parse_intent(&flow) else {
        return (StatusCode::NOT_FOUND, "Unknown flow".to_string()).into_response();
    };

    let callback = CallbackQuery {
        state: query.state,
        code: query.code,
        error: query.error,
        redirect_uri: query.redirect_uri,
        code_verifier: query.code_verifier,
    };

    match state.federated.callback(provider, intent, callback).await {
        Ok(grant) => Json(GrantResponse {
            token: grant.token,
            flow: grant_flow_name(grant.flow),
            redirect_url: grant.redirect_url.into(),
        })
        .into_response(),
        Err(err) => callback_error_response(err),
    }
}

fn callback_error_response(err: FederatedCallbackError) -> axum::response::Response {
    let (status, body) = match err {
        FederatedCallbackError::UnknownProvider => {
            return (StatusCode::NOT_FOUND, "Unknown provider".to_string()).into_response();
        }
        FederatedCallbackError::InvalidState => (
            StatusCode::BAD_REQUEST,
            CallbackErrorResponse {
                error: "invalid_state",
                redirect_url: None,
                association_token: None,
            },
        ),
        FederatedCallbackError::InvalidRedirectUri => (
            StatusCode::BAD_REQUEST,
            CallbackErrorResponse {
                error: "invalid_redirect_uri",
                redirect_url: None,
                association_token: None,
            },
        ),
        FederatedCallbackError::ProviderAccessDenied { redirect_url } => (
            StatusCode::FORBIDDEN,
            CallbackErrorResponse {
                error: "provider_access_denied",
                redirect_url: Some(redirect_url.into()),
                association_token: None,
            },
        ),
        FederatedCallbackError::ProviderError { redirect_url } => (
            StatusCode::BAD_GATEWAY,
            CallbackErrorResponse {
                error: "provider_error",
                redirect_url: Some(redirect_url.into()),
                association_token: None,
            },
        ),
        FederatedCallbackError::TokenExchangeFailed => (
            StatusCode::BAD_GATEWAY,
            CallbackErrorResponse {
                error: "token_exchange_failed",
                redirect_url: None,
                association_token: None,
            },
        ),
        FederatedCallbackError::IdentityFetchFailed { redirect_url } => (
            StatusCode::BAD_GATEWAY,
            CallbackErrorResponse {
                error: "identity_fetch_failed",
                redirect_url: Some(redirect_url.into()),
                association_token: None,
            },
        ),
        FederatedCallbackError::AccountNotFound { redirect_url } => (
            StatusCode::NOT_FOUND,
            CallbackErrorResponse {
                error: "account_not_found",
                redirect_url: Some(redirect_url.into()),
                association_token: None,
            },
        ),
        FederatedCallbackError::AssociationAvailable {
            token, redirect_url, ..
        } => (
            StatusCode::CONFLICT,
            CallbackErrorResponse {
                error: "association_available",
                redirect_url: Some(redirect_url.into()),
                association_token: Some(token),
            },
        ),
        FederatedCallbackError::ProviderAlreadyLinked { redirect_url } => (
            StatusCode::CONFLICT,
            CallbackErrorResponse {
                error: "provider_already_linked",
                redirect_url: Some(redirect_url.into()),
                association_token: None,
            },
        ),
        FederatedCallbackError::LinkedElsewhere { redirect_url } => (
            StatusCode::CONFLICT,
            CallbackErrorResponse {
                error: "account_linked_elsewhere",
                redirect_url: Some(redirect_url.into()),
                association_token: None,
            },
        ),
        FederatedCallbackError::Internal(err) => {
            error!("federated callback failed: {err:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
                .into_response();
        }
    };
    (status, Json(body)).into_response()
}
