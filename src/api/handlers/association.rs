//! Account association challenge and confirm endpoints.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::api::AppState;
use crate::auth::association::AssociationConfirmError;
use crate::auth::lifecycle::SessionValidateError;

#[derive(Deserialize, Debug)]
pub struct ChallengeRequest {
    pub token: String,
}

#[derive(Serialize, Debug)]
pub struct ChallengeResponse {
    pub token: String,
}

#[derive(Deserialize, Debug)]
pub struct ConfirmRequest {
    pub token: String,
    pub code: String,
}

#[derive(Serialize, Debug)]
pub struct ConfirmResponse {
    pub token: String,
    pub expires_at: i64,
}

fn session_error_response(err: &SessionValidateError) -> (StatusCode, String) {
    match err {
        SessionValidateError::Invalid => (StatusCode::UNAUTHORIZED, "Invalid session".to_string()),
        SessionValidateError::Expired => (StatusCode::UNAUTHORIZED, "Session expired".to_string()),
        SessionValidateError::Storage(err) => {
            error!("association session validation failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
        }
    }
}

pub async fn challenge(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ChallengeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let (session, _user) = match state.association.validate(&request.token).await {
        Ok(validated) => validated,
        Err(err) => return session_error_response(&err).into_response(),
    };

    match state.association.challenge(&session).await {
        Ok((_, token)) => Json(ChallengeResponse { token }).into_response(),
        Err(err) => {
            error!("association challenge failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
                .into_response()
        }
    }
}

pub async fn confirm(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ConfirmRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let (session, _user) = match state.association.validate(&request.token).await {
        Ok(validated) => validated,
        Err(err) => return session_error_response(&err).into_response(),
    };

    match state.association.confirm(&session, &request.code).await {
        Ok(grant) => Json(ConfirmResponse {
            token: grant.token,
            expires_at: grant.session.expires_at.unix_timestamp(),
        })
        .into_response(),
        Err(AssociationConfirmError::InvalidCode) => {
            (StatusCode::BAD_REQUEST, "Invalid code".to_string()).into_response()
        }
        Err(AssociationConfirmError::AccountAlreadyLinked) => (
            StatusCode::CONFLICT,
            "Account already has an identity for this provider".to_string(),
        )
            .into_response(),
        Err(AssociationConfirmError::LinkedElsewhere) => (
            StatusCode::CONFLICT,
            "Identity is linked to another account".to_string(),
        )
            .into_response(),
        Err(AssociationConfirmError::UserNotFound) => {
            (StatusCode::UNAUTHORIZED, "Invalid session".to_string()).into_response()
        }
        Err(AssociationConfirmError::Storage(err)) => {
            error!("association confirm failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
                .into_response()
        }
    }
}
