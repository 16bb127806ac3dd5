//! Credential endpoints: login, logout, session introspection, signup,
//! email verification, and password reset.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::api::AppState;
use crate::auth::flows::{
    LoginError, PasswordResetCompleteError, PasswordResetRequestError, SignupConfirmError,
    SignupRequestError,
};
use crate::auth::lifecycle::{CodeConfirmError, SessionValidateError};
use crate::auth::secret::{SecretHasher, Sha256SecretHasher};
use crate::auth::session::SessionId;
use crate::auth::token::format_token;

use super::extract_bearer_token;

#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Debug)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Serialize, Debug)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: String,
    pub email_verified: bool,
}

#[derive(Deserialize, Debug)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Serialize, Debug)]
pub struct SessionTokenResponse {
    pub token: String,
}

#[derive(Deserialize, Debug)]
pub struct CodeRequest {
    pub token: String,
    pub code: String,
}

#[derive(Deserialize, Debug)]
pub struct SignupConfirmRequest {
    pub token: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct PasswordResetCompleteRequest {
    pub token: String,
    pub new_password: String,
}

fn session_error_response(err: &SessionValidateError) -> (StatusCode, String) {
    match err {
        SessionValidateError::Invalid => (StatusCode::UNAUTHORIZED, "Invalid session".to_string()),
        SessionValidateError::Expired => (StatusCode::UNAUTHORIZED, "Session expired".to_string()),
        SessionValidateError::Storage(err) => {
            error!("session validation failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
        }
    }
}

fn code_error_response(err: &CodeConfirmError) -> (StatusCode, String) {
    match err {
        CodeConfirmError::InvalidCode => (StatusCode::BAD_REQUEST, "Invalid code".to_string()),
        CodeConfirmError::AlreadyVerified => {
            (StatusCode::CONFLICT, "Already verified".to_string())
        }
        CodeConfirmError::Storage(err) => {
            error!("code confirmation failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
        }
    }
}

pub async fn login(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match state.flows.login(&request.email, &request.password).await {
        Ok((session, token)) => Json(TokenResponse {
            token,
            expires_at: session.expires_at.unix_timestamp(),
        })
        .into_response(),
        Err(LoginError::InvalidCredentials) => {
            (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()).into_response()
        }
        Err(LoginError::Storage(err)) => {
            error!("login failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
                .into_response()
        }
    }
}

pub async fn logout(state: Extension<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = extract_bearer_token(&headers) {
        if let Err(err) = state.flows.logout(&token).await {
            error!("Failed to delete session: {err:#}");
        }
    }
    // Logout always succeeds from the client's point of view.
    StatusCode::NO_CONTENT
}

pub async fn session(state: Extension<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    // Missing tokens are treated as "no session" to avoid leaking auth state.
    let Some(token) = extract_bearer_token(&headers) else {
        return StatusCode::NO_CONTENT.into_response();
    };

    match state.flows.validate_login(&token).await {
        Ok((_, user)) => Json(SessionResponse {
            user_id: user.id.to_string(),
            email: user.email,
            email_verified: user.email_verified,
        })
        .into_response(),
        Err(SessionValidateError::Invalid | SessionValidateError::Expired) => {
            StatusCode::NO_CONTENT.into_response()
        }
        Err(SessionValidateError::Storage(err)) => {
            error!("Failed to lookup session: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn signup_request(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<EmailRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match state.flows.signup_request(&request.email).await {
        Ok((_, token)) => Json(SessionTokenResponse { token }).into_response(),
        Err(SignupRequestError::InvalidEmail) => {
            (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response()
        }
        Err(SignupRequestError::EmailAlreadyUsed) => {
            (StatusCode::CONFLICT, "Email already registered".to_string()).into_response()
        }
        Err(SignupRequestError::Storage(err)) => {
            error!("signup request failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
                .into_response()
        }
    }
}

pub async fn signup_verify(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<CodeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match state.flows.signup_verify(&request.token, &request.code).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(crate::auth::flows::CodeVerifyError::Session(err)) => {
            session_error_response(&err).into_response()
        }
        Err(crate::auth::flows::CodeVerifyError::Code(err)) => {
            code_error_response(&err).into_response()
        }
    }
}

pub async fn signup_confirm(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<SignupConfirmRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match state
        .flows
        .signup_confirm(&request.token, &request.display_name, &request.password)
        .await
    {
        Ok((_, session, token)) => Json(TokenResponse {
            token,
            expires_at: session.expires_at.unix_timestamp(),
        })
        .into_response(),
        Err(SignupConfirmError::Session(err)) => session_error_response(&err).into_response(),
        Err(SignupConfirmError::EmailVerificationRequired) => (
            StatusCode::FORBIDDEN,
            "Email verification required".to_string(),
        )
            .into_response(),
        Err(SignupConfirmError::EmailAlreadyRegistered) => {
            (StatusCode::CONFLICT, "Email already registered".to_string()).into_response()
        }
        Err(SignupConfirmError::Storage(err)) => {
            error!("signup confirm failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
                .into_response()
        }
    }
}

pub async fn email_verification_request(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "Missing session".to_string()).into_response();
    };
    let user = match state.flows.validate_login(&token).await {
        Ok((_, user)) => user,
        Err(err) => return session_error_response(&err).into_response(),
    };

    match state.flows.email_verification_request(&user).await {
        Ok((_, verification_token)) => Json(SessionTokenResponse {
            token: verification_token,
        })
        .into_response(),
        Err(err) => {
            error!("email verification request failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
                .into_response()
        }
    }
}

pub async fn email_verification_confirm(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<CodeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match state
        .flows
        .email_verification_confirm(&request.token, &request.code)
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(crate::auth::flows::CodeVerifyError::Session(err)) => {
            session_error_response(&err).into_response()
        }
        Err(crate::auth::flows::CodeVerifyError::Code(err)) => {
            code_error_response(&err).into_response()
        }
    }
}

pub async fn password_reset_request(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<EmailRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match state.flows.password_reset_request(&request.email).await {
        Ok((_, token)) => Json(SessionTokenResponse { token }).into_response(),
        Err(PasswordResetRequestError::UserNotFound) => {
            // Unknown emails get an unpersisted decoy token; the response
            // shape never reveals whether an account exists.
            match decoy_token() {
                Ok(token) => Json(SessionTokenResponse { token }).into_response(),
                Err(err) => {
                    error!("failed to build decoy reset token: {err:#}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal error".to_string(),
                    )
                        .into_response()
                }
            }
        }
        Err(PasswordResetRequestError::Storage(err)) => {
            error!("password reset request failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
                .into_response()
        }
    }
}

fn decoy_token() -> anyhow::Result<String> {
    let secret = Sha256SecretHasher.generate()?;
    Ok(format_token(&SessionId::new().to_string(), &secret))
}

pub async fn password_reset_verify(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<CodeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match state
        .flows
        .password_reset_verify(&request.token, &request.code)
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(crate::auth::flows::CodeVerifyError::Session(err)) => {
            session_error_response(&err).into_response()
        }
        Err(crate::auth::flows::CodeVerifyError::Code(err)) => {
            code_error_response(&err).into_response()
        }
    }
}

pub async fn password_reset_complete(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<PasswordResetCompleteRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match state
        .flows
        .password_reset_complete(&request.token, &request.new_password)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(PasswordResetCompleteError::Session(err)) => {
            session_error_response(&err).into_response()
        }
        Err(PasswordResetCompleteError::EmailVerificationRequired) => (
            StatusCode::FORBIDDEN,
            "Email verification required".to_string(),
        )
            .into_response(),
        Err(PasswordResetCompleteError::Storage(err)) => {
            error!("password reset complete failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
                .into_response()
        }
    }
}
