//! HTTP surface and process wiring.
//!
//! Handlers are deliberately thin: parse input, call a domain service,
//! map the verdict. All collaborators are constructed once here and
//! injected as `Extension`s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Extension, Router};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use crate::auth::association::AccountAssociationService;
use crate::auth::federated::FederatedAuthService;
use crate::auth::flows::AuthFlows;
use crate::auth::gateway::{EmailGateway, ProviderGateway};
use crate::auth::password::Argon2PasswordHasher;
use crate::auth::repository::SessionStore;
use crate::auth::secret::Sha256SecretHasher;
use crate::auth::session::{
    AccountAssociationSession, EmailVerificationSession, ExternalProvider, LoginSession,
    PasswordResetSession, SignupSession,
};
use crate::auth::{AuthConfig, SessionManager};
use crate::cli::actions::{EmailSenderKind, ServerSettings};
use crate::gateway::{
    DiscordGateway, GoogleGateway, LogEmailGateway, OutboxEmailGateway,
};
use crate::store::{
    PgAccountAssociationSessionStore, PgEmailVerificationSessionStore, PgExternalIdentityRepository,
    PgLoginSessionStore, PgPasswordResetSessionStore, PgSignupSessionStore, PgUserRepository,
};

pub(crate) mod handlers;

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Domain services shared by the handlers.
pub struct AppState {
    pub(crate) flows: AuthFlows,
    pub(crate) federated: FederatedAuthService,
    pub(crate) association: AccountAssociationService,
}

struct SweepTargets {
    login: Arc<dyn SessionStore<LoginSession>>,
    signup: Arc<dyn SessionStore<SignupSession>>,
    email_verification: Arc<dyn SessionStore<EmailVerificationSession>>,
    password_reset: Arc<dyn SessionStore<PasswordResetSession>>,
    association: Arc<dyn SessionStore<AccountAssociationSession>>,
}

impl SweepTargets {
    async fn sweep(&self) {
        let mut removed: u64 = 0;
        match self.login.delete_expired().await {
            Ok(count) => removed += count,
            Err(err) => warn!("failed to sweep login sessions: {err:#}"),
        }
        match self.signup.delete_expired().await {
            Ok(count) => removed += count,
            Err(err) => warn!("failed to sweep signup sessions: {err:#}"),
        }
        match self.email_verification.delete_expired().await {
            Ok(count) => removed += count,
            Err(err) => warn!("failed to sweep email verification sessions: {err:#}"),
        }
        match self.password_reset.delete_expired().await {
            Ok(count) => removed += count,
            Err(err) => warn!("failed to sweep password reset sessions: {err:#}"),
        }
        match self.association.delete_expired().await {
            Ok(count) => removed += count,
            Err(err) => warn!("failed to sweep account association sessions: {err:#}"),
        }
        if removed > 0 {
            info!(removed, "expired session sweep");
        }
    }
}

/// Deletion is the revocation mechanism, so the sweep is the only cleanup
/// expired rows ever need.
fn spawn_expiry_sweeper(targets: SweepTargets) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            targets.sweep().await;
        }
    });
}

/// Build the application router.
#[must_use]
pub fn router(state: Arc<AppState>, pool: PgPool, web_origin: HeaderValue) -> Router {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(web_origin))
        .allow_credentials(true);

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/v1/auth/login", post(handlers::auth::login))
        .route("/v1/auth/logout", post(handlers::auth::logout))
        .route("/v1/auth/session", get(handlers::auth::session))
        .route("/v1/auth/signup/request", post(handlers::auth::signup_request))
        .route("/v1/auth/signup/verify", post(handlers::auth::signup_verify))
        .route("/v1/auth/signup/confirm", post(handlers::auth::signup_confirm))
        .route(
            "/v1/auth/email-verification/request",
            post(handlers::auth::email_verification_request),
        )
        .route(
            "/v1/auth/email-verification/confirm",
            post(handlers::auth::email_verification_confirm),
        )
        .route(
            "/v1/auth/password-reset/request",
            post(handlers::auth::password_reset_request),
        )
        .route(
            "/v1/auth/password-reset/verify",
            post(handlers::auth::password_reset_verify),
        )
        .route(
            "/v1/auth/password-reset/complete",
            post(handlers::auth::password_reset_complete),
        )
        .route(
            "/v1/auth/federated/:provider/:flow",
            get(handlers::federated::request),
        )
        .route(
            "/v1/auth/federated/:provider/:flow/callback",
            get(handlers::federated::callback),
        )
        .route(
            "/v1/auth/association/challenge",
            post(handlers::association::challenge),
        )
        .route(
            "/v1/auth/association/confirm",
            post(handlers::association::confirm),
        )
        .layer(Extension(state))
        .layer(Extension(pool))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(cors)
}

fn origin_header(url: &Url) -> Result<HeaderValue> {
    let origin = url.origin().ascii_serialization();
    HeaderValue::from_str(&origin).context("invalid web origin for CORS")
}

/// Start the server: connect, wire the services, listen.
///
/// # Errors
///
/// Returns an error if the database is unreachable, configuration is
/// inconsistent, or the listener cannot bind.
pub async fn serve(settings: ServerSettings) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&settings.dsn)
        .await
        .context("Failed to connect to database")?;

    let config = Arc::new(AuthConfig::new(
        settings.web_base_url.clone(),
        settings.mobile_base_url.clone(),
        settings.state_secret.clone(),
    ));
    let hasher = Arc::new(Sha256SecretHasher);

    let login_store: Arc<dyn SessionStore<LoginSession>> =
        Arc::new(PgLoginSessionStore::new(pool.clone()));
    let signup_store: Arc<dyn SessionStore<SignupSession>> =
        Arc::new(PgSignupSessionStore::new(pool.clone()));
    let email_verification_store: Arc<dyn SessionStore<EmailVerificationSession>> =
        Arc::new(PgEmailVerificationSessionStore::new(pool.clone()));
    let password_reset_store: Arc<dyn SessionStore<PasswordResetSession>> =
        Arc::new(PgPasswordResetSessionStore::new(pool.clone()));
    let association_store: Arc<dyn SessionStore<AccountAssociationSession>> =
        Arc::new(PgAccountAssociationSessionStore::new(pool.clone()));

    let users = Arc::new(PgUserRepository::new(pool.clone()));
    let identities = Arc::new(PgExternalIdentityRepository::new(pool.clone()));

    let email: Arc<dyn EmailGateway> = match settings.email_sender {
        EmailSenderKind::Outbox => Arc::new(OutboxEmailGateway::new(pool.clone())),
        EmailSenderKind::Log => Arc::new(LogEmailGateway),
    };

    let http = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .build()
        .context("Failed to build outbound HTTP client")?;

    let mut gateways: HashMap<ExternalProvider, Arc<dyn ProviderGateway>> = HashMap::new();
    if let Some(credentials) = settings.google.clone() {
        gateways.insert(
            ExternalProvider::Google,
            Arc::new(GoogleGateway::new(http.clone(), credentials)),
        );
    }
    if let Some(credentials) = settings.discord.clone() {
        gateways.insert(
            ExternalProvider::Discord,
            Arc::new(DiscordGateway::new(http.clone(), credentials)),
        );
    }

    let login_sessions = SessionManager::new(login_store.clone(), hasher.clone());
    let signup_sessions = SessionManager::new(signup_store.clone(), hasher.clone());
    let email_verification_sessions =
        SessionManager::new(email_verification_store.clone(), hasher.clone());
    let password_reset_sessions = SessionManager::new(password_reset_store.clone(), hasher.clone());
    let association_sessions = SessionManager::new(association_store.clone(), hasher.clone());

    let flows = AuthFlows::new(
        users.clone(),
        Arc::new(Argon2PasswordHasher),
        email.clone(),
        login_sessions.clone(),
        signup_sessions,
        email_verification_sessions,
        password_reset_sessions,
    );
    let federated = FederatedAuthService::new(
        gateways,
        users.clone(),
        identities.clone(),
        login_sessions.clone(),
        association_sessions.clone(),
        config.clone(),
    );
    let association = AccountAssociationService::new(
        association_sessions,
        login_sessions,
        users,
        identities,
        email,
    );

    spawn_expiry_sweeper(SweepTargets {
        login: login_store,
        signup: signup_store,
        email_verification: email_verification_store,
        password_reset: password_reset_store,
        association: association_store,
    });

    let state = Arc::new(AppState {
        flows,
        federated,
        association,
    });
    let web_origin = origin_header(&settings.web_base_url)?;
    let app = router(state, pool, web_origin);

    let listener = TcpListener::bind(("0.0.0.0", settings.port))
        .await
        .with_context(|| format!("Failed to bind port {}", settings.port))?;
    info!(port = settings.port, "listening");

    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;
    Ok(())
}
