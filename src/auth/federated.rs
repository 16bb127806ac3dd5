//! External identity orchestration: the provider request/callback round
//! trip for login, signup, and account linking.
//!
//! The callback is a decision table over `(identity lookup, email lookup)`:
//! a known identity logs in, a known email becomes an association offer
//! (never an auto-link), and an unknown identity either signs up or is
//! rejected depending on the intent. Every error after redirect validation
//! carries the validated client redirect URL so the HTTP layer always has
//! somewhere safe to send the user.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use super::config::AuthConfig;
use super::gateway::{ProviderGateway, ProviderIdentity};
use super::lifecycle::SessionManager;
use super::redirect::{validate_redirect_uri, ClientSurface};
use super::repository::{ExternalIdentityRepository, IdentitySaveError, UserRepository};
use super::session::{
    AccountAssociationSession, ExternalIdentity, ExternalProvider, LoginSession, User, UserId,
};
use super::signed_state::{SignedStateError, StateSigner};

const STATE_PURPOSE: &str = "federated-auth";

/// What the caller is trying to accomplish with the round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederatedIntent {
    /// Log into an existing account.
    Login,
    /// Log in, creating an account when the identity is unknown.
    Signup,
    /// Attach the identity to the already-authenticated caller.
    Link,
}

/// Context smuggled through the provider redirect inside the signed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedStatePayload {
    pub client: ClientSurface,
    /// Caller's user id, present only for link flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_user: Option<UserId>,
}

/// Everything the HTTP layer needs to kick off the redirect.
#[derive(Debug, Clone)]
pub struct FederatedRequest {
    pub state: String,
    pub code_verifier: String,
    pub redirect_to_client: Url,
    pub redirect_to_provider: Url,
}

/// Parameters the provider sent back to the callback endpoint.
#[derive(Debug, Clone)]
pub struct CallbackQuery {
    pub state: String,
    pub code: Option<String>,
    pub error: Option<String>,
    pub redirect_uri: String,
    pub code_verifier: String,
}

/// How a successful callback resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantFlow {
    LoggedIn,
    SignedUp,
    Linked,
}

/// Successful callback outcome: a fresh login session plus the redirect
/// context for the client surface.
#[derive(Debug, Clone)]
pub struct FederatedGrant {
    pub session: LoginSession,
    pub token: String,
    pub redirect_url: Url,
    pub client: ClientSurface,
    pub flow: GrantFlow,
}

#[derive(Debug, Error)]
pub enum FederatedRequestError {
    #[error("no gateway registered for provider")]
    UnknownProvider,
    #[error("redirect uri is not allow-listed")]
    InvalidRedirectUri,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum FederatedCallbackError {
    #[error("no gateway registered for provider")]
    UnknownProvider,
    #[error("signed state rejected")]
    InvalidState,
    #[error("redirect uri is not allow-listed")]
    InvalidRedirectUri,
    #[error("user denied access at the provider")]
    ProviderAccessDenied { redirect_url: Url },
    #[error("provider reported an error")]
    ProviderError { redirect_url: Url },
    /// Missing code or failed exchange. No redirect context: this is a
    /// malformed callback, not a user decision.
    #[error("authorization code exchange failed")]
    TokenExchangeFailed,
    #[error("identity fetch failed")]
    IdentityFetchFailed { redirect_url: Url },
    /// Login-only: nothing to log into and nothing to associate.
    #[error("no account matches this identity")]
    AccountNotFound { redirect_url: Url },
    /// A local account shares the identity's email. A codeless association
    /// session was minted; the challenge happens in a separate step.
    #[error("identity can be associated with an existing account")]
    AssociationAvailable {
        session: AccountAssociationSession,
        token: String,
        redirect_url: Url,
        client: ClientSurface,
    },
    /// Link flow: the caller already owns this identity or another one
    /// from the same provider.
    #[error("provider is already linked to this account")]
    ProviderAlreadyLinked { redirect_url: Url },
    /// The identity belongs to a different local account.
    #[error("identity is linked to another account")]
    LinkedElsewhere { redirect_url: Url },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Fresh PKCE verifier (43 url-safe chars from 32 random bytes).
///
/// # Errors
///
/// Returns an error if the system RNG fails.
pub fn generate_code_verifier() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| anyhow::anyhow!("failed to generate code verifier: {err}"))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// S256 code challenge for a PKCE verifier.
#[must_use]
pub fn code_challenge_s256(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

pub struct FederatedAuthService {
    gateways: HashMap<ExternalProvider, Arc<dyn ProviderGateway>>,
    signer: StateSigner<FederatedStatePayload>,
    users: Arc<dyn UserRepository>,
    identities: Arc<dyn ExternalIdentityRepository>,
    login_sessions: SessionManager<LoginSession>,
    association_sessions: SessionManager<AccountAssociationSession>,
    config: Arc<AuthConfig>,
}

impl FederatedAuthService {
    pub fn new(
        gateways: HashMap<ExternalProvider, Arc<dyn ProviderGateway>>,
        users: Arc<dyn UserRepository>,
        identities: Arc<dyn ExternalIdentityRepository>,
        login_sessions: SessionManager<LoginSession>,
        association_sessions: SessionManager<AccountAssociationSession>,
        config: Arc<AuthConfig>,
    ) -> Self {
        let signer = StateSigner::new(STATE_PURPOSE, config.state_secret().clone());
        Self {
            gateways,
            signer,
            users,
            identities,
            login_sessions,
            association_sessions,
            config,
        }
    }

    /// Build the provider authorization redirect.
    ///
    /// # Errors
    ///
    /// `InvalidRedirectUri` when the target escapes the surface's
    /// allow-listed base; `UnknownProvider` for unregistered providers.
    pub fn request(
        &self,
        provider: ExternalProvider,
        client: ClientSurface,
        redirect_uri: &str,
        link_user: Option<UserId>,
    ) -> Result<FederatedRequest, FederatedRequestError> {
        let gateway = self
            .gateways
            .get(&provider)
            .ok_or(FederatedRequestError::UnknownProvider)?;

        let base = self.config.surface_base(client);
        let redirect_to_client = validate_redirect_uri(base, redirect_uri)
            .ok_or(FederatedRequestError::InvalidRedirectUri)?;

        let state = self
            .signer
            .generate(FederatedStatePayload { client, link_user })?;
        let code_verifier = generate_code_verifier()?;
        let redirect_to_provider = gateway.authorization_url(&state, &code_verifier);

        Ok(FederatedRequest {
            state,
            code_verifier,
            redirect_to_client,
            redirect_to_provider,
        })
    }

    /// Drive the provider callback to a terminal outcome.
    ///
    /// # Errors
    ///
    /// See [`FederatedCallbackError`]; every variant is a terminal verdict
    /// the HTTP layer maps to a response, not a retryable condition.
    pub async fn callback(
        &self,
        provider: ExternalProvider,
        intent: FederatedIntent,
        query: CallbackQuery,
    ) -> Result<FederatedGrant, FederatedCallbackError> {
        let gateway = self
            .gateways
            .get(&provider)
            .ok_or(FederatedCallbackError::UnknownProvider)?;

        let payload = match self.signer.validate(&query.state) {
            Ok(payload) => payload,
            Err(SignedStateError::InvalidSignedState | SignedStateError::FailedToDecode) => {
                return Err(FederatedCallbackError::InvalidState);
            }
        };
        // A state minted for a link flow must not be replayed into
        // login/signup, and vice versa.
        match (intent, payload.link_user) {
            (FederatedIntent::Link, None) => return Err(FederatedCallbackError::InvalidState),
            (FederatedIntent::Login | FederatedIntent::Signup, Some(_)) => {
                return Err(FederatedCallbackError::InvalidState);
            }
            _ => {}
        }

        let base = self.config.surface_base(payload.client);
        let redirect_url = validate_redirect_uri(base, &query.redirect_uri)
            .ok_or(FederatedCallbackError::InvalidRedirectUri)?;

        if let Some(error) = query.error.as_deref() {
            if error == "access_denied" {
                return Err(FederatedCallbackError::ProviderAccessDenied { redirect_url });
            }
            debug!(provider = %provider, error, "provider returned an error parameter");
            return Err(FederatedCallbackError::ProviderError { redirect_url });
        }

        let Some(code) = query.code.as_deref() else {
            return Err(FederatedCallbackError::TokenExchangeFailed);
        };

        let tokens = gateway
            .exchange_code(code, &query.code_verifier)
            .await
            .map_err(|_| FederatedCallbackError::TokenExchangeFailed)?;

        let identity_result = gateway.fetch_identity(&tokens).await;
        // Cleanup regardless of the fetch outcome; failures stay inside the
        // gateway and never affect this callback.
        gateway.revoke_tokens(&tokens).await;

        let identity = identity_result
            .map_err(|_| FederatedCallbackError::IdentityFetchFailed { redirect_url: redirect_url.clone() })?;

        match intent {
            FederatedIntent::Link => {
                // Checked above; link states always carry the caller.
                let link_user = payload
                    .link_user
                    .ok_or(FederatedCallbackError::InvalidState)?;
                self.link(provider, link_user, &identity, redirect_url, payload.client)
                    .await
            }
            FederatedIntent::Login | FederatedIntent::Signup => {
                self.login_or_signup(provider, intent, &identity, redirect_url, payload.client)
                    .await
            }
        }
    }

    async fn login_or_signup(
        &self,
        provider: ExternalProvider,
        intent: FederatedIntent,
        identity: &ProviderIdentity,
        redirect_url: Url,
        client: ClientSurface,
    ) -> Result<FederatedGrant, FederatedCallbackError> {
        let existing_identity = self
            .identities
            .find_by_provider_and_provider_user_id(provider, &identity.provider_user_id)
            .await?;

        if let Some(existing) = existing_identity {
            let (session, token) = self.issue_login(existing.user_id).await?;
            info!(user_id = %existing.user_id, provider = %provider, "federated login");
            return Ok(FederatedGrant {
                session,
                token,
                redirect_url,
                client,
                flow: GrantFlow::LoggedIn,
            });
        }

        if let Some(user) = self.users.find_by_email(&identity.email).await? {
            // Same email, unknown identity: never auto-link. Offer an
            // association instead; the code challenge is a separate,
            // explicit step so discovery can never spam the mailbox.
            self.association_sessions
                .store()
                .delete_by_owner(&user.id)
                .await?;
            let (session, token) = self
                .association_sessions
                .issue(|id, secret_hash, expires_at| AccountAssociationSession {
                    id,
                    user_id: user.id,
                    email: user.email.clone(),
                    provider,
                    provider_user_id: identity.provider_user_id.clone(),
                    code: None,
                    secret_hash,
                    expires_at,
                })
                .await?;
            return Err(FederatedCallbackError::AssociationAvailable {
                session,
                token,
                redirect_url,
                client,
            });
        }

        if intent == FederatedIntent::Login {
            return Err(FederatedCallbackError::AccountNotFound { redirect_url });
        }

        // Signup: create the user and the identity before returning, so a
        // half-completed flow leaves nothing a retry cannot redo.
        let user = User {
            id: UserId::new(),
            email: identity.email.clone(),
            email_verified: identity.email_verified,
            password_hash: None,
            display_name: identity.display_name.clone(),
            icon_url: identity.icon_url.clone(),
        };
        self.users.create(&user).await?;

        let record = ExternalIdentity::new(provider, identity.provider_user_id.clone(), user.id);
        match self.identities.save(&record).await {
            Ok(()) => {}
            // Lost the race against a concurrent link of the same identity;
            // the store's uniqueness constraint is the safety net.
            Err(IdentitySaveError::Conflict) => {
                return Err(FederatedCallbackError::LinkedElsewhere { redirect_url });
            }
            Err(IdentitySaveError::Storage(err)) => return Err(err.into()),
        }

        let (session, token) = self.issue_login(user.id).await?;
        info!(user_id = %user.id, provider = %provider, "federated signup");
        Ok(FederatedGrant {
            session,
            token,
            redirect_url,
            client,
            flow: GrantFlow::SignedUp,
        })
    }

    async fn link(
        &self,
        provider: ExternalProvider,
        link_user: UserId,
        identity: &ProviderIdentity,
        redirect_url: Url,
        client: ClientSurface,
    ) -> Result<FederatedGrant, FederatedCallbackError> {
        let existing_identity = self
            .identities
            .find_by_provider_and_provider_user_id(provider, &identity.provider_user_id)
            .await?;
        if let Some(existing) = existing_identity {
            if existing.user_id == link_user {
                return Err(FederatedCallbackError::ProviderAlreadyLinked { redirect_url });
            }
            return Err(FederatedCallbackError::LinkedElsewhere { redirect_url });
        }

        // One identity per provider per user.
        if self
            .identities
            .find_by_user_id_and_provider(link_user, provider)
            .await?
            .is_some()
        {
            return Err(FederatedCallbackError::ProviderAlreadyLinked { redirect_url });
        }

        let record = ExternalIdentity::new(provider, identity.provider_user_id.clone(), link_user);
        match self.identities.save(&record).await {
            Ok(()) => {}
            Err(IdentitySaveError::Conflict) => {
                return Err(FederatedCallbackError::LinkedElsewhere { redirect_url });
            }
            Err(IdentitySaveError::Storage(err)) => return Err(err.into()),
        }

        let (session, token) = self.issue_login(link_user).await?;
        info!(user_id = %link_user, provider = %provider, "identity linked");
        Ok(FederatedGrant {
            session,
            token,
            redirect_url,
            client,
            flow: GrantFlow::Linked,
        })
    }

    async fn issue_login(&self, user_id: UserId) -> anyhow::Result<(LoginSession, String)> {
        self.login_sessions
            .issue(|id, secret_hash, expires_at| LoginSession {
                id,
                user_id,
                secret_hash,
                expires_at,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::secret::Sha256SecretHasher;
    use crate::auth::testing::{
        MemoryExternalIdentityRepository, MemorySessionStore, MemoryUserRepository,
        StubProviderGateway,
    };
    use secrecy::SecretString;

    struct Harness {
        service: FederatedAuthService,
        users: Arc<MemoryUserRepository>,
        identities: Arc<MemoryExternalIdentityRepository>,
        login_store: Arc<MemorySessionStore<LoginSession>>,
        association_store: Arc<MemorySessionStore<AccountAssociationSession>>,
        gateway: Arc<StubProviderGateway>,
    }

    fn config() -> Arc<AuthConfig> {
        Arc::new(AuthConfig::new(
            Url::parse("https://app.pordisto.dev").expect("web"),
            Url::parse("pordisto://app").expect("mobile"),
            SecretString::from("state-signing-secret"),
        ))
    }

    fn identity_fixture() -> ProviderIdentity {
        ProviderIdentity {
            provider_user_id: "provider-user-1".to_string(),
            email: "person@example.com".to_string(),
            display_name: "Person".to_string(),
            icon_url: None,
            email_verified: true,
        }
    }

    fn harness(gateway: StubProviderGateway) -> Harness {
        let users = Arc::new(MemoryUserRepository::new());
        let identities = Arc::new(MemoryExternalIdentityRepository::new());
        let login_store = Arc::new(MemorySessionStore::new());
        let association_store = Arc::new(MemorySessionStore::new());
        let hasher = Arc::new(Sha256SecretHasher);
        let gateway = Arc::new(gateway);

        let mut gateways: HashMap<ExternalProvider, Arc<dyn ProviderGateway>> = HashMap::new();
        gateways.insert(ExternalProvider::Google, gateway.clone());

        let service = FederatedAuthService::new(
            gateways,
            users.clone(),
            identities.clone(),
            SessionManager::new(login_store.clone(), hasher.clone()),
            SessionManager::new(association_store.clone(), hasher),
            config(),
        );

        Harness {
            service,
            users,
            identities,
            login_store,
            association_store,
            gateway,
        }
    }

    fn callback_query(service: &FederatedAuthService, link_user: Option<UserId>) -> CallbackQuery {
        let request = service
            .request(
                ExternalProvider::Google,
                ClientSurface::Web,
                "/after-auth",
                link_user,
            )
            .expect("request");
        CallbackQuery {
            state: request.state,
            code: Some("auth-code".to_string()),
            error: None,
            redirect_uri: "/after-auth".to_string(),
            code_verifier: request.code_verifier,
        }
    }

    #[test]
    fn request_rejects_foreign_redirect() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let result = harness.service.request(
            ExternalProvider::Google,
            ClientSurface::Web,
            "https://evil.example/",
            None,
        );
        assert!(matches!(
            result,
            Err(FederatedRequestError::InvalidRedirectUri)
        ));
    }

    #[test]
    fn request_returns_state_and_verifier() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let request = harness
            .service
            .request(ExternalProvider::Google, ClientSurface::Web, "/", None)
            .expect("request");
        assert!(request.state.contains('.'));
        assert!(request.code_verifier.len() >= 43);
        assert_eq!(
            request.redirect_to_client.as_str(),
            "https://app.pordisto.dev/"
        );
    }

    #[tokio::test]
    async fn tampered_state_is_terminal() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let mut query = callback_query(&harness.service, None);
        query.state.push('x');
        let result = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Login, query)
            .await;
        assert!(matches!(result, Err(FederatedCallbackError::InvalidState)));
    }

    #[tokio::test]
    async fn access_denied_carries_redirect_and_touches_nothing() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let mut query = callback_query(&harness.service, None);
        query.error = Some("access_denied".to_string());

        let result = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Login, query)
            .await;

        match result {
            Err(FederatedCallbackError::ProviderAccessDenied { redirect_url }) => {
                assert_eq!(redirect_url.path(), "/after-auth");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(harness.login_store.is_empty());
        assert!(harness.association_store.is_empty());
    }

    #[tokio::test]
    async fn other_provider_error_maps_to_provider_error() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let mut query = callback_query(&harness.service, None);
        query.error = Some("temporarily_unavailable".to_string());
        let result = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Login, query)
            .await;
        assert!(matches!(
            result,
            Err(FederatedCallbackError::ProviderError { .. })
        ));
    }

    #[tokio::test]
    async fn missing_code_is_a_malformed_callback() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let mut query = callback_query(&harness.service, None);
        query.code = None;
        let result = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Login, query)
            .await;
        assert!(matches!(
            result,
            Err(FederatedCallbackError::TokenExchangeFailed)
        ));
    }

    #[tokio::test]
    async fn known_identity_logs_in_without_new_rows() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let user = User {
            id: UserId::new(),
            email: "person@example.com".to_string(),
            email_verified: true,
            password_hash: None,
            display_name: "Person".to_string(),
            icon_url: None,
        };
        harness.users.insert(user.clone());
        harness
            .identities
            .save(&ExternalIdentity::new(
                ExternalProvider::Google,
                "provider-user-1".to_string(),
                user.id,
            ))
            .await
            .expect("seed identity");

        let query = callback_query(&harness.service, None);
        let grant = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Login, query)
            .await
            .expect("grant");

        assert_eq!(grant.flow, GrantFlow::LoggedIn);
        assert_eq!(grant.session.user_id, user.id);
        assert_eq!(harness.login_store.len(), 1);
        assert_eq!(harness.identities.len(), 1);
        assert_eq!(harness.gateway.revocation_count(), 1);
    }

    #[tokio::test]
    async fn matching_email_offers_association_without_email() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let user = User {
            id: UserId::new(),
            email: "person@example.com".to_string(),
            email_verified: true,
            password_hash: Some("hash".to_string()),
            display_name: "Person".to_string(),
            icon_url: None,
        };
        harness.users.insert(user.clone());

        let query = callback_query(&harness.service, None);
        let result = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Login, query)
            .await;

        match result {
            Err(FederatedCallbackError::AssociationAvailable { session, .. }) => {
                assert_eq!(session.user_id, user.id);
                assert_eq!(session.code, None);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(harness.association_store.len(), 1);
        assert!(harness.login_store.is_empty());
        assert!(harness.identities.is_empty());
    }

    #[tokio::test]
    async fn rediscovery_replaces_the_pending_association() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let user = User {
            id: UserId::new(),
            email: "person@example.com".to_string(),
            email_verified: true,
            password_hash: Some("hash".to_string()),
            display_name: "Person".to_string(),
            icon_url: None,
        };
        harness.users.insert(user);

        for _ in 0..2 {
            let query = callback_query(&harness.service, None);
            let result = harness
                .service
                .callback(ExternalProvider::Google, FederatedIntent::Login, query)
                .await;
            assert!(matches!(
                result,
                Err(FederatedCallbackError::AssociationAvailable { .. })
            ));
        }
        // Single flight per user: the second discovery replaced the first.
        assert_eq!(harness.association_store.len(), 1);
    }

    #[tokio::test]
    async fn unknown_identity_on_login_reports_account_not_found() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let query = callback_query(&harness.service, None);
        let result = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Login, query)
            .await;
        assert!(matches!(
            result,
            Err(FederatedCallbackError::AccountNotFound { .. })
        ));
        assert!(harness.users.find_by_email("person@example.com").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn unknown_identity_on_signup_creates_account_and_identity() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let query = callback_query(&harness.service, None);
        let grant = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Signup, query)
            .await
            .expect("grant");

        assert_eq!(grant.flow, GrantFlow::SignedUp);
        let user = harness
            .users
            .find_by_email("person@example.com")
            .await
            .expect("find")
            .expect("created");
        assert!(user.email_verified);
        assert_eq!(harness.identities.len(), 1);
        assert_eq!(harness.login_store.len(), 1);
    }

    #[tokio::test]
    async fn link_with_identity_owned_by_caller_is_already_linked() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let caller = UserId::new();
        harness
            .identities
            .save(&ExternalIdentity::new(
                ExternalProvider::Google,
                "provider-user-1".to_string(),
                caller,
            ))
            .await
            .expect("seed identity");

        let query = callback_query(&harness.service, Some(caller));
        let result = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Link, query)
            .await;
        assert!(matches!(
            result,
            Err(FederatedCallbackError::ProviderAlreadyLinked { .. })
        ));
    }

    #[tokio::test]
    async fn link_with_identity_owned_by_other_user_is_linked_elsewhere() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        harness
            .identities
            .save(&ExternalIdentity::new(
                ExternalProvider::Google,
                "provider-user-1".to_string(),
                UserId::new(),
            ))
            .await
            .expect("seed identity");

        let query = callback_query(&harness.service, Some(UserId::new()));
        let result = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Link, query)
            .await;
        assert!(matches!(
            result,
            Err(FederatedCallbackError::LinkedElsewhere { .. })
        ));
    }

    #[tokio::test]
    async fn link_state_cannot_be_replayed_into_login() {
        let harness = harness(StubProviderGateway::returning_identity(identity_fixture()));
        let query = callback_query(&harness.service, Some(UserId::new()));
        let result = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Login, query)
            .await;
        assert!(matches!(result, Err(FederatedCallbackError::InvalidState)));
    }

    #[tokio::test]
    async fn exchange_failure_maps_to_token_exchange_failed() {
        use crate::auth::gateway::TokenExchangeError;
        let harness = harness(StubProviderGateway::failing_exchange(
            TokenExchangeError::CredentialsInvalid,
        ));
        let query = callback_query(&harness.service, None);
        let result = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Login, query)
            .await;
        assert!(matches!(
            result,
            Err(FederatedCallbackError::TokenExchangeFailed)
        ));
    }

    #[tokio::test]
    async fn identity_failure_still_revokes_tokens() {
        use crate::auth::gateway::IdentityFetchError;
        let harness = harness(StubProviderGateway::failing_identity(
            IdentityFetchError::FetchFailed,
        ));
        let query = callback_query(&harness.service, None);
        let result = harness
            .service
            .callback(ExternalProvider::Google, FederatedIntent::Login, query)
            .await;
        assert!(matches!(
            result,
            Err(FederatedCallbackError::IdentityFetchFailed { .. })
        ));
        assert_eq!(harness.gateway.revocation_count(), 1);
    }
}
