//! Credential flows: password login, signup, email re-verification, and
//! password reset. Each flow composes the generic lifecycle manager with
//! the user repository and the email gateway.

use std::sync::Arc;

use anyhow::Result;
use regex::Regex;
use thiserror::Error;
use tracing::info;

use super::gateway::EmailGateway;
use super::lifecycle::{CodeConfirmError, SessionManager, SessionValidateError};
use super::password::PasswordHasher;
use super::repository::UserRepository;
use super::secret::generate_verification_code;
use super::session::{
    EmailVerificationSession, LoginSession, PasswordResetSession, SessionId, SignupSession, User,
    UserId, VERIFICATION_CODE_LENGTH,
};
use super::token::parse_token;

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

#[derive(Debug, Error)]
pub enum LoginError {
    /// Unknown email and wrong password are indistinguishable on purpose.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SignupRequestError {
    #[error("email address is malformed")]
    InvalidEmail,
    #[error("email is already registered")]
    EmailAlreadyUsed,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CodeVerifyError {
    #[error(transparent)]
    Session(#[from] SessionValidateError),
    #[error(transparent)]
    Code(#[from] CodeConfirmError),
}

#[derive(Debug, Error)]
pub enum SignupConfirmError {
    #[error(transparent)]
    Session(#[from] SessionValidateError),
    /// The signup session's code was never confirmed.
    #[error("email verification required")]
    EmailVerificationRequired,
    /// Someone registered the email while the signup session was pending.
    #[error("email is already registered")]
    EmailAlreadyRegistered,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum PasswordResetRequestError {
    /// Surfaced to the HTTP layer, which answers opaquely either way.
    #[error("no account for this email")]
    UserNotFound,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum PasswordResetCompleteError {
    #[error(transparent)]
    Session(#[from] SessionValidateError),
    #[error("email verification required")]
    EmailVerificationRequired,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct AuthFlows {
    users: Arc<dyn UserRepository>,
    passwords: Arc<dyn PasswordHasher>,
    email: Arc<dyn EmailGateway>,
    login_sessions: SessionManager<LoginSession>,
    signup_sessions: SessionManager<SignupSession>,
    email_verification_sessions: SessionManager<EmailVerificationSession>,
    password_reset_sessions: SessionManager<PasswordResetSession>,
}

impl AuthFlows {
    pub fn new(
        users: Arc<dyn UserRepository>,
        passwords: Arc<dyn PasswordHasher>,
        email: Arc<dyn EmailGateway>,
        login_sessions: SessionManager<LoginSession>,
        signup_sessions: SessionManager<SignupSession>,
        email_verification_sessions: SessionManager<EmailVerificationSession>,
        password_reset_sessions: SessionManager<PasswordResetSession>,
    ) -> Self {
        Self {
            users,
            passwords,
            email,
            login_sessions,
            signup_sessions,
            email_verification_sessions,
            password_reset_sessions,
        }
    }

    /// Primary password login.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for unknown email, passwordless account, or
    /// wrong password — indistinguishable by design.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(LoginSession, String), LoginError> {
        let email = normalize_email(email);
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(LoginError::InvalidCredentials)?;
        let stored_hash = user
            .password_hash
            .as_deref()
            .ok_or(LoginError::InvalidCredentials)?;
        if !self.passwords.verify(password, stored_hash) {
            return Err(LoginError::InvalidCredentials);
        }

        let grant = self.issue_login(user.id).await?;
        info!(user_id = %user.id, "password login");
        Ok(grant)
    }

    /// Validate a login token; slides the expiry when it runs low.
    ///
    /// # Errors
    ///
    /// Standard lifecycle verdicts.
    pub async fn validate_login(
        &self,
        token: &str,
    ) -> Result<(LoginSession, User), SessionValidateError> {
        let (mut session, user) = self
            .login_sessions
            .validate_for_user(token, self.users.as_ref())
            .await?;
        self.login_sessions.refresh_if_stale(&mut session).await;
        Ok((session, user))
    }

    /// Revoke the session behind a token. Malformed or unknown tokens are
    /// a no-op; logout never fails for the client's sake.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store itself fails.
    pub async fn logout(&self, token: &str) -> Result<()> {
        let Some((id_text, _)) = parse_token(token) else {
            return Ok(());
        };
        let Some(id) = SessionId::parse(id_text) else {
            return Ok(());
        };
        self.login_sessions.delete(id).await
    }

    /// Revoke every login session of a user.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store itself fails.
    pub async fn logout_all(&self, user_id: UserId) -> Result<()> {
        self.login_sessions.store().delete_by_owner(&user_id).await
    }

    /// Start a signup: mint a coded signup session and email the code.
    /// Single flight per email; a prior pending signup is replaced.
    ///
    /// # Errors
    ///
    /// `InvalidEmail`, `EmailAlreadyUsed`, or storage/delivery failures.
    pub async fn signup_request(
        &self,
        email: &str,
    ) -> Result<(SignupSession, String), SignupRequestError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(SignupRequestError::InvalidEmail);
        }
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(SignupRequestError::EmailAlreadyUsed);
        }

        self.signup_sessions.store().delete_by_owner(&email).await?;

        let code = generate_verification_code(VERIFICATION_CODE_LENGTH);
        let (session, token) = self
            .signup_sessions
            .issue(|id, secret_hash, expires_at| SignupSession {
                id,
                email: email.clone(),
                email_verified: false,
                code: Some(code.clone()),
                secret_hash,
                expires_at,
            })
            .await?;

        self.email.send_verification_email(&email, &code).await?;
        Ok((session, token))
    }

    /// Confirm the signup code, promoting the session.
    ///
    /// # Errors
    ///
    /// Lifecycle or code verdicts.
    pub async fn signup_verify(
        &self,
        token: &str,
        code: &str,
    ) -> Result<SignupSession, CodeVerifyError> {
        let mut session = self.signup_sessions.validate(token).await?;
        self.signup_sessions
            .confirm_code(&mut session, code)
            .await?;
        Ok(session)
    }

    /// Create the account from a promoted signup session and log in.
    ///
    /// # Errors
    ///
    /// `EmailVerificationRequired` for unpromoted sessions;
    /// `EmailAlreadyRegistered` when the email was taken meanwhile (the
    /// session is consumed so the flow restarts cleanly).
    pub async fn signup_confirm(
        &self,
        token: &str,
        display_name: &str,
        password: &str,
    ) -> Result<(User, LoginSession, String), SignupConfirmError> {
        let session = self.signup_sessions.validate(token).await?;
        if !session.email_verified {
            return Err(SignupConfirmError::EmailVerificationRequired);
        }

        if self.users.find_by_email(&session.email).await?.is_some() {
            self.signup_sessions.delete(session.id).await?;
            return Err(SignupConfirmError::EmailAlreadyRegistered);
        }

        let password_hash = self.passwords.hash(password)?;
        let user = User {
            id: UserId::new(),
            email: session.email.clone(),
            email_verified: true,
            password_hash: Some(password_hash),
            display_name: display_name.to_string(),
            icon_url: None,
        };
        self.users.create(&user).await?;

        let (login, login_token) = self.issue_login(user.id).await?;
        self.signup_sessions.delete(session.id).await?;

        info!(user_id = %user.id, "signup completed");
        Ok((user, login, login_token))
    }

    /// Start re-verification of the caller's current email address.
    /// Single flight per user.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence or email delivery fails.
    pub async fn email_verification_request(
        &self,
        user: &User,
    ) -> Result<(EmailVerificationSession, String)> {
        self.email_verification_sessions
            .store()
            .delete_by_owner(&user.id)
            .await?;

        let code = generate_verification_code(VERIFICATION_CODE_LENGTH);
        let user_id = user.id;
        let email = user.email.clone();
        let (session, token) = self
            .email_verification_sessions
            .issue(|id, secret_hash, expires_at| EmailVerificationSession {
                id,
                user_id,
                email: email.clone(),
                email_verified: false,
                code: Some(code.clone()),
                secret_hash,
                expires_at,
            })
            .await?;

        self.email
            .send_verification_email(&session.email, &code)
            .await?;
        Ok((session, token))
    }

    /// Confirm the emailed code: consumes the session and marks the user's
    /// email verified.
    ///
    /// # Errors
    ///
    /// Lifecycle or code verdicts.
    pub async fn email_verification_confirm(
        &self,
        token: &str,
        code: &str,
    ) -> Result<User, CodeVerifyError> {
        let (mut session, mut user) = self
            .email_verification_sessions
            .validate_for_user(token, self.users.as_ref())
            .await?;
        // One-shot kind: a correct code deletes the session here.
        self.email_verification_sessions
            .confirm_code(&mut session, code)
            .await?;

        user.email_verified = true;
        self.users
            .update(&user)
            .await
            .map_err(SessionValidateError::from)?;
        Ok(user)
    }

    /// Start a password reset. The HTTP layer answers opaquely whether or
    /// not the email exists.
    ///
    /// # Errors
    ///
    /// `UserNotFound` or storage/delivery failures.
    pub async fn password_reset_request(
        &self,
        email: &str,
    ) -> Result<(PasswordResetSession, String), PasswordResetRequestError> {
        let email = normalize_email(email);
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(PasswordResetRequestError::UserNotFound)?;

        self.password_reset_sessions
            .store()
            .delete_by_owner(&user.id)
            .await?;

        let code = generate_verification_code(VERIFICATION_CODE_LENGTH);
        let user_id = user.id;
        let user_email = user.email.clone();
        let (session, token) = self
            .password_reset_sessions
            .issue(|id, secret_hash, expires_at| PasswordResetSession {
                id,
                user_id,
                email: user_email.clone(),
                email_verified: false,
                code: Some(code.clone()),
                secret_hash,
                expires_at,
            })
            .await?;

        self.email
            .send_verification_email(&session.email, &code)
            .await?;
        Ok((session, token))
    }

    /// Confirm the reset code; promotion opens the longer completion
    /// window.
    ///
    /// # Errors
    ///
    /// Lifecycle or code verdicts.
    pub async fn password_reset_verify(
        &self,
        token: &str,
        code: &str,
    ) -> Result<PasswordResetSession, CodeVerifyError> {
        let (mut session, _user) = self
            .password_reset_sessions
            .validate_for_user(token, self.users.as_ref())
            .await?;
        self.password_reset_sessions
            .confirm_code(&mut session, code)
            .await?;
        Ok(session)
    }

    /// Set the new password. Deletes every reset session and every login
    /// session of the user, forcing a fresh login everywhere.
    ///
    /// # Errors
    ///
    /// `EmailVerificationRequired` when the code was never confirmed.
    pub async fn password_reset_complete(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), PasswordResetCompleteError> {
        let (session, mut user) = self
            .password_reset_sessions
            .validate_for_user(token, self.users.as_ref())
            .await?;
        if !session.email_verified {
            return Err(PasswordResetCompleteError::EmailVerificationRequired);
        }

        user.password_hash = Some(self.passwords.hash(new_password)?);
        self.users.update(&user).await?;

        self.password_reset_sessions
            .store()
            .delete_by_owner(&user.id)
            .await?;
        self.login_sessions.store().delete_by_owner(&user.id).await?;

        info!(user_id = %user.id, "password reset completed");
        Ok(())
    }

    async fn issue_login(&self, user_id: UserId) -> Result<(LoginSession, String)> {
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
    use crate::auth::password::Argon2PasswordHasher;
    use crate::auth::secret::Sha256SecretHasher;
    use crate::auth::testing::{
        MemorySessionStore, MemoryUserRepository, RecordingEmailGateway,
    };

    struct Harness {
        flows: AuthFlows,
        users: Arc<MemoryUserRepository>,
        login_store: Arc<MemorySessionStore<LoginSession>>,
        signup_store: Arc<MemorySessionStore<SignupSession>>,
        email_verification_store: Arc<MemorySessionStore<EmailVerificationSession>>,
        password_reset_store: Arc<MemorySessionStore<PasswordResetSession>>,
        email: Arc<RecordingEmailGateway>,
    }

    fn harness() -> Harness {
        let users = Arc::new(MemoryUserRepository::new());
        let login_store = Arc::new(MemorySessionStore::new());
        let signup_store = Arc::new(MemorySessionStore::new());
        let email_verification_store = Arc::new(MemorySessionStore::new());
        let password_reset_store = Arc::new(MemorySessionStore::new());
        let email = Arc::new(RecordingEmailGateway::new());
        let hasher = Arc::new(Sha256SecretHasher);

        let flows = AuthFlows::new(
            users.clone(),
            Arc::new(Argon2PasswordHasher),
            email.clone(),
            SessionManager::new(login_store.clone(), hasher.clone()),
            SessionManager::new(signup_store.clone(), hasher.clone()),
            SessionManager::new(email_verification_store.clone(), hasher.clone()),
            SessionManager::new(password_reset_store.clone(), hasher),
        );

        Harness {
            flows,
            users,
            login_store,
            signup_store,
            email_verification_store,
            password_reset_store,
            email,
        }
    }

    async fn seed_user(harness: &Harness, email: &str, password: &str) -> User {
        let hash = Argon2PasswordHasher.hash(password).expect("hash");
        let user = User {
            id: UserId::new(),
            email: email.to_string(),
            email_verified: true,
            password_hash: Some(hash),
            display_name: "Person".to_string(),
            icon_url: None,
        };
        harness.users.insert(user.clone());
        user
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[tokio::test]
    async fn login_round_trip() {
        let harness = harness();
        let user = seed_user(&harness, "person@example.com", "hunter2hunter2").await;

        let (session, token) = harness
            .flows
            .login("person@example.com", "hunter2hunter2")
            .await
            .expect("login");
        assert_eq!(session.user_id, user.id);

        let (validated, validated_user) =
            harness.flows.validate_login(&token).await.expect("validate");
        assert_eq!(validated.id, session.id);
        assert_eq!(validated_user.id, user.id);
    }

    #[tokio::test]
    async fn login_rejects_wrong_password_and_unknown_email_alike() {
        let harness = harness();
        seed_user(&harness, "person@example.com", "hunter2hunter2").await;

        assert!(matches!(
            harness.flows.login("person@example.com", "wrong").await,
            Err(LoginError::InvalidCredentials)
        ));
        assert!(matches!(
            harness.flows.login("nobody@example.com", "hunter2hunter2").await,
            Err(LoginError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let harness = harness();
        seed_user(&harness, "person@example.com", "hunter2hunter2").await;
        let (_, token) = harness
            .flows
            .login("person@example.com", "hunter2hunter2")
            .await
            .expect("login");

        harness.flows.logout(&token).await.expect("logout");
        assert!(harness.login_store.is_empty());
        // Second logout and garbage tokens are both no-ops.
        harness.flows.logout(&token).await.expect("logout again");
        harness.flows.logout("garbage").await.expect("logout garbage");
    }

    #[tokio::test]
    async fn logout_all_revokes_every_session_of_the_user() {
        let harness = harness();
        let user = seed_user(&harness, "person@example.com", "hunter2hunter2").await;
        for _ in 0..3 {
            harness
                .flows
                .login("person@example.com", "hunter2hunter2")
                .await
                .expect("login");
        }
        assert_eq!(harness.login_store.len(), 3);

        harness.flows.logout_all(user.id).await.expect("logout all");
        assert!(harness.login_store.is_empty());
    }

    #[tokio::test]
    async fn signup_flow_end_to_end() {
        let harness = harness();

        let (_, signup_token) = harness
            .flows
            .signup_request(" NewUser@Example.com ")
            .await
            .expect("request");
        assert_eq!(harness.email.sent_count(), 1);
        let (to, code) = harness.email.sent().pop().expect("email");
        assert_eq!(to, "newuser@example.com");

        let promoted = harness
            .flows
            .signup_verify(&signup_token, &code)
            .await
            .expect("verify");
        assert!(promoted.email_verified);

        let (user, _, login_token) = harness
            .flows
            .signup_confirm(&signup_token, "New User", "a-strong-password")
            .await
            .expect("confirm");
        assert_eq!(user.email, "newuser@example.com");
        assert!(user.email_verified);
        assert!(harness.signup_store.is_empty());

        let (_, validated_user) = harness
            .flows
            .validate_login(&login_token)
            .await
            .expect("validate");
        assert_eq!(validated_user.id, user.id);
    }

    #[tokio::test]
    async fn signup_confirm_requires_promotion() {
        let harness = harness();
        let (_, signup_token) = harness
            .flows
            .signup_request("newuser@example.com")
            .await
            .expect("request");

        let result = harness
            .flows
            .signup_confirm(&signup_token, "New User", "a-strong-password")
            .await;
        assert!(matches!(
            result,
            Err(SignupConfirmError::EmailVerificationRequired)
        ));
    }

    #[tokio::test]
    async fn signup_request_rejects_taken_email() {
        let harness = harness();
        seed_user(&harness, "person@example.com", "hunter2hunter2").await;
        assert!(matches!(
            harness.flows.signup_request("person@example.com").await,
            Err(SignupRequestError::EmailAlreadyUsed)
        ));
        assert_eq!(harness.email.sent_count(), 0);
    }

    #[tokio::test]
    async fn signup_request_replaces_pending_session_for_same_email() {
        let harness = harness();
        harness
            .flows
            .signup_request("newuser@example.com")
            .await
            .expect("first");
        harness
            .flows
            .signup_request("newuser@example.com")
            .await
            .expect("second");
        assert_eq!(harness.signup_store.len(), 1);
    }

    #[tokio::test]
    async fn email_verification_confirms_into_the_user() {
        let harness = harness();
        let mut user = seed_user(&harness, "person@example.com", "hunter2hunter2").await;
        user.email_verified = false;
        harness.users.insert(user.clone());

        let (_, token) = harness
            .flows
            .email_verification_request(&user)
            .await
            .expect("request");
        let (_, code) = harness.email.sent().pop().expect("email");

        let updated = harness
            .flows
            .email_verification_confirm(&token, &code)
            .await
            .expect("confirm");
        assert!(updated.email_verified);
        assert!(harness.users.get(user.id).expect("user").email_verified);
        // One-shot: the session is gone.
        assert!(harness.email_verification_store.is_empty());
    }

    #[tokio::test]
    async fn password_reset_revokes_every_login_session() {
        let harness = harness();
        seed_user(&harness, "person@example.com", "old-password-123").await;
        harness
            .flows
            .login("person@example.com", "old-password-123")
            .await
            .expect("login one");
        harness
            .flows
            .login("person@example.com", "old-password-123")
            .await
            .expect("login two");
        assert_eq!(harness.login_store.len(), 2);

        let (_, reset_token) = harness
            .flows
            .password_reset_request("person@example.com")
            .await
            .expect("request");
        let (_, code) = harness.email.sent().pop().expect("email");

        let promoted = harness
            .flows
            .password_reset_verify(&reset_token, &code)
            .await
            .expect("verify");
        assert!(promoted.email_verified);

        harness
            .flows
            .password_reset_complete(&reset_token, "brand-new-password")
            .await
            .expect("complete");

        assert!(harness.login_store.is_empty());
        assert!(harness.password_reset_store.is_empty());
        harness
            .flows
            .login("person@example.com", "brand-new-password")
            .await
            .expect("login with new password");
    }

    #[tokio::test]
    async fn password_reset_complete_requires_verified_session() {
        let harness = harness();
        seed_user(&harness, "person@example.com", "old-password-123").await;
        let (_, reset_token) = harness
            .flows
            .password_reset_request("person@example.com")
            .await
            .expect("request");

        let result = harness
            .flows
            .password_reset_complete(&reset_token, "brand-new-password")
            .await;
        assert!(matches!(
            result,
            Err(PasswordResetCompleteError::EmailVerificationRequired)
        ));
    }

    #[tokio::test]
    async fn password_reset_wrong_code_keeps_session_unverified() {
        let harness = harness();
        seed_user(&harness, "person@example.com", "old-password-123").await;
        let (_, reset_token) = harness
            .flows
            .password_reset_request("person@example.com")
            .await
            .expect("request");

        let result = harness
            .flows
            .password_reset_verify(&reset_token, "00000000")
            .await;
        assert!(matches!(
            result,
            Err(CodeVerifyError::Code(CodeConfirmError::InvalidCode))
        ));
    }
}
