//! Account association: the challenge/confirm sub-flow that links a
//! freshly-seen external identity to an existing local account.
//!
//! Discovery (in the federated callback) only mints a codeless session.
//! The resolver is the single place a code is generated and emailed, so
//! delivery happens once the user opts in and repeated discovery cannot
//! spam the mailbox. Re-challenges delete-then-recreate with no cooldown,
//! matching the source behavior.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::gateway::EmailGateway;
use super::lifecycle::{SessionManager, SessionValidateError};
use super::repository::{ExternalIdentityRepository, IdentitySaveError, UserRepository};
use super::secret::{constant_time_eq, generate_verification_code};
use super::session::{
    AccountAssociationSession, ExternalIdentity, LoginSession, User, UserId,
    VERIFICATION_CODE_LENGTH,
};

#[derive(Debug, Error)]
pub enum AssociationConfirmError {
    /// Missing (never challenged) or mismatched code. The session is left
    /// untouched so the user can retry.
    #[error("association code does not match")]
    InvalidCode,
    /// The caller already has an identity for this provider.
    #[error("account already has an identity for this provider")]
    AccountAlreadyLinked,
    /// The identity was claimed by a different account in the meantime.
    #[error("identity is linked to another account")]
    LinkedElsewhere,
    #[error("owning user no longer exists")]
    UserNotFound,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Outcome of a confirmed association: the identity is linked and the
/// caller holds a fresh login session.
#[derive(Debug, Clone)]
pub struct AssociationGrant {
    pub session: LoginSession,
    pub token: String,
}

pub struct AccountAssociationService {
    sessions: SessionManager<AccountAssociationSession>,
    login_sessions: SessionManager<LoginSession>,
    users: Arc<dyn UserRepository>,
    identities: Arc<dyn ExternalIdentityRepository>,
    email: Arc<dyn EmailGateway>,
}

impl AccountAssociationService {
    pub fn new(
        sessions: SessionManager<AccountAssociationSession>,
        login_sessions: SessionManager<LoginSession>,
        users: Arc<dyn UserRepository>,
        identities: Arc<dyn ExternalIdentityRepository>,
        email: Arc<dyn EmailGateway>,
    ) -> Self {
        Self {
            sessions,
            login_sessions,
            users,
            identities,
            email,
        }
    }

    /// Resolve an association token into a live session and its user.
    ///
    /// # Errors
    ///
    /// Standard lifecycle verdicts; a stale binding (user gone or email
    /// rotated) deletes the session and reports `Invalid`.
    pub async fn validate(
        &self,
        token: &str,
    ) -> Result<(AccountAssociationSession, User), SessionValidateError> {
        self.sessions
            .validate_for_user(token, self.users.as_ref())
            .await
    }

    /// Re-issue the association session with a verification code and email
    /// it. Single flight per user: any other pending association for the
    /// same account is deleted first.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence or email delivery fails.
    pub async fn challenge(
        &self,
        current: &AccountAssociationSession,
    ) -> anyhow::Result<(AccountAssociationSession, String)> {
        self.sessions
            .store()
            .delete_by_owner(&current.user_id)
            .await?;

        let code = generate_verification_code(VERIFICATION_CODE_LENGTH);
        let (session, token) = self
            .sessions
            .issue(|id, secret_hash, expires_at| AccountAssociationSession {
                id,
                user_id: current.user_id,
                email: current.email.clone(),
                provider: current.provider,
                provider_user_id: current.provider_user_id.clone(),
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

    /// Confirm the emailed code and finalize the link.
    ///
    /// The association session is deleted on every terminal path (success
    /// and both conflict verdicts) so it can never be replayed; only a
    /// wrong code leaves it alive for a retry.
    ///
    /// # Errors
    ///
    /// See [`AssociationConfirmError`].
    pub async fn confirm(
        &self,
        session: &AccountAssociationSession,
        candidate_code: &str,
    ) -> Result<AssociationGrant, AssociationConfirmError> {
        let Some(code) = session.code.as_deref() else {
            return Err(AssociationConfirmError::InvalidCode);
        };
        if !constant_time_eq(code, candidate_code) {
            return Err(AssociationConfirmError::InvalidCode);
        }

        self.sessions.delete(session.id).await?;

        let existing = self
            .identities
            .find_by_provider_and_provider_user_id(session.provider, &session.provider_user_id)
            .await?;
        let callers = self
            .identities
            .find_by_user_id_and_provider(session.user_id, session.provider)
            .await?;

        if callers.is_some() {
            return Err(AssociationConfirmError::AccountAlreadyLinked);
        }
        if existing.is_some() {
            return Err(AssociationConfirmError::LinkedElsewhere);
        }

        let mut user = self
            .users
            .find_by_id(session.user_id)
            .await?
            .ok_or(AssociationConfirmError::UserNotFound)?;

        let identity = ExternalIdentity::new(
            session.provider,
            session.provider_user_id.clone(),
            user.id,
        );
        match self.identities.save(&identity).await {
            Ok(()) => {}
            Err(IdentitySaveError::Conflict) => {
                return Err(AssociationConfirmError::LinkedElsewhere);
            }
            Err(IdentitySaveError::Storage(err)) => return Err(err.into()),
        }

        // The emailed code proved control of the address.
        user.email_verified = true;
        self.users.update(&user).await?;

        let (login, token) = self.issue_login(user.id).await?;
        info!(user_id = %user.id, provider = %session.provider, "account associated");
        Ok(AssociationGrant {
            session: login,
            token,
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
