//! Generic session lifecycle: create, validate, sliding refresh, and
//! verification-code confirmation.
//!
//! One manager serves every kind; the differences come from the record
//! type's [`KindPolicy`](super::session::KindPolicy). Every negative
//! validation verdict fails closed, and expiry deletes eagerly so a
//! replayed token reports `Invalid` rather than `Expired`.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

use super::repository::{SessionStore, UserRepository};
use super::secret::{constant_time_eq, SecretHasher};
use super::session::{CodedRecord, SessionId, SessionRecord, User};
use super::token::{format_token, parse_token};

#[derive(Debug, Error)]
pub enum SessionValidateError {
    /// Malformed token, unknown id, bad secret, or binding mismatch.
    /// Deliberately indistinguishable from the outside.
    #[error("session token is invalid")]
    Invalid,
    /// The record existed but its lifetime ran out; it has been deleted.
    #[error("session has expired")]
    Expired,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CodeConfirmError {
    #[error("verification code does not match")]
    InvalidCode,
    /// The record was already promoted; the code is not re-checked.
    #[error("already verified")]
    AlreadyVerified,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Lifecycle manager for one session kind.
pub struct SessionManager<R: SessionRecord> {
    store: Arc<dyn SessionStore<R>>,
    hasher: Arc<dyn SecretHasher>,
}

impl<R: SessionRecord> Clone for SessionManager<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            hasher: Arc::clone(&self.hasher),
        }
    }
}

impl<R: SessionRecord> SessionManager<R> {
    pub fn new(store: Arc<dyn SessionStore<R>>, hasher: Arc<dyn SecretHasher>) -> Self {
        Self { store, hasher }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore<R>> {
        &self.store
    }

    /// Mint and persist a new record, returning it with the wire token.
    ///
    /// The builder receives the fresh id, the secret hash, and the computed
    /// expiry; the raw secret never leaves this function except inside the
    /// token.
    ///
    /// # Errors
    ///
    /// Returns an error if secret generation or persistence fails.
    pub async fn issue<F>(&self, build: F) -> anyhow::Result<(R, String)>
    where
        F: FnOnce(SessionId, Vec<u8>, OffsetDateTime) -> R,
    {
        let id = SessionId::new();
        let secret = self.hasher.generate()?;
        let secret_hash = self.hasher.hash(&secret);
        let expires_at = OffsetDateTime::now_utc() + R::KIND.policy().expiry;

        let record = build(id, secret_hash, expires_at);
        self.store.save(&record).await?;

        Ok((record, format_token(&id.to_string(), &secret)))
    }

    /// Resolve a wire token into a live record.
    ///
    /// # Errors
    ///
    /// `Invalid` for malformed tokens, unknown ids, and secret mismatches;
    /// `Expired` (after deleting the record) when the lifetime ran out.
    pub async fn validate(&self, token: &str) -> Result<R, SessionValidateError> {
        let (id_text, secret) = parse_token(token).ok_or(SessionValidateError::Invalid)?;
        let id = SessionId::parse(id_text).ok_or(SessionValidateError::Invalid)?;

        let record = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(SessionValidateError::Invalid)?;

        if !self.hasher.verify(secret, record.secret_hash()) {
            return Err(SessionValidateError::Invalid);
        }

        if record.is_expired() {
            self.store.delete_by_id(id).await?;
            return Err(SessionValidateError::Expired);
        }

        Ok(record)
    }

    /// [`validate`](Self::validate), then check the record's user binding.
    ///
    /// A missing user or an email mismatch (stale record after a rotation)
    /// deletes the record and reports `Invalid`.
    ///
    /// # Errors
    ///
    /// Same verdicts as [`validate`](Self::validate).
    pub async fn validate_for_user(
        &self,
        token: &str,
        users: &dyn UserRepository,
    ) -> Result<(R, User), SessionValidateError> {
        let record = self.validate(token).await?;

        let Some(user_id) = record.bound_user() else {
            return Err(SessionValidateError::Invalid);
        };

        let user = users.find_by_id(user_id).await?;
        let matches = match (&user, record.bound_email()) {
            (Some(user), Some(email)) => user.email == email,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            self.store.delete_by_id(record.id()).await?;
            return Err(SessionValidateError::Invalid);
        }

        // The match arm above guarantees Some here.
        let user = user.ok_or(SessionValidateError::Invalid)?;
        Ok((record, user))
    }

    /// Slide the expiry when the remaining lifetime dips below the kind's
    /// refresh threshold. Returns whether a refresh was persisted.
    ///
    /// Persistence failure is logged and swallowed: the surrounding
    /// validation already succeeded and a missed refresh only means the
    /// next request tries again.
    pub async fn refresh_if_stale(&self, record: &mut R) -> bool {
        let policy = R::KIND.policy();
        let Some(threshold) = policy.refresh_below else {
            return false;
        };

        let now = OffsetDateTime::now_utc();
        if record.expires_at() - now >= threshold {
            return false;
        }

        let previous = record.expires_at();
        record.set_expires_at(now + policy.expiry);
        if let Err(err) = self.store.save(record).await {
            warn!("failed to persist refreshed session expiry: {err:#}");
            record.set_expires_at(previous);
            return false;
        }
        true
    }

    /// Idempotent revocation; unknown ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store itself fails.
    pub async fn delete(&self, id: SessionId) -> anyhow::Result<()> {
        self.store.delete_by_id(id).await
    }
}

impl<R: CodedRecord> SessionManager<R> {
    /// Confirm a human-entered verification code.
    ///
    /// On match the record is promoted (verified flag set, code retired,
    /// expiry extended per policy) and persisted — or, for one-shot kinds,
    /// deleted; the caller then propagates the promotion into the owning
    /// user. On mismatch the record is left untouched.
    ///
    /// # Errors
    ///
    /// `AlreadyVerified` for promoted records (code not re-checked),
    /// `InvalidCode` for a missing or mismatched code.
    pub async fn confirm_code(
        &self,
        record: &mut R,
        candidate: &str,
    ) -> Result<(), CodeConfirmError> {
        if record.email_verified() {
            return Err(CodeConfirmError::AlreadyVerified);
        }
        let Some(code) = record.code() else {
            return Err(CodeConfirmError::InvalidCode);
        };
        if !constant_time_eq(code, candidate) {
            return Err(CodeConfirmError::InvalidCode);
        }

        let policy = R::KIND.policy();
        record.promote();
        if policy.one_shot {
            self.store.delete_by_id(record.id()).await?;
        } else {
            if let Some(span) = policy.promoted_expiry {
                record.set_expires_at(OffsetDateTime::now_utc() + span);
            }
            self.store.save(record).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::secret::Sha256SecretHasher;
    use crate::auth::session::{LoginSession, PasswordResetSession, UserId};
    use crate::auth::testing::{MemorySessionStore, MemoryUserRepository};
    use time::Duration;

    fn login_manager() -> (SessionManager<LoginSession>, Arc<MemorySessionStore<LoginSession>>) {
        let store = Arc::new(MemorySessionStore::new());
        let manager = SessionManager::new(store.clone(), Arc::new(Sha256SecretHasher));
        (manager, store)
    }

    fn reset_manager() -> (
        SessionManager<PasswordResetSession>,
        Arc<MemorySessionStore<PasswordResetSession>>,
    ) {
        let store = Arc::new(MemorySessionStore::new());
        let manager = SessionManager::new(store.clone(), Arc::new(Sha256SecretHasher));
        (manager, store)
    }

    async fn issue_login(
        manager: &SessionManager<LoginSession>,
        user_id: UserId,
    ) -> (LoginSession, String) {
        manager
            .issue(|id, secret_hash, expires_at| LoginSession {
                id,
                user_id,
                secret_hash,
                expires_at,
            })
            .await
            .expect("issue")
    }

    #[tokio::test]
    async fn issue_then_validate_round_trips() {
        let (manager, _) = login_manager();
        let user_id = UserId::new();
        let (session, token) = issue_login(&manager, user_id).await;

        let validated = manager.validate(&token).await.expect("valid");
        assert_eq!(validated.id, session.id);
        assert_eq!(validated.user_id, user_id);
    }

    #[tokio::test]
    async fn malformed_token_is_invalid() {
        let (manager, _) = login_manager();
        assert!(matches!(
            manager.validate("garbage").await,
            Err(SessionValidateError::Invalid)
        ));
        assert!(matches!(
            manager.validate(".secret").await,
            Err(SessionValidateError::Invalid)
        ));
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid() {
        let (manager, _) = login_manager();
        let (session, _) = issue_login(&manager, UserId::new()).await;
        let forged = format!("{}.{}", session.id, "forged-secret");
        assert!(matches!(
            manager.validate(&forged).await,
            Err(SessionValidateError::Invalid)
        ));
    }

    #[tokio::test]
    async fn expired_session_is_deleted_then_replay_is_invalid() {
        let (manager, store) = login_manager();
        let (mut session, token) = issue_login(&manager, UserId::new()).await;

        session.expires_at = OffsetDateTime::now_utc() - Duration::seconds(1);
        store.save(&session).await.expect("save");

        assert!(matches!(
            manager.validate(&token).await,
            Err(SessionValidateError::Expired)
        ));
        // The record was deleted, so a replay no longer reports Expired.
        assert!(matches!(
            manager.validate(&token).await,
            Err(SessionValidateError::Invalid)
        ));
    }

    #[tokio::test]
    async fn binding_mismatch_deletes_the_record() {
        let (manager, store) = login_manager();
        let users = MemoryUserRepository::new();
        // No user persisted: the binding lookup fails.
        let (session, token) = issue_login(&manager, UserId::new()).await;

        assert!(matches!(
            manager.validate_for_user(&token, &users).await,
            Err(SessionValidateError::Invalid)
        ));
        assert!(store
            .find_by_id(session.id)
            .await
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn refresh_slides_only_below_threshold() {
        let (manager, store) = login_manager();
        let (mut session, _) = issue_login(&manager, UserId::new()).await;

        // Fresh session: far above the threshold, no refresh.
        assert!(!manager.refresh_if_stale(&mut session).await);

        session.expires_at = OffsetDateTime::now_utc() + Duration::days(1);
        store.save(&session).await.expect("save");
        let before = session.expires_at;

        assert!(manager.refresh_if_stale(&mut session).await);
        assert!(session.expires_at > before);

        let persisted = store
            .find_by_id(session.id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(persisted.expires_at, session.expires_at);
    }

    fn reset_session(code: &str) -> PasswordResetSession {
        PasswordResetSession {
            id: SessionId::new(),
            user_id: UserId::new(),
            email: "user@example.com".to_string(),
            email_verified: false,
            code: Some(code.to_string()),
            secret_hash: vec![0u8; 32],
            expires_at: OffsetDateTime::now_utc() + Duration::minutes(10),
        }
    }

    #[tokio::test]
    async fn confirm_code_mismatch_leaves_record_untouched() {
        let (manager, store) = reset_manager();
        let mut session = reset_session("12345678");
        store.save(&session).await.expect("save");
        let expires_before = session.expires_at;

        assert!(matches!(
            manager.confirm_code(&mut session, "00000000").await,
            Err(CodeConfirmError::InvalidCode)
        ));
        assert!(!session.email_verified);
        assert_eq!(session.expires_at, expires_before);
    }

    #[tokio::test]
    async fn confirm_code_promotes_and_extends_expiry() {
        let (manager, store) = reset_manager();
        let mut session = reset_session("12345678");
        store.save(&session).await.expect("save");
        let expires_before = session.expires_at;

        manager
            .confirm_code(&mut session, "12345678")
            .await
            .expect("confirm");

        assert!(session.email_verified);
        assert_eq!(session.code, None);
        assert!(session.expires_at > expires_before);

        let persisted = store
            .find_by_id(session.id)
            .await
            .expect("find")
            .expect("present");
        assert!(persisted.email_verified);
    }

    #[tokio::test]
    async fn confirm_code_on_promoted_record_reports_already_verified() {
        let (manager, store) = reset_manager();
        let mut session = reset_session("12345678");
        store.save(&session).await.expect("save");

        manager
            .confirm_code(&mut session, "12345678")
            .await
            .expect("confirm");
        assert!(matches!(
            manager.confirm_code(&mut session, "12345678").await,
            Err(CodeConfirmError::AlreadyVerified)
        ));
    }
}
