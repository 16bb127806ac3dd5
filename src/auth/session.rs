//! Session records, kind policies, and the identity data model.
//!
//! Five session kinds share one record shape contract (`id`, `secret_hash`,
//! `expires_at`) plus kind-specific fields. The per-kind differences that the
//! lifecycle cares about (spans, refresh, verification codes, owner binding)
//! live in [`KindPolicy`] so the lifecycle manager stays generic.

use time::{Duration, OffsetDateTime};
use ulid::Ulid;
use uuid::Uuid;

const LOGIN_EXPIRY_DAYS: i64 = 30;
const LOGIN_REFRESH_BELOW_DAYS: i64 = 15;
const SIGNUP_EXPIRY_MINUTES: i64 = 30;
const EMAIL_VERIFICATION_EXPIRY_MINUTES: i64 = 10;
const PASSWORD_RESET_EXPIRY_MINUTES: i64 = 10;
const PASSWORD_RESET_VERIFIED_EXPIRY_MINUTES: i64 = 30;
const ACCOUNT_ASSOCIATION_EXPIRY_MINUTES: i64 = 10;

/// Number of digits in human-entered verification codes.
pub const VERIFICATION_CODE_LENGTH: usize = 8;

/// Opaque, sortable session identifier. The `.` token separator can never
/// appear in its textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Ulid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse the textual form. Returns `None` for anything we did not mint.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Ulid::from_string(value).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Supported external identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalProvider {
    Google,
    Discord,
}

impl ExternalProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Discord => "discord",
        }
    }
}

impl std::fmt::Display for ExternalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExternalProvider {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "google" => Ok(Self::Google),
            "discord" => Ok(Self::Discord),
            _ => Err(()),
        }
    }
}

/// Local account as the auth core sees it. Email is stored canonical
/// (trimmed, lowercased at the boundary) and compared as stored.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub email_verified: bool,
    pub password_hash: Option<String>,
    pub display_name: String,
    pub icon_url: Option<String>,
}

/// A federated `(provider, provider_user_id)` pair bound to a local user.
/// `linked_at` is set at creation and never changes.
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    pub provider: ExternalProvider,
    pub provider_user_id: String,
    pub user_id: UserId,
    pub linked_at: OffsetDateTime,
}

impl ExternalIdentity {
    #[must_use]
    pub fn new(provider: ExternalProvider, provider_user_id: String, user_id: UserId) -> Self {
        Self {
            provider,
            provider_user_id,
            user_id,
            linked_at: OffsetDateTime::now_utc(),
        }
    }
}

/// The five session purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Login,
    Signup,
    EmailVerification,
    PasswordReset,
    AccountAssociation,
}

/// Per-kind lifecycle rules. One table instead of five parallel managers.
#[derive(Debug, Clone, Copy)]
pub struct KindPolicy {
    /// Span from creation to expiry.
    pub expiry: Duration,
    /// Login only: slide the expiry when less than this remains.
    pub refresh_below: Option<Duration>,
    /// Span granted when a code confirmation promotes the record.
    pub promoted_expiry: Option<Duration>,
    /// Code confirmation consumes the record instead of promoting it.
    pub one_shot: bool,
}

impl SessionKind {
    #[must_use]
    pub fn policy(self) -> KindPolicy {
        match self {
            Self::Login => KindPolicy {
                expiry: Duration::days(LOGIN_EXPIRY_DAYS),
                refresh_below: Some(Duration::days(LOGIN_REFRESH_BELOW_DAYS)),
                promoted_expiry: None,
                one_shot: false,
            },
            Self::Signup => KindPolicy {
                expiry: Duration::minutes(SIGNUP_EXPIRY_MINUTES),
                refresh_below: None,
                promoted_expiry: Some(Duration::minutes(SIGNUP_EXPIRY_MINUTES)),
                one_shot: false,
            },
            Self::EmailVerification => KindPolicy {
                expiry: Duration::minutes(EMAIL_VERIFICATION_EXPIRY_MINUTES),
                refresh_below: None,
                promoted_expiry: None,
                one_shot: true,
            },
            Self::PasswordReset => KindPolicy {
                expiry: Duration::minutes(PASSWORD_RESET_EXPIRY_MINUTES),
                refresh_below: None,
                promoted_expiry: Some(Duration::minutes(PASSWORD_RESET_VERIFIED_EXPIRY_MINUTES)),
                one_shot: false,
            },
            Self::AccountAssociation => KindPolicy {
                expiry: Duration::minutes(ACCOUNT_ASSOCIATION_EXPIRY_MINUTES),
                refresh_below: None,
                promoted_expiry: None,
                one_shot: false,
            },
        }
    }
}

/// Shared shape of all session records.
///
/// `Owner` is the key used for single-flight deletion: the user for
/// user-bound kinds, the email for signup sessions.
pub trait SessionRecord: Clone + Send + Sync + 'static {
    const KIND: SessionKind;
    type Owner: Send + Sync + PartialEq;

    fn id(&self) -> SessionId;

    /// Single-flight key this record belongs to.
    fn owner(&self) -> Self::Owner;
    fn secret_hash(&self) -> &[u8];
    fn expires_at(&self) -> OffsetDateTime;
    fn set_expires_at(&mut self, at: OffsetDateTime);

    /// User this record is bound to, if any. Validation loads the user and
    /// fails closed on mismatch.
    fn bound_user(&self) -> Option<UserId> {
        None
    }

    /// Email the record is pinned to; checked against the bound user's
    /// stored email during validation.
    fn bound_email(&self) -> Option<&str> {
        None
    }

    fn is_expired(&self) -> bool {
        self.expires_at() <= OffsetDateTime::now_utc()
    }
}

/// Records carrying a human-entered verification code.
pub trait CodedRecord: SessionRecord {
    fn code(&self) -> Option<&str>;
    fn email_verified(&self) -> bool;
    /// Mark the record verified and retire the code.
    fn promote(&mut self);
}

#[derive(Debug, Clone)]
pub struct LoginSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub secret_hash: Vec<u8>,
    pub expires_at: OffsetDateTime,
}

impl SessionRecord for LoginSession {
    const KIND: SessionKind = SessionKind::Login;
    type Owner = UserId;

    fn id(&self) -> SessionId {
        self.id
    }

    fn owner(&self) -> UserId {
        self.user_id
    }

    fn secret_hash(&self) -> &[u8] {
        &self.secret_hash
    }

    fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    fn set_expires_at(&mut self, at: OffsetDateTime) {
        self.expires_at = at;
    }

    fn bound_user(&self) -> Option<UserId> {
        Some(self.user_id)
    }
}

#[derive(Debug, Clone)]
pub struct SignupSession {
    pub id: SessionId,
    pub email: String,
    pub email_verified: bool,
    pub code: Option<String>,
    pub secret_hash: Vec<u8>,
    pub expires_at: OffsetDateTime,
}

impl SessionRecord for SignupSession {
    const KIND: SessionKind = SessionKind::Signup;
    type Owner = String;

    fn id(&self) -> SessionId {
        self.id
    }

    fn owner(&self) -> String {
        self.email.clone()
    }

    fn secret_hash(&self) -> &[u8] {
        &self.secret_hash
    }

    fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    fn set_expires_at(&mut self, at: OffsetDateTime) {
        self.expires_at = at;
    }
}

impl CodedRecord for SignupSession {
    fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    fn email_verified(&self) -> bool {
        self.email_verified
    }

    fn promote(&mut self) {
        self.email_verified = true;
        self.code = None;
    }
}

#[derive(Debug, Clone)]
pub struct EmailVerificationSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub email: String,
    pub email_verified: bool,
    pub code: Option<String>,
    pub secret_hash: Vec<u8>,
    pub expires_at: OffsetDateTime,
}

impl SessionRecord for EmailVerificationSession {
    const KIND: SessionKind = SessionKind::EmailVerification;
    type Owner = UserId;

    fn id(&self) -> SessionId {
        self.id
    }

    fn owner(&self) -> UserId {
        self.user_id
    }

    fn secret_hash(&self) -> &[u8] {
        &self.secret_hash
    }

    fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    fn set_expires_at(&mut self, at: OffsetDateTime) {
        self.expires_at = at;
    }

    fn bound_user(&self) -> Option<UserId> {
        Some(self.user_id)
    }
}

impl CodedRecord for EmailVerificationSession {
    fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    fn email_verified(&self) -> bool {
        self.email_verified
    }

    fn promote(&mut self) {
        self.email_verified = true;
        self.code = None;
    }
}

#[derive(Debug, Clone)]
pub struct PasswordResetSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub email: String,
    pub email_verified: bool,
    pub code: Option<String>,
    pub secret_hash: Vec<u8>,
    pub expires_at: OffsetDateTime,
}

impl SessionRecord for PasswordResetSession {
    const KIND: SessionKind = SessionKind::PasswordReset;
    type Owner = UserId;

    fn id(&self) -> SessionId {
        self.id
    }

    fn owner(&self) -> UserId {
        self.user_id
    }

    fn secret_hash(&self) -> &[u8] {
        &self.secret_hash
    }

    fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    fn set_expires_at(&mut self, at: OffsetDateTime) {
        self.expires_at = at;
    }

    fn bound_user(&self) -> Option<UserId> {
        Some(self.user_id)
    }

    fn bound_email(&self) -> Option<&str> {
        Some(&self.email)
    }
}

impl CodedRecord for PasswordResetSession {
    fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    fn email_verified(&self) -> bool {
        self.email_verified
    }

    fn promote(&mut self) {
        self.email_verified = true;
        self.code = None;
    }
}

/// Pending link between an external identity and an existing local account.
/// `code` stays `None` until the user explicitly requests the challenge.
#[derive(Debug, Clone)]
pub struct AccountAssociationSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub email: String,
    pub provider: ExternalProvider,
    pub provider_user_id: String,
    pub code: Option<String>,
    pub secret_hash: Vec<u8>,
    pub expires_at: OffsetDateTime,
}

impl SessionRecord for AccountAssociationSession {
    const KIND: SessionKind = SessionKind::AccountAssociation;
    type Owner = UserId;

    fn id(&self) -> SessionId {
        self.id
    }

    fn owner(&self) -> UserId {
        self.user_id
    }

    fn secret_hash(&self) -> &[u8] {
        &self.secret_hash
    }

    fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    fn set_expires_at(&mut self, at: OffsetDateTime) {
        self.expires_at = at;
    }

    fn bound_user(&self) -> Option<UserId> {
        Some(self.user_id)
    }

    fn bound_email(&self) -> Option<&str> {
        Some(&self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_round_trips_through_text() {
        let id = SessionId::new();
        assert_eq!(SessionId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn session_id_rejects_foreign_text() {
        assert_eq!(SessionId::parse("not-an-id"), None);
        assert_eq!(SessionId::parse(""), None);
    }

    #[test]
    fn policies_match_kind_shape() {
        assert!(SessionKind::Login.policy().refresh_below.is_some());
        assert!(SessionKind::Login.policy().promoted_expiry.is_none());
        assert!(SessionKind::EmailVerification.policy().one_shot);
        assert!(!SessionKind::PasswordReset.policy().one_shot);
        assert!(SessionKind::PasswordReset.policy().promoted_expiry.is_some());
    }

    #[test]
    fn promote_retires_the_code() {
        let mut session = SignupSession {
            id: SessionId::new(),
            email: "user@example.com".to_string(),
            email_verified: false,
            code: Some("12345678".to_string()),
            secret_hash: vec![1, 2, 3],
            expires_at: OffsetDateTime::now_utc(),
        };
        session.promote();
        assert!(session.email_verified);
        assert_eq!(session.code, None);
    }

    #[test]
    fn expiry_check_uses_expires_at_only() {
        let session = LoginSession {
            id: SessionId::new(),
            user_id: UserId::new(),
            secret_hash: vec![],
            expires_at: OffsetDateTime::now_utc() - Duration::seconds(1),
        };
        assert!(session.is_expired());
    }
}
