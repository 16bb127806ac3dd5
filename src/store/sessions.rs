//! Session stores, one table per kind.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::repository::SessionStore;
use crate::auth::session::{
    AccountAssociationSession, EmailVerificationSession, ExternalProvider, LoginSession,
    PasswordResetSession, SessionId, SignupSession, UserId,
};

fn session_id_from_row(row: &PgRow) -> Result<SessionId> {
    let raw: String = row.get("id");
    SessionId::parse(&raw).ok_or_else(|| anyhow!("malformed session id in store: {raw}"))
}

fn provider_from_row(row: &PgRow) -> Result<ExternalProvider> {
    let raw: String = row.get("provider");
    raw.parse()
        .map_err(|()| anyhow!("unknown provider in store: {raw}"))
}

pub struct PgLoginSessionStore {
    pool: PgPool,
}

impl PgLoginSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore<LoginSession> for PgLoginSessionStore {
    async fn find_by_id(&self, id: SessionId) -> Result<Option<LoginSession>> {
        let query = r"
            SELECT id, user_id, secret_hash, expires_at
            FROM login_sessions
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup login session")?;

        row.map(|row| {
            Ok(LoginSession {
                id: session_id_from_row(&row)?,
                user_id: UserId::from_uuid(row.get::<Uuid, _>("user_id")),
                secret_hash: row.get("secret_hash"),
                expires_at: row.get("expires_at"),
            })
        })
        .transpose()
    }

    async fn save(&self, record: &LoginSession) -> Result<()> {
        let query = r"
            INSERT INTO login_sessions (id, user_id, secret_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET expires_at = EXCLUDED.expires_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.id.to_string())
            .bind(record.user_id.as_uuid())
            .bind(&record.secret_hash)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save login session")?;
        Ok(())
    }

    async fn delete_by_id(&self, id: SessionId) -> Result<()> {
        // Revocation is idempotent; deleting an unknown id is fine.
        let query = "DELETE FROM login_sessions WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id.to_string())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete login session")?;
        Ok(())
    }

    async fn delete_by_owner(&self, owner: &UserId) -> Result<()> {
        let query = "DELETE FROM login_sessions WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(owner.as_uuid())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete login sessions for user")?;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let query = "DELETE FROM login_sessions WHERE expires_at <= NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep expired login sessions")?;
        Ok(result.rows_affected())
    }
}

pub struct PgSignupSessionStore {
    pool: PgPool,
}

impl PgSignupSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore<SignupSession> for PgSignupSessionStore {
    async fn find_by_id(&self, id: SessionId) -> Result<Option<SignupSession>> {
        let query = r"
            SELECT id, email, email_verified, code, secret_hash, expires_at
            FROM signup_sessions
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup signup session")?;

        row.map(|row| {
            Ok(SignupSession {
                id: session_id_from_row(&row)?,
                email: row.get("email"),
                email_verified: row.get("email_verified"),
                code: row.get("code"),
                secret_hash: row.get("secret_hash"),
                expires_at: row.get("expires_at"),
            })
        })
        .transpose()
    }

    async fn save(&self, record: &SignupSession) -> Result<()> {
        let query = r"
            INSERT INTO signup_sessions
                (id, email, email_verified, code, secret_hash, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET email_verified = EXCLUDED.email_verified,
                code = EXCLUDED.code,
                expires_at = EXCLUDED.expires_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.id.to_string())
            .bind(&record.email)
            .bind(record.email_verified)
            .bind(&record.code)
            .bind(&record.secret_hash)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save signup session")?;
        Ok(())
    }

    async fn delete_by_id(&self, id: SessionId) -> Result<()> {
        let query = "DELETE FROM signup_sessions WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id.to_string())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete signup session")?;
        Ok(())
    }

    async fn delete_by_owner(&self, owner: &String) -> Result<()> {
        let query = "DELETE FROM signup_sessions WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(owner)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete signup sessions for email")?;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let query = "DELETE FROM signup_sessions WHERE expires_at <= NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep expired signup sessions")?;
        Ok(result.rows_affected())
    }
}

pub struct PgEmailVerificationSessionStore {
    pool: PgPool,
}

impl PgEmailVerificationSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore<EmailVerificationSession> for PgEmailVerificationSessionStore {
    async fn find_by_id(&self, id: SessionId) -> Result<Option<EmailVerificationSession>> {
        let query = r"
            SELECT id, user_id, email, email_verified, code, secret_hash, expires_at
            FROM email_verification_sessions
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup email verification session")?;

        row.map(|row| {
            Ok(EmailVerificationSession {
                id: session_id_from_row(&row)?,
                user_id: UserId::from_uuid(row.get::<Uuid, _>("user_id")),
                email: row.get("email"),
                email_verified: row.get("email_verified"),
                code: row.get("code"),
                secret_hash: row.get("secret_hash"),
                expires_at: row.get("expires_at"),
            })
        })
        .transpose()
    }

    async fn save(&self, record: &EmailVerificationSession) -> Result<()> {
        let query = r"
            INSERT INTO email_verification_sessions
                (id, user_id, email, email_verified, code, secret_hash, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET email_verified = EXCLUDED.email_verified,
                code = EXCLUDED.code,
                expires_at = EXCLUDED.expires_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.id.to_string())
            .bind(record.user_id.as_uuid())
            .bind(&record.email)
            .bind(record.email_verified)
            .bind(&record.code)
            .bind(&record.secret_hash)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save email verification session")?;
        Ok(())
    }

    async fn delete_by_id(&self, id: SessionId) -> Result<()> {
        let query = "DELETE FROM email_verification_sessions WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id.to_string())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete email verification session")?;
        Ok(())
    }

    async fn delete_by_owner(&self, owner: &UserId) -> Result<()> {
        let query = "DELETE FROM email_verification_sessions WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(owner.as_uuid())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete email verification sessions for user")?;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let query = "DELETE FROM email_verification_sessions WHERE expires_at <= NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep expired email verification sessions")?;
        Ok(result.rows_affected())
    }
}

pub struct PgPasswordResetSessionStore {
    pool: PgPool,
}

impl PgPasswordResetSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore<PasswordResetSession> for PgPasswordResetSessionStore {
    async fn find_by_id(&self, id: SessionId) -> Result<Option<PasswordResetSession>> {
        let query = r"
            SELECT id, user_id, email, email_verified, code, secret_hash, expires_at
            FROM password_reset_sessions
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup password reset session")?;

        row.map(|row| {
            Ok(PasswordResetSession {
                id: session_id_from_row(&row)?,
                user_id: UserId::from_uuid(row.get::<Uuid, _>("user_id")),
                email: row.get("email"),
                email_verified: row.get("email_verified"),
                code: row.get("code"),
                secret_hash: row.get("secret_hash"),
                expires_at: row.get("expires_at"),
            })
        })
        .transpose()
    }

    async fn save(&self, record: &PasswordResetSession) -> Result<()> {
        let query = r"
            INSERT INTO password_reset_sessions
                (id, user_id, email, email_verified, code, secret_hash, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET email_verified = EXCLUDED.email_verified,
                code = EXCLUDED.code,
                expires_at = EXCLUDED.expires_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.id.to_string())
            .bind(record.user_id.as_uuid())
            .bind(&record.email)
            .bind(record.email_verified)
            .bind(&record.code)
            .bind(&record.secret_hash)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save password reset session")?;
        Ok(())
    }

    async fn delete_by_id(&self, id: SessionId) -> Result<()> {
        let query = "DELETE FROM password_reset_sessions WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id.to_string())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete password reset session")?;
        Ok(())
    }

    async fn delete_by_owner(&self, owner: &UserId) -> Result<()> {
        let query = "DELETE FROM password_reset_sessions WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(owner.as_uuid())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete password reset sessions for user")?;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let query = "DELETE FROM password_reset_sessions WHERE expires_at <= NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep expired password reset sessions")?;
        Ok(result.rows_affected())
    }
}

pub struct PgAccountAssociationSessionStore {
    pool: PgPool,
}

impl PgAccountAssociationSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore<AccountAssociationSession> for PgAccountAssociationSessionStore {
    async fn find_by_id(&self, id: SessionId) -> Result<Option<AccountAssociationSession>> {
        let query = r"
            SELECT id, user_id, email, provider, provider_user_id, code, secret_hash, expires_at
            FROM account_association_sessions
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account association session")?;

        row.map(|row| {
            Ok(AccountAssociationSession {
                id: session_id_from_row(&row)?,
                user_id: UserId::from_uuid(row.get::<Uuid, _>("user_id")),
                email: row.get("email"),
                provider: provider_from_row(&row)?,
                provider_user_id: row.get("provider_user_id"),
                code: row.get("code"),
                secret_hash: row.get("secret_hash"),
                expires_at: row.get("expires_at"),
            })
        })
        .transpose()
    }

    async fn save(&self, record: &AccountAssociationSession) -> Result<()> {
        let query = r"
            INSERT INTO account_association_sessions
                (id, user_id, email, provider, provider_user_id, code, secret_hash, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET code = EXCLUDED.code,
                expires_at = EXCLUDED.expires_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.id.to_string())
            .bind(record.user_id.as_uuid())
            .bind(&record.email)
            .bind(record.provider.as_str())
            .bind(&record.provider_user_id)
            .bind(&record.code)
            .bind(&record.secret_hash)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save account association session")?;
        Ok(())
    }

    async fn delete_by_id(&self, id: SessionId) -> Result<()> {
        let query = "DELETE FROM account_association_sessions WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id.to_string())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete account association session")?;
        Ok(())
    }

    async fn delete_by_owner(&self, owner: &UserId) -> Result<()> {
        let query = "DELETE FROM account_association_sessions WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(owner.as_uuid())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete account association sessions for user")?;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let query = "DELETE FROM account_association_sessions WHERE expires_at <= NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep expired account association sessions")?;
        Ok(result.rows_affected())
    }
}
