//! User repository.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::repository::UserRepository;
use crate::auth::session::{User, UserId};

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: UserId::from_uuid(row.get::<Uuid, _>("id")),
        email: row.get("email"),
        email_verified: row.get("email_verified"),
        password_hash: row.get("password_hash"),
        display_name: row.get("display_name"),
        icon_url: row.get("icon_url"),
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        let query = r"
            SELECT id, email, email_verified, password_hash, display_name, icon_url
            FROM users
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = r"
            SELECT id, email, email_verified, password_hash, display_name, icon_url
            FROM users
            WHERE email = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn create(&self, user: &User) -> Result<()> {
        let query = r"
            INSERT INTO users (id, email, email_verified, password_hash, display_name, icon_url)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user.id.as_uuid())
            .bind(&user.email)
            .bind(user.email_verified)
            .bind(&user.password_hash)
            .bind(&user.display_name)
            .bind(&user.icon_url)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to create user")?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let query = r"
            UPDATE users
            SET email = $2,
                email_verified = $3,
                password_hash = $4,
                display_name = $5,
                icon_url = $6
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user.id.as_uuid())
            .bind(&user.email)
            .bind(user.email_verified)
            .bind(&user.password_hash)
            .bind(&user.display_name)
            .bind(&user.icon_url)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update user")?;
        Ok(())
    }
}
