//! External identity repository.
//!
//! The table carries a uniqueness constraint on
//! `(provider, provider_user_id)`; `save` maps violations to a typed
//! conflict because that constraint is the only protection against two
//! concurrent link attempts for the same identity.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::repository::{ExternalIdentityRepository, IdentitySaveError};
use crate::auth::session::{ExternalIdentity, ExternalProvider, UserId};

use super::is_unique_violation;

pub struct PgExternalIdentityRepository {
    pool: PgPool,
}

impl PgExternalIdentityRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn identity_from_row(row: &PgRow) -> Result<ExternalIdentity> {
    let raw_provider: String = row.get("provider");
    let provider: ExternalProvider = raw_provider
        .parse()
        .map_err(|()| anyhow!("unknown provider in store: {raw_provider}"))?;
    Ok(ExternalIdentity {
        provider,
        provider_user_id: row.get("provider_user_id"),
        user_id: UserId::from_uuid(row.get::<Uuid, _>("user_id")),
        linked_at: row.get("linked_at"),
    })
}

#[async_trait]
impl ExternalIdentityRepository for PgExternalIdentityRepository {
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Vec<ExternalIdentity>> {
        let query = r"
            SELECT provider, provider_user_id, user_id, linked_at
            FROM external_identities
            WHERE user_id = $1
            ORDER BY linked_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list external identities")?;
        rows.iter().map(identity_from_row).collect()
    }

    async fn find_by_user_id_and_provider(
        &self,
        user_id: UserId,
        provider: ExternalProvider,
    ) -> Result<Option<ExternalIdentity>> {
        let query = r"
            SELECT provider, provider_user_id, user_id, linked_at
            FROM external_identities
            WHERE user_id = $1 AND provider = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id.as_uuid())
            .bind(provider.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup external identity for user")?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn find_by_provider_and_provider_user_id(
        &self,
        provider: ExternalProvider,
        provider_user_id: &str,
    ) -> Result<Option<ExternalIdentity>> {
        let query = r"
            SELECT provider, provider_user_id, user_id, linked_at
            FROM external_identities
            WHERE provider = $1 AND provider_user_id = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(provider.as_str())
            .bind(provider_user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup external identity")?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn save(&self, identity: &ExternalIdentity) -> Result<(), IdentitySaveError> {
        let query = r"
            INSERT INTO external_identities (provider, provider_user_id, user_id, linked_at)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(identity.provider.as_str())
            .bind(&identity.provider_user_id)
            .bind(identity.user_id.as_uuid())
            .bind(identity.linked_at)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(IdentitySaveError::Conflict),
            Err(err) => Err(IdentitySaveError::Storage(
                anyhow::Error::new(err).context("failed to save external identity"),
            )),
        }
    }

    async fn delete_by_user_id_and_provider(
        &self,
        user_id: UserId,
        provider: ExternalProvider,
    ) -> Result<()> {
        let query = r"
            DELETE FROM external_identities
            WHERE user_id = $1 AND provider = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id.as_uuid())
            .bind(provider.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to unlink external identity")?;
        Ok(())
    }
}
