//! Persistence contracts.
//!
//! One store per session kind plus the user and external-identity
//! repositories. Implementations live in `crate::store`; tests use the
//! in-memory fakes from [`crate::auth::testing`]. All methods are plain
//! upsert/find/delete; correctness under concurrency relies on the store's
//! per-row atomicity, not on locks held by the core.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use super::session::{
    ExternalIdentity, ExternalProvider, SessionId, SessionRecord, User, UserId,
};

/// Store contract shared by every session kind.
#[async_trait]
pub trait SessionStore<R: SessionRecord>: Send + Sync {
    async fn find_by_id(&self, id: SessionId) -> Result<Option<R>>;

    /// Upsert by id.
    async fn save(&self, record: &R) -> Result<()>;

    /// Idempotent; deleting an unknown id is a no-op.
    async fn delete_by_id(&self, id: SessionId) -> Result<()>;

    /// Delete every record for the owning key (user or email, per kind).
    async fn delete_by_owner(&self, owner: &R::Owner) -> Result<()>;

    /// Sweep expired records; returns how many were removed.
    async fn delete_expired(&self) -> Result<u64>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>>;

    /// Lookup by canonical email, compared exactly as stored.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn create(&self, user: &User) -> Result<()>;

    async fn update(&self, user: &User) -> Result<()>;
}

/// `save` failure modes for external identities. The uniqueness constraint
/// on `(provider, provider_user_id)` is the only safety net against two
/// concurrent link attempts, so conflicts must stay distinguishable.
#[derive(Debug, Error)]
pub enum IdentitySaveError {
    #[error("external identity is already linked")]
    Conflict,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[async_trait]
pub trait ExternalIdentityRepository: Send + Sync {
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Vec<ExternalIdentity>>;

    async fn find_by_user_id_and_provider(
        &self,
        user_id: UserId,
        provider: ExternalProvider,
    ) -> Result<Option<ExternalIdentity>>;

    async fn find_by_provider_and_provider_user_id(
        &self,
        provider: ExternalProvider,
        provider_user_id: &str,
    ) -> Result<Option<ExternalIdentity>>;

    async fn save(&self, identity: &ExternalIdentity) -> Result<(), IdentitySaveError>;

    async fn delete_by_user_id_and_provider(
        &self,
        user_id: UserId,
        provider: ExternalProvider,
    ) -> Result<()>;
}
