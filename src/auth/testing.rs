//! In-memory collaborator fakes for tests.
//!
//! Map-backed stores with the same contracts as the Postgres
//! implementations, plus stub gateways whose outcomes tests can script.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use time::OffsetDateTime;
use url::Url;

use super::gateway::{
    EmailGateway, IdentityFetchError, ProviderGateway, ProviderIdentity, ProviderTokens,
    TokenExchangeError,
};
use super::repository::{
    ExternalIdentityRepository, IdentitySaveError, SessionStore, UserRepository,
};
use super::session::{
    ExternalIdentity, ExternalProvider, SessionId, SessionRecord, User, UserId,
};

#[derive(Default)]
pub struct MemorySessionStore<R> {
    records: Mutex<HashMap<SessionId, R>>,
}

impl<R: SessionRecord> MemorySessionStore<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().expect("lock").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<R: SessionRecord> SessionStore<R> for MemorySessionStore<R> {
    async fn find_by_id(&self, id: SessionId) -> Result<Option<R>> {
        Ok(self.records.lock().expect("lock").get(&id).cloned())
    }

    async fn save(&self, record: &R) -> Result<()> {
        self.records
            .lock()
            .expect("lock")
            .insert(record.id(), record.clone());
        Ok(())
    }

    async fn delete_by_id(&self, id: SessionId) -> Result<()> {
        self.records.lock().expect("lock").remove(&id);
        Ok(())
    }

    async fn delete_by_owner(&self, owner: &R::Owner) -> Result<()> {
        self.records
            .lock()
            .expect("lock")
            .retain(|_, record| record.owner() != *owner);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = OffsetDateTime::now_utc();
        let mut records = self.records.lock().expect("lock");
        let before = records.len();
        records.retain(|_, record| record.expires_at() > now);
        Ok((before - records.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<HashMap<UserId, User>>,
}

impl MemoryUserRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, user: User) {
        self.users.lock().expect("lock").insert(user.id, user);
    }

    #[must_use]
    pub fn get(&self, id: UserId) -> Option<User> {
        self.users.lock().expect("lock").get(&id).cloned()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.lock().expect("lock").get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .expect("lock")
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn create(&self, user: &User) -> Result<()> {
        self.users
            .lock()
            .expect("lock")
            .insert(user.id, user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        self.users
            .lock()
            .expect("lock")
            .insert(user.id, user.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryExternalIdentityRepository {
    identities: Mutex<Vec<ExternalIdentity>>,
}

impl MemoryExternalIdentityRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            identities: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.lock().expect("lock").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExternalIdentityRepository for MemoryExternalIdentityRepository {
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Vec<ExternalIdentity>> {
        Ok(self
            .identities
            .lock()
            .expect("lock")
            .iter()
            .filter(|identity| identity.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_by_user_id_and_provider(
        &self,
        user_id: UserId,
        provider: ExternalProvider,
    ) -> Result<Option<ExternalIdentity>> {
        Ok(self
            .identities
            .lock()
            .expect("lock")
            .iter()
            .find(|identity| identity.user_id == user_id && identity.provider == provider)
            .cloned())
    }

    async fn find_by_provider_and_provider_user_id(
        &self,
        provider: ExternalProvider,
        provider_user_id: &str,
    ) -> Result<Option<ExternalIdentity>> {
        Ok(self
            .identities
            .lock()
            .expect("lock")
            .iter()
            .find(|identity| {
                identity.provider == provider && identity.provider_user_id == provider_user_id
            })
            .cloned())
    }

    async fn save(&self, identity: &ExternalIdentity) -> Result<(), IdentitySaveError> {
        let mut identities = self.identities.lock().expect("lock");
        // Mirrors the database uniqueness constraint on (provider, provider_user_id).
        if identities.iter().any(|existing| {
            existing.provider == identity.provider
                && existing.provider_user_id == identity.provider_user_id
        }) {
            return Err(IdentitySaveError::Conflict);
        }
        identities.push(identity.clone());
        Ok(())
    }

    async fn delete_by_user_id_and_provider(
        &self,
        user_id: UserId,
        provider: ExternalProvider,
    ) -> Result<()> {
        self.identities
            .lock()
            .expect("lock")
            .retain(|identity| !(identity.user_id == user_id && identity.provider == provider));
        Ok(())
    }
}

/// Provider gateway whose outcomes are scripted by the test.
pub struct StubProviderGateway {
    exchange_result: Result<ProviderTokens, TokenExchangeError>,
    identity_result: Result<ProviderIdentity, IdentityFetchError>,
    revocations: AtomicUsize,
}

impl StubProviderGateway {
    #[must_use]
    pub fn returning_identity(identity: ProviderIdentity) -> Self {
        Self {
            exchange_result: Ok(ProviderTokens {
                access_token: "stub-access-token".to_string(),
                refresh_token: None,
                id_token: None,
            }),
            identity_result: Ok(identity),
            revocations: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing_exchange(error: TokenExchangeError) -> Self {
        Self {
            exchange_result: Err(error),
            identity_result: Err(IdentityFetchError::FetchFailed),
            revocations: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing_identity(error: IdentityFetchError) -> Self {
        Self {
            exchange_result: Ok(ProviderTokens {
                access_token: "stub-access-token".to_string(),
                refresh_token: None,
                id_token: None,
            }),
            identity_result: Err(error),
            revocations: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn revocation_count(&self) -> usize {
        self.revocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderGateway for StubProviderGateway {
    fn authorization_url(&self, state: &str, _code_verifier: &str) -> Url {
        let mut url = Url::parse("https://provider.test/oauth/authorize").expect("stub url");
        url.query_pairs_mut().append_pair("state", state);
        url
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _code_verifier: &str,
    ) -> Result<ProviderTokens, TokenExchangeError> {
        self.exchange_result.clone()
    }

    async fn fetch_identity(
        &self,
        _tokens: &ProviderTokens,
    ) -> Result<ProviderIdentity, IdentityFetchError> {
        self.identity_result.clone()
    }

    async fn revoke_tokens(&self, _tokens: &ProviderTokens) {
        self.revocations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Email gateway that records what would have been sent.
#[derive(Default)]
pub struct RecordingEmailGateway {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingEmailGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("lock").clone()
    }

    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("lock").len()
    }
}

#[async_trait]
impl EmailGateway for RecordingEmailGateway {
    async fn send_verification_email(&self, email: &str, code: &str) -> Result<()> {
        self.sent
            .lock()
            .expect("lock")
            .push((email.to_string(), code.to_string()));
        Ok(())
    }
}
