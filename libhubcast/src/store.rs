//! Collaborator seams for persistence and tracking
//!
//! The hub does not own a database. The host application implements these
//! traits over whatever it persists accounts and posts in; the in-memory
//! implementations below back the integration tests and host smoke tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Account, Post, Provider, TokenRecord};

/// Access to the per-account token map.
///
/// Granularity is one entry per `(account, provider)` so a backend can update
/// a single key without rewriting the whole settings blob. Callers must go
/// through [`crate::vault::TokenVault`], which serializes read-modify-write
/// sequences per key.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn token_record(
        &self,
        account_id: Uuid,
        provider: Provider,
    ) -> Result<Option<TokenRecord>, StoreError>;

    async fn put_token_record(
        &self,
        account_id: Uuid,
        provider: Provider,
        record: TokenRecord,
    ) -> Result<(), StoreError>;

    /// Returns whether an entry existed. Removing an absent entry is not an
    /// error.
    async fn remove_token_record(
        &self,
        account_id: Uuid,
        provider: Provider,
    ) -> Result<bool, StoreError>;
}

/// Read and conditional update of Post rows.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn post(&self, id: Uuid) -> Result<Option<Post>, StoreError>;

    async fn update_post(&self, post: &Post) -> Result<(), StoreError>;
}

/// Side channel recording published URLs against a recommendation.
///
/// Failures here are tolerated by every caller; implementations should still
/// return them so they can be logged.
#[async_trait]
pub trait RecommendationTracker: Send + Sync {
    async fn add_published_url(
        &self,
        recommendation_id: Uuid,
        url: &str,
    ) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// In-memory [`AccountStore`] for tests and host smoke tests.
#[derive(Default)]
pub struct MemoryAccountStore {
    tokens: Mutex<HashMap<(Uuid, Provider), TokenRecord>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store from resolved accounts, copying their token maps.
    pub fn from_accounts(accounts: &[Account]) -> Self {
        let store = Self::new();
        {
            let mut tokens = store.tokens.lock().unwrap();
            for account in accounts {
                for (key, record) in &account.settings.provider_tokens {
                    if let Ok(provider) = key.parse::<Provider>() {
                        tokens.insert((account.id, provider), record.clone());
                    }
                }
            }
        }
        store
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn token_record(
        &self,
        account_id: Uuid,
        provider: Provider,
    ) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .get(&(account_id, provider))
            .cloned())
    }

    async fn put_token_record(
        &self,
        account_id: Uuid,
        provider: Provider,
        record: TokenRecord,
    ) -> Result<(), StoreError> {
        self.tokens
            .lock()
            .unwrap()
            .insert((account_id, provider), record);
        Ok(())
    }

    async fn remove_token_record(
        &self,
        account_id: Uuid,
        provider: Provider,
    ) -> Result<bool, StoreError> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .remove(&(account_id, provider))
            .is_some())
    }
}

/// In-memory [`PostStore`].
#[derive(Default)]
pub struct MemoryPostStore {
    posts: Mutex<HashMap<Uuid, Post>>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, post: Post) {
        self.posts.lock().unwrap().insert(post.id, post);
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn post(&self, id: Uuid) -> Result<Option<Post>, StoreError> {
        Ok(self.posts.lock().unwrap().get(&id).cloned())
    }

    async fn update_post(&self, post: &Post) -> Result<(), StoreError> {
        self.posts.lock().unwrap().insert(post.id, post.clone());
        Ok(())
    }
}

/// In-memory [`RecommendationTracker`] that records every call, with an
/// optional failure switch so tests can prove tracking failures never fail a
/// publish.
#[derive(Default)]
pub struct MemoryTracker {
    calls: Mutex<Vec<(Uuid, String)>>,
    fail: Mutex<bool>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let tracker = Self::default();
        *tracker.fail.lock().unwrap() = true;
        tracker
    }

    pub fn calls(&self) -> Vec<(Uuid, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecommendationTracker for MemoryTracker {
    async fn add_published_url(
        &self,
        recommendation_id: Uuid,
        url: &str,
    ) -> Result<(), StoreError> {
        if *self.fail.lock().unwrap() {
            return Err(StoreError::Backend("tracker unavailable".to_string()));
        }
        self.calls
            .lock()
            .unwrap()
            .push((recommendation_id, url.to_string()));
        Ok(())
    }
}
