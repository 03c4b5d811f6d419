//! Mock connector for integration tests
//!
//! Stands in for a real provider so pipeline and router behavior can be
//! exercised without network traffic. Call counters let tests assert that a
//! rejected operation never reached the provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{ProviderError, Result};
use crate::providers::Connector;
use crate::store::MemoryAccountStore;
use crate::types::{Account, ConnectResult, Post, Provider, PublishedArtifact, Target, TokenRecord};
use crate::vault::TokenVault;

pub struct MockConnector {
    provider: Provider,
    vault: Arc<TokenVault>,
    connected: Mutex<bool>,
    create_error: Mutex<Option<ProviderError>>,
    create_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl MockConnector {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            vault: Arc::new(TokenVault::new(Arc::new(MemoryAccountStore::new()))),
            connected: Mutex::new(true),
            create_error: Mutex::new(None),
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    /// Make `status` report the connection as unusable.
    pub fn disconnected(self) -> Self {
        *self.connected.lock().unwrap() = false;
        self
    }

    /// Make every `create_content` call fail with the given error.
    pub fn failing(self, error: ProviderError) -> Self {
        *self.create_error.lock().unwrap() = Some(error);
        self
    }

    /// How many times the provider's create endpoint would have been hit.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn vault(&self) -> &TokenVault {
        &self.vault
    }

    async fn connect(
        &self,
        account: &Account,
        _code: &str,
        _code_verifier: Option<&str>,
    ) -> Result<ConnectResult> {
        let targets = vec![Target::new("mock-target", "Mock Target")];
        let mut record = TokenRecord::new("mock-token");
        record.targets = targets.clone();
        self.vault.write(account.id, self.provider, record).await?;
        Ok(ConnectResult {
            message: format!("{} connected", self.provider),
            targets,
        })
    }

    async fn status(&self, _account: &Account) -> bool {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        *self.connected.lock().unwrap()
    }

    async fn create_content(&self, _account: &Account, post: &Post) -> Result<PublishedArtifact> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.create_error.lock().unwrap().clone() {
            return Err(error.into());
        }
        Ok(PublishedArtifact {
            external_id: format!("mock-{}", post.id),
            url: format!("https://{}.example.com/posts/mock-{}", self.provider, post.id),
        })
    }
}
