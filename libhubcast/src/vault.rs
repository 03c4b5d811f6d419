//! Serialized access to per-account provider tokens
//!
//! The token map is a read-modify-write structure. Two operations against the
//! same account and provider (say, a status check refreshing a token while a
//! publish reads it) would otherwise race and clobber each other's write, so
//! every mutation goes through a per-key async mutex held across the whole
//! read-modify-write sequence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::AccountStore;
use crate::types::{Provider, TokenRecord};

type Key = (Uuid, Provider);

pub struct TokenVault {
    store: Arc<dyn AccountStore>,
    locks: StdMutex<HashMap<Key, Arc<Mutex<()>>>>,
}

impl TokenVault {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            store,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, key: Key) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(key).or_default().clone()
    }

    /// Read the current record, if any.
    pub async fn read(
        &self,
        account_id: Uuid,
        provider: Provider,
    ) -> Result<Option<TokenRecord>> {
        let lock = self.lock_for((account_id, provider));
        let _guard = lock.lock().await;
        Ok(self.store.token_record(account_id, provider).await?)
    }

    /// Replace the record wholesale, stamping `updated_at`.
    pub async fn write(
        &self,
        account_id: Uuid,
        provider: Provider,
        mut record: TokenRecord,
    ) -> Result<()> {
        let lock = self.lock_for((account_id, provider));
        let _guard = lock.lock().await;
        record.updated_at = chrono::Utc::now();
        Ok(self
            .store
            .put_token_record(account_id, provider, record)
            .await?)
    }

    /// Mutate the existing record in place under the key lock.
    ///
    /// Fails with a backend error if no record exists; callers that may race
    /// with logout should treat that as a disconnected account.
    pub async fn update<F>(
        &self,
        account_id: Uuid,
        provider: Provider,
        mutate: F,
    ) -> Result<TokenRecord>
    where
        F: FnOnce(&mut TokenRecord) + Send,
    {
        let lock = self.lock_for((account_id, provider));
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .token_record(account_id, provider)
            .await?
            .ok_or_else(|| {
                StoreError::Backend(format!(
                    "no {} token record for account {}",
                    provider, account_id
                ))
            })?;

        mutate(&mut record);
        record.updated_at = chrono::Utc::now();

        self.store
            .put_token_record(account_id, provider, record.clone())
            .await?;
        Ok(record)
    }

    /// Remove the record. Idempotent; returns whether one existed.
    pub async fn remove(&self, account_id: Uuid, provider: Provider) -> Result<bool> {
        let lock = self.lock_for((account_id, provider));
        let _guard = lock.lock().await;
        Ok(self.store.remove_token_record(account_id, provider).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAccountStore;

    fn vault() -> TokenVault {
        TokenVault::new(Arc::new(MemoryAccountStore::new()))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let vault = vault();
        let account = Uuid::new_v4();

        vault
            .write(account, Provider::X, TokenRecord::new("tok"))
            .await
            .unwrap();

        let record = vault.read(account, Provider::X).await.unwrap().unwrap();
        assert_eq!(record.access_token, "tok");
    }

    #[tokio::test]
    async fn test_update_missing_record_fails() {
        let vault = vault();
        let result = vault
            .update(Uuid::new_v4(), Provider::Reddit, |r| {
                r.access_token = "new".to_string()
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_stamps_updated_at() {
        let vault = vault();
        let account = Uuid::new_v4();

        let mut stale = TokenRecord::new("tok");
        stale.updated_at = chrono::Utc::now() - chrono::Duration::days(30);
        vault.write(account, Provider::Reddit, stale).await.unwrap();

        let before = chrono::Utc::now() - chrono::Duration::seconds(5);
        let updated = vault
            .update(account, Provider::Reddit, |r| {
                r.access_token = "fresh".to_string()
            })
            .await
            .unwrap();

        assert_eq!(updated.access_token, "fresh");
        assert!(updated.updated_at > before);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let vault = vault();
        let account = Uuid::new_v4();

        vault
            .write(account, Provider::Blog, TokenRecord::new("tok"))
            .await
            .unwrap();

        assert!(vault.remove(account, Provider::Blog).await.unwrap());
        assert!(!vault.remove(account, Provider::Blog).await.unwrap());
        assert!(!vault.remove(account, Provider::Blog).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_updates_interleave_atomically() {
        let vault = Arc::new(vault());
        let account = Uuid::new_v4();

        let mut seed = TokenRecord::new("tok");
        seed.targets = Vec::new();
        vault
            .write(account, Provider::Facebook, seed)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let vault = vault.clone();
            handles.push(tokio::spawn(async move {
                vault
                    .update(account, Provider::Facebook, move |record| {
                        record
                            .targets
                            .push(crate::types::Target::new(i.to_string(), "t"));
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Without per-key serialization, concurrent read-modify-write cycles
        // would drop appends.
        let record = vault
            .read(account, Provider::Facebook)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.targets.len(), 20);
    }

    #[tokio::test]
    async fn test_keys_lock_independently() {
        let vault = Arc::new(vault());
        let account = Uuid::new_v4();

        vault
            .write(account, Provider::X, TokenRecord::new("a"))
            .await
            .unwrap();
        vault
            .write(account, Provider::Reddit, TokenRecord::new("b"))
            .await
            .unwrap();

        let x = vault.read(account, Provider::X).await.unwrap().unwrap();
        let reddit = vault.read(account, Provider::Reddit).await.unwrap().unwrap();
        assert_eq!(x.access_token, "a");
        assert_eq!(reddit.access_token, "b");
    }
}
