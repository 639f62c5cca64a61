//! Account registry.
//!
//! `AccountStore` is the persistence collaborator (memory or SQLite).
//! `AccountRegistry` wraps a store and serializes every mutation per
//! account id, so a refresh and a classifier-driven status change that
//! race on the same account never lose each other's update.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::account::{Account, AccountId, AccountStatus};
use crate::errors::{CloudKeepError, Result};
use crate::provider::ProviderType;

pub use memory::MemoryAccountStore;
pub use sqlite::SqliteAccountStore;

/// Persistence backend for account records.
///
/// Implementations enforce uniqueness of `(provider_type, external_id)`.
/// Deleting a record is purely local.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(
        &self,
        provider_type: ProviderType,
        external_id: &str,
    ) -> Result<Option<Account>>;

    async fn get_account_by_id(&self, id: &AccountId) -> Result<Option<Account>>;

    /// Insert or replace the record with `account.id`.
    async fn save_account(&self, account: &Account) -> Result<()>;

    /// Returns `false` when no record had that id.
    async fn delete_account(&self, id: &AccountId) -> Result<bool>;

    async fn list_accounts(&self) -> Result<Vec<Account>>;
}

/// Profile and token material produced by a successful handshake.
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    pub provider_type: ProviderType,
    pub external_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<chrono::DateTime<Utc>>,
    pub display_name: String,
    pub email: String,
    pub photo_url: Option<String>,
}

/// Shared, injected registry used by every auth component.
pub struct AccountRegistry {
    store: Arc<dyn AccountStore>,
    locks: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
    // creation of new records is serialized so two handshakes for the
    // same identity cannot both insert
    create_lock: Mutex<()>,
}

impl AccountRegistry {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    pub async fn get(&self, id: &AccountId) -> Result<Account> {
        self.store
            .get_account_by_id(id)
            .await?
            .ok_or_else(|| CloudKeepError::AccountNotFound(id.to_string()))
    }

    pub async fn get_by_identity(
        &self,
        provider_type: ProviderType,
        external_id: &str,
    ) -> Result<Option<Account>> {
        self.store.get_account(provider_type, external_id).await
    }

    pub async fn list(&self) -> Result<Vec<Account>> {
        self.store.list_accounts().await
    }

    /// Atomic read-modify-write of one account.
    ///
    /// The closure sees the latest stored record. Nothing is written when
    /// it leaves the record unchanged.
    pub async fn update<F>(&self, id: &AccountId, mutate: F) -> Result<Account>
    where
        F: FnOnce(&mut Account) + Send,
    {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let current = self.get(id).await?;
        let mut next = current.clone();
        mutate(&mut next);
        if next != current {
            self.store.save_account(&next).await?;
            if next.status != current.status {
                tracing::info!(
                    account_id = %id,
                    from = %current.status,
                    to = %next.status,
                    "Account status changed"
                );
            }
        }
        Ok(next)
    }

    /// Create or update the account for a freshly authenticated identity.
    ///
    /// The resulting record is `ok` with prior error detail cleared.
    /// Existing records keep their id, `created_at` and metadata.
    pub async fn upsert_authenticated(&self, identity: AuthenticatedIdentity) -> Result<Account> {
        let _create = self.create_lock.lock().await;

        if let Some(existing) = self
            .store
            .get_account(identity.provider_type, &identity.external_id)
            .await?
        {
            return self
                .update(&existing.id, move |account| {
                    let now = Utc::now();
                    account.access_token = identity.access_token;
                    if identity.refresh_token.is_some() {
                        account.refresh_token = identity.refresh_token;
                    }
                    account.expires_at = identity.expires_at;
                    account.display_name = identity.display_name;
                    account.email = identity.email;
                    account.photo_url = identity.photo_url;
                    account.mark_ok(now);
                })
                .await;
        }

        let now = Utc::now();
        let account = Account {
            id: AccountId::generate()?,
            provider_type: identity.provider_type,
            external_id: identity.external_id,
            access_token: identity.access_token,
            refresh_token: identity.refresh_token,
            expires_at: identity.expires_at,
            display_name: identity.display_name,
            email: identity.email,
            photo_url: identity.photo_url,
            status: AccountStatus::Ok,
            last_error: None,
            created_at: now,
            updated_at: now,
            metadata: serde_json::Map::new(),
        };
        self.store.save_account(&account).await?;
        tracing::info!(
            account_id = %account.id,
            provider = %account.provider_type,
            "Account added"
        );
        Ok(account)
    }

    /// Remove an account locally. The provider grant is left untouched.
    pub async fn delete(&self, id: &AccountId) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        if !self.store.delete_account(id).await? {
            return Err(CloudKeepError::AccountNotFound(id.to_string()));
        }
        self.locks.lock().await.remove(id);
        tracing::info!(account_id = %id, "Account removed");
        Ok(())
    }

    async fn lock_for(&self, id: &AccountId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
