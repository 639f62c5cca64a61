use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::AccountStore;
use crate::account::{Account, AccountId};
use crate::errors::{CloudKeepError, Result};
use crate::provider::ProviderType;

/// Process-local store. Records are lost when the process exits.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<BTreeMap<AccountId, Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get_account(
        &self,
        provider_type: ProviderType,
        external_id: &str,
    ) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.provider_type == provider_type && a.external_id == external_id)
            .cloned())
    }

    async fn get_account_by_id(&self, id: &AccountId) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let clash = accounts.values().any(|a| {
            a.id != account.id
                && a.provider_type == account.provider_type
                && a.external_id == account.external_id
        });
        if clash {
            return Err(CloudKeepError::Storage(format!(
                "Account for {}/{} already exists",
                account.provider_type, account.external_id
            )));
        }
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn delete_account(&self, id: &AccountId) -> Result<bool> {
        Ok(self.accounts.write().await.remove(id).is_some())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.read().await.values().cloned().collect())
    }
}
