//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::account::{Account, AccountId, AccountStatus};
use crate::auth::broker::{Profile, TokenBroker, TokenGrant};
use crate::auth::callback::{AuthSurface, CallbackParams, RedirectOutcome};
use crate::config::dynamic::DynamicConfig;
use crate::errors::{AuthFailure, Result};
use crate::provider::{ProviderCatalog, ProviderConfiguration, ProviderType};
use crate::registry::{AccountRegistry, AccountStore, AuthenticatedIdentity, MemoryAccountStore};

pub const TEST_BASE: &str = "https://auth.test";

pub fn catalog() -> ProviderCatalog {
    let config = DynamicConfig {
        intermediary_base_url: TEST_BASE.into(),
        ..DynamicConfig::default()
    };
    ProviderCatalog::from_config(&config).unwrap()
}

pub fn google_config() -> ProviderConfiguration {
    ProviderConfiguration::google_drive(TEST_BASE, "cloudkeep").unwrap()
}

pub fn onedrive_config() -> ProviderConfiguration {
    ProviderConfiguration::onedrive(TEST_BASE, "cloudkeep").unwrap()
}

/// A Google Drive account in `ok` state, valid for another hour.
pub fn account(id: &str, external_id: &str) -> Account {
    let now = Utc::now() - chrono::Duration::minutes(1);
    Account {
        id: AccountId::new(id),
        provider_type: ProviderType::GoogleDrive,
        external_id: external_id.into(),
        access_token: format!("access-token-for-{external_id}"),
        refresh_token: Some(format!("refresh-token-for-{external_id}")),
        expires_at: Some(now + chrono::Duration::hours(1)),
        display_name: "Test User".into(),
        email: format!("{external_id}@example.com"),
        photo_url: None,
        status: AccountStatus::Ok,
        last_error: None,
        created_at: now,
        updated_at: now,
        metadata: serde_json::Map::new(),
    }
}

pub fn identity(external_id: &str, access: &str, refresh: Option<&str>) -> AuthenticatedIdentity {
    AuthenticatedIdentity {
        provider_type: ProviderType::GoogleDrive,
        external_id: external_id.into(),
        access_token: access.into(),
        refresh_token: refresh.map(str::to_string),
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        display_name: "Test User".into(),
        email: format!("{external_id}@example.com"),
        photo_url: None,
    }
}

pub fn grant(access: &str, refresh: Option<&str>, expires_in: Option<i64>) -> TokenGrant {
    TokenGrant {
        access_token: access.into(),
        refresh_token: refresh.map(str::to_string),
        expires_at: expires_in.map(|s| Utc::now() + chrono::Duration::seconds(s)),
        profile: None,
    }
}

pub fn grant_for(external_id: &str, access: &str, refresh: Option<&str>) -> TokenGrant {
    TokenGrant {
        profile: Some(Profile {
            id: external_id.into(),
            name: "Test User".into(),
            email: format!("{external_id}@example.com"),
            photo_url: None,
        }),
        ..grant(access, refresh, Some(3600))
    }
}

/// Memory store that counts writes.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryAccountStore,
    saves: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountStore for CountingStore {
    async fn get_account(
        &self,
        provider_type: ProviderType,
        external_id: &str,
    ) -> Result<Option<Account>> {
        self.inner.get_account(provider_type, external_id).await
    }

    async fn get_account_by_id(&self, id: &AccountId) -> Result<Option<Account>> {
        self.inner.get_account_by_id(id).await
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_account(account).await
    }

    async fn delete_account(&self, id: &AccountId) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_account(id).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.inner.list_accounts().await
    }
}

/// Registry over a `CountingStore`.
pub struct TestRegistry {
    pub store: Arc<CountingStore>,
    pub registry: Arc<AccountRegistry>,
}

impl TestRegistry {
    pub fn new() -> Self {
        let store = Arc::new(CountingStore::new());
        let registry = Arc::new(AccountRegistry::new(store.clone()));
        Self { store, registry }
    }

    pub async fn insert(&self, account: Account) -> Account {
        self.store.inner.save_account(&account).await.unwrap();
        account
    }

    pub async fn insert_ok(&self, external_id: &str, refresh: Option<&str>) -> Account {
        let mut acc = account(&format!("acc_{external_id}"), external_id);
        acc.refresh_token = refresh.map(str::to_string);
        self.insert(acc).await
    }

    /// Account whose token expires at `now + offset` (negative = already expired).
    pub async fn insert_expired(
        &self,
        external_id: &str,
        refresh: Option<&str>,
        offset: chrono::Duration,
    ) -> Account {
        let mut acc = account(&format!("acc_{external_id}"), external_id);
        acc.refresh_token = refresh.map(str::to_string);
        acc.expires_at = Some(Utc::now() + offset);
        self.insert(acc).await
    }
}

/// Token broker returning queued responses.
pub struct ScriptedBroker {
    retrieve: Mutex<VecDeque<std::result::Result<TokenGrant, AuthFailure>>>,
    refresh: Mutex<VecDeque<std::result::Result<TokenGrant, AuthFailure>>>,
    retrieve_states: Mutex<Vec<String>>,
    refresh_tokens: Mutex<Vec<String>>,
    retrieve_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            retrieve: Mutex::new(VecDeque::new()),
            refresh: Mutex::new(VecDeque::new()),
            retrieve_states: Mutex::new(Vec::new()),
            refresh_tokens: Mutex::new(Vec::new()),
            retrieve_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn push_retrieve(&self, response: std::result::Result<TokenGrant, AuthFailure>) {
        self.retrieve.lock().unwrap().push_back(response);
    }

    pub fn push_refresh(&self, response: std::result::Result<TokenGrant, AuthFailure>) {
        self.refresh.lock().unwrap().push_back(response);
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn retrieve_states(&self) -> Vec<String> {
        self.retrieve_states.lock().unwrap().clone()
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens.lock().unwrap().clone()
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl TokenBroker for ScriptedBroker {
    async fn retrieve_token(
        &self,
        _config: &ProviderConfiguration,
        state: &str,
    ) -> std::result::Result<TokenGrant, AuthFailure> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        self.retrieve_states.lock().unwrap().push(state.to_string());
        self.pause().await;
        self.retrieve
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AuthFailure::ProviderError("unscripted retrieve".into())))
    }

    async fn refresh(
        &self,
        _config: &ProviderConfiguration,
        refresh_token: &str,
    ) -> std::result::Result<TokenGrant, AuthFailure> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        self.pause().await;
        self.refresh
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AuthFailure::ProviderError("unscripted refresh".into())))
    }
}

/// Authentication surface with a fixed behaviour.
pub enum ScriptedSurface {
    /// Redirect with a code and the state taken from the authorization URL.
    EchoState,
    Cancelled,
}

impl ScriptedSurface {
    pub fn echo_state() -> Self {
        ScriptedSurface::EchoState
    }

    pub fn cancelled() -> Self {
        ScriptedSurface::Cancelled
    }
}

#[async_trait]
impl AuthSurface for ScriptedSurface {
    async fn authenticate(
        &self,
        authorization_url: &str,
        _redirect_scheme: &str,
    ) -> Result<RedirectOutcome> {
        match self {
            ScriptedSurface::Cancelled => Ok(RedirectOutcome::Cancelled),
            ScriptedSurface::EchoState => {
                let incoming = CallbackParams::from_url(authorization_url)?;
                Ok(RedirectOutcome::Redirected(CallbackParams {
                    code: Some("code-from-provider".into()),
                    state: incoming.state,
                    error: None,
                    error_description: None,
                }))
            }
        }
    }
}
