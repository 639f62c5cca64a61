//! `commands` CLI command (list registered commands) and `ServiceRegistry`,
//! the holder for lazily-built services shared by every handler.
//!
//! Named `registry_cmd` to avoid conflict with the `cli::registry` module.

use std::sync::Arc;

use clap::{ArgMatches, Command};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::auth::{
    AccountStatusClassifier, HttpTokenBroker, OAuthFlowCoordinator, TokenBroker,
    TokenRefreshManager,
};
use crate::cli::{self, CommandBuilder, CommandCategory, CommandMeta, CommandRegistry};
use crate::config::manager::DynamicConfigManager;
use crate::config::simplified::SimplifiedConfig;
use crate::errors::{CloudKeepError, Result};
use crate::http_client::HttpClient;
use crate::provider::ProviderCatalog;
use crate::registry::{AccountRegistry, AccountStore, SqliteAccountStore};

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Services built on first use.
///
/// Commands like `version` or `config path` never open the accounts
/// database or build the provider catalog. Once built, the catalog stays
/// fixed for the rest of the process even if the config file changes.
pub struct ServiceRegistry {
    pub config_manager: Arc<DynamicConfigManager>,
    pub http_client: HttpClient,
    shutdown: CancellationToken,
    catalog: OnceCell<Arc<ProviderCatalog>>,
    store: OnceCell<Arc<dyn AccountStore>>,
    broker: OnceCell<Arc<dyn TokenBroker>>,
    accounts: OnceCell<Arc<AccountRegistry>>,
    refresher: OnceCell<Arc<TokenRefreshManager>>,
    classifier: OnceCell<Arc<AccountStatusClassifier>>,
    coordinator: OnceCell<Arc<OAuthFlowCoordinator>>,
}

impl ServiceRegistry {
    pub fn new(
        config_manager: Arc<DynamicConfigManager>,
        http_client: HttpClient,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config_manager,
            http_client,
            shutdown,
            catalog: OnceCell::new(),
            store: OnceCell::new(),
            broker: OnceCell::new(),
            accounts: OnceCell::new(),
            refresher: OnceCell::new(),
            classifier: OnceCell::new(),
            coordinator: OnceCell::new(),
        }
    }

    /// Use `store` and `broker` instead of the SQLite file and the HTTP
    /// intermediary.
    pub fn with_backends(mut self, store: Arc<dyn AccountStore>, broker: Arc<dyn TokenBroker>) -> Self {
        self.store = OnceCell::new_with(Some(store));
        self.broker = OnceCell::new_with(Some(broker));
        self
    }

    /// Rebuild the shared `HttpClient` whenever the config changes.
    pub async fn register_config_listeners(&self) {
        let http = self.http_client.clone();
        self.config_manager
            .register_on_change(move |cfg| {
                let http = http.clone();
                let cfg = cfg.clone();
                tokio::spawn(async move {
                    if let Err(e) = http.update_from_config(&cfg).await {
                        tracing::warn!("Failed to update HttpClient from config: {e}");
                    }
                });
            })
            .await;
    }

    /// Cancelled on Ctrl-C / SIGTERM.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn catalog(&self) -> Result<&Arc<ProviderCatalog>> {
        self.catalog
            .get_or_try_init(|| async {
                let config = self.config_manager.get_config().await;
                let catalog = ProviderCatalog::from_config(&config)?;
                tracing::debug!(providers = catalog.len(), "Provider catalog built");
                Ok::<_, CloudKeepError>(Arc::new(catalog))
            })
            .await
    }

    async fn store(&self) -> Result<&Arc<dyn AccountStore>> {
        self.store
            .get_or_try_init(|| async {
                let path = SimplifiedConfig::get().accounts_db_file.clone();
                let store = SqliteAccountStore::open(path)?;
                Ok::<_, CloudKeepError>(Arc::new(store) as Arc<dyn AccountStore>)
            })
            .await
    }

    async fn broker(&self) -> &Arc<dyn TokenBroker> {
        self.broker
            .get_or_init(|| async {
                Arc::new(HttpTokenBroker::new(self.http_client.clone())) as Arc<dyn TokenBroker>
            })
            .await
    }

    pub async fn accounts(&self) -> Result<&Arc<AccountRegistry>> {
        self.accounts
            .get_or_try_init(|| async {
                let store = self.store().await?.clone();
                Ok::<_, CloudKeepError>(Arc::new(AccountRegistry::new(store)))
            })
            .await
    }

    pub async fn refresher(&self) -> Result<&Arc<TokenRefreshManager>> {
        self.refresher
            .get_or_try_init(|| async {
                let config = self.config_manager.get_config().await;
                Ok::<_, CloudKeepError>(Arc::new(TokenRefreshManager::new(
                    self.accounts().await?.clone(),
                    self.broker().await.clone(),
                    self.catalog().await?.clone(),
                    config.refresh_timeout(),
                    config.refresh_margin(),
                )))
            })
            .await
    }

    pub async fn classifier(&self) -> Result<&Arc<AccountStatusClassifier>> {
        self.classifier
            .get_or_try_init(|| async {
                Ok::<_, CloudKeepError>(Arc::new(AccountStatusClassifier::new(
                    self.accounts().await?.clone(),
                    self.refresher().await?.clone(),
                )))
            })
            .await
    }

    pub async fn coordinator(&self) -> Result<&Arc<OAuthFlowCoordinator>> {
        self.coordinator
            .get_or_try_init(|| async {
                let config = self.config_manager.get_config().await;
                Ok::<_, CloudKeepError>(Arc::new(OAuthFlowCoordinator::new(
                    self.accounts().await?.clone(),
                    self.broker().await.clone(),
                    config.auth_timeout(),
                )))
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// `commands` command
// ---------------------------------------------------------------------------

pub fn commands_command() -> Command {
    Command::new("commands").about("List available commands by category")
}

pub fn commands_meta() -> CommandMeta {
    CommandBuilder::from_clap(commands_command())
        .category(CommandCategory::Utility)
        .build()
}

pub fn handle_commands(matches: &ArgMatches) -> Result<()> {
    let mut registry = CommandRegistry::new(cli::create_root_command());
    super::register_commands(&mut registry)?;
    if cli::is_json(matches) {
        println!("{}", registry.render_listing_json()?);
    } else {
        print!("{}", registry.render_listing());
    }
    Ok(())
}
