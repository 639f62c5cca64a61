//! Shared HTTP client with connection pooling and DynamicConfig integration.
//!
//! Wraps `reqwest::Client` and rebuilds it when timeouts or pool settings
//! change. Clones share the same inner client.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::config::dynamic::DynamicConfig;
use crate::errors::{CloudKeepError, Result};

#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<RwLock<reqwest::Client>>,
}

impl HttpClient {
    /// Build a new `HttpClient` configured from the given `DynamicConfig`.
    pub fn new(config: &DynamicConfig) -> Result<Self> {
        let client = Self::build_client(config)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(client)),
        })
    }

    /// Build an `HttpClient` using `DynamicConfig::default()`.
    pub fn from_defaults() -> Result<Self> {
        Self::new(&DynamicConfig::default())
    }

    /// Get a clone of the current `reqwest::Client` (cheap, internally `Arc`-ed).
    pub async fn get_client(&self) -> reqwest::Client {
        self.inner.read().await.clone()
    }

    /// Rebuild the inner client from an updated `DynamicConfig`.
    ///
    /// Called from a `DynamicConfigManager::register_on_change` callback.
    pub async fn update_from_config(&self, config: &DynamicConfig) -> Result<()> {
        let new_client = Self::build_client(config)?;
        *self.inner.write().await = new_client;
        Ok(())
    }

    fn build_client(config: &DynamicConfig) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(concat!("cloudkeep/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(u64::from(config.timeout)))
            .connect_timeout(Duration::from_secs(u64::from(config.connect_timeout)))
            .pool_max_idle_per_host(config.max_idle_conns_per_host as usize)
            .pool_idle_timeout(Duration::from_secs(u64::from(config.idle_conn_timeout)))
            .build()
            .map_err(|e| CloudKeepError::Config(format!("Failed to build HTTP client: {e}")))
    }
}
