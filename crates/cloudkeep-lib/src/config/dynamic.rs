use serde::{Deserialize, Serialize};

/// User-editable settings persisted as camelCase JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DynamicConfig {
    #[serde(rename = "intermediaryBaseUrl")]
    pub intermediary_base_url: String,
    #[serde(rename = "redirectScheme")]
    pub redirect_scheme: String,
    #[serde(rename = "callbackPort")]
    pub callback_port: u16,
    #[serde(rename = "authTimeout")]
    pub auth_timeout: u32,
    #[serde(rename = "refreshTimeout")]
    pub refresh_timeout: u32,
    #[serde(rename = "refreshMarginSecs")]
    pub refresh_margin_secs: u32,
    pub timeout: u32,
    #[serde(rename = "connectTimeout")]
    pub connect_timeout: u32,
    #[serde(rename = "idleConnTimeout")]
    pub idle_conn_timeout: u32,
    #[serde(rename = "maxIdleConnsPerHost")]
    pub max_idle_conns_per_host: u32,
    #[serde(rename = "enabledProviders")]
    pub enabled_providers: Vec<String>,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            intermediary_base_url: "https://auth.cloudkeep.app".into(),
            redirect_scheme: "cloudkeep".into(),
            callback_port: 8765,
            auth_timeout: 300,
            refresh_timeout: 30,
            refresh_margin_secs: 300,
            timeout: 30,
            connect_timeout: 10,
            idle_conn_timeout: 90,
            max_idle_conns_per_host: 16,
            enabled_providers: vec!["google_drive".into(), "onedrive".into()],
        }
    }
}

impl DynamicConfig {
    pub fn refresh_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.refresh_timeout.max(1)))
    }

    pub fn auth_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.auth_timeout.max(1)))
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.refresh_margin_secs))
    }
}
