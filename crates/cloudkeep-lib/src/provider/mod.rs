//! Provider declarations.
//!
//! A `ProviderConfiguration` is an immutable record built once per process.
//! Its URL generators always point at the trusted intermediary server,
//! which holds the provider client secret; nothing in this module ever
//! carries a secret.

pub mod capabilities;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

pub use capabilities::{capabilities_of, Capability, CapabilitySet};

use crate::config::dynamic::DynamicConfig;
use crate::errors::{CloudKeepError, Result};

/// The kind of storage provider an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    GoogleDrive,
    #[serde(rename = "onedrive")]
    OneDrive,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::GoogleDrive => "google_drive",
            ProviderType::OneDrive => "onedrive",
        }
    }

    pub fn all() -> &'static [ProviderType] {
        &[ProviderType::GoogleDrive, ProviderType::OneDrive]
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = CloudKeepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google_drive" | "gdrive" | "googledrive" => Ok(ProviderType::GoogleDrive),
            "onedrive" | "one_drive" => Ok(ProviderType::OneDrive),
            other => Err(CloudKeepError::Config(format!("Unknown provider type: {other}"))),
        }
    }
}

/// Immutable declaration of one configured provider.
#[derive(Debug, Clone)]
pub struct ProviderConfiguration {
    provider_type: ProviderType,
    display_name: String,
    auth_url_base: Url,
    token_url_base: Url,
    refresh_url_base: Url,
    redirect_scheme: String,
    required_scopes: Vec<String>,
    capabilities: CapabilitySet,
}

impl ProviderConfiguration {
    /// Build a configuration. All three endpoint bases must be absolute
    /// `http`/`https` URLs on the intermediary server.
    pub fn new(
        provider_type: ProviderType,
        display_name: &str,
        auth_url_base: &str,
        token_url_base: &str,
        refresh_url_base: &str,
        redirect_scheme: &str,
        required_scopes: &[&str],
        capabilities: CapabilitySet,
    ) -> Result<Self> {
        Ok(Self {
            provider_type,
            display_name: display_name.to_string(),
            auth_url_base: parse_endpoint(auth_url_base)?,
            token_url_base: parse_endpoint(token_url_base)?,
            refresh_url_base: parse_endpoint(refresh_url_base)?,
            redirect_scheme: redirect_scheme.to_string(),
            required_scopes: required_scopes.iter().map(|s| s.to_string()).collect(),
            capabilities,
        })
    }

    /// Google Drive served through `<intermediary>/google_drive/...`.
    pub fn google_drive(intermediary_base: &str, redirect_scheme: &str) -> Result<Self> {
        let base = intermediary_base.trim_end_matches('/');
        Self::new(
            ProviderType::GoogleDrive,
            "Google Drive",
            &format!("{base}/google_drive/auth"),
            &format!("{base}/google_drive/token"),
            &format!("{base}/google_drive/refresh"),
            redirect_scheme,
            &["https://www.googleapis.com/auth/drive"],
            CapabilitySet {
                can_upload: true,
                can_create_folders: true,
                can_delete: true,
                can_permanent_delete: true,
                can_search: true,
                can_chunked_upload: true,
                has_thumbnails: true,
                can_share: true,
                can_move: true,
                can_copy: true,
                can_rename: true,
                max_upload_size: Some(5 * 1024 * 1024 * 1024 * 1024),
                max_page_size: 1000,
            },
        )
    }

    /// OneDrive served through `<intermediary>/onedrive/...`.
    ///
    /// Deleted items go to the recycle bin; permanent deletion is not offered.
    pub fn onedrive(intermediary_base: &str, redirect_scheme: &str) -> Result<Self> {
        let base = intermediary_base.trim_end_matches('/');
        Self::new(
            ProviderType::OneDrive,
            "OneDrive",
            &format!("{base}/onedrive/auth"),
            &format!("{base}/onedrive/token"),
            &format!("{base}/onedrive/refresh"),
            redirect_scheme,
            &["Files.ReadWrite.All", "User.Read", "offline_access"],
            CapabilitySet {
                can_upload: true,
                can_create_folders: true,
                can_delete: true,
                can_permanent_delete: false,
                can_search: true,
                can_chunked_upload: true,
                has_thumbnails: true,
                can_share: true,
                can_move: true,
                can_copy: true,
                can_rename: true,
                max_upload_size: Some(250 * 1024 * 1024 * 1024),
                max_page_size: 200,
            },
        )
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn redirect_scheme(&self) -> &str {
        &self.redirect_scheme
    }

    pub fn required_scopes(&self) -> &[String] {
        &self.required_scopes
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// `GET authUrlBase?state=<state>`: begins the consent redirect.
    pub fn auth_url(&self, state: &str) -> String {
        let mut url = self.auth_url_base.clone();
        url.query_pairs_mut().append_pair("state", state);
        url.to_string()
    }

    /// `GET tokenUrlBase/<state>`: token retrieval once the intermediary
    /// finished the code exchange.
    pub fn token_url(&self, state: &str) -> String {
        let mut url = self.token_url_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(state);
        }
        url.to_string()
    }

    /// `POST refreshUrlBase`: token renewal.
    pub fn refresh_url(&self) -> String {
        self.refresh_url_base.to_string()
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| CloudKeepError::Config(format!("Invalid endpoint URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CloudKeepError::Config(format!(
            "Endpoint URL '{raw}' must use http or https, not {other}"
        ))),
    }
}

/// The set of configured providers, keyed by type.
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalog {
    providers: BTreeMap<ProviderType, ProviderConfiguration>,
}

impl ProviderCatalog {
    pub fn new(configs: impl IntoIterator<Item = ProviderConfiguration>) -> Self {
        Self {
            providers: configs
                .into_iter()
                .map(|c| (c.provider_type(), c))
                .collect(),
        }
    }

    /// Build the built-in declarations for every provider enabled in `config`.
    pub fn from_config(config: &DynamicConfig) -> Result<Self> {
        let mut configs = Vec::new();
        for name in &config.enabled_providers {
            let kind: ProviderType = name.parse()?;
            let declared = match kind {
                ProviderType::GoogleDrive => ProviderConfiguration::google_drive(
                    &config.intermediary_base_url,
                    &config.redirect_scheme,
                )?,
                ProviderType::OneDrive => ProviderConfiguration::onedrive(
                    &config.intermediary_base_url,
                    &config.redirect_scheme,
                )?,
            };
            configs.push(declared);
        }
        Ok(Self::new(configs))
    }

    pub fn get(&self, provider_type: ProviderType) -> Result<&ProviderConfiguration> {
        self.providers.get(&provider_type).ok_or_else(|| {
            CloudKeepError::Config(format!("Provider '{provider_type}' is not enabled"))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderConfiguration> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
