//! Guarded access to provider file APIs.
//!
//! `FileService` is the narrow interface a provider-specific REST client
//! implements. `Drive` binds one account to a service: every call checks
//! the declared capability first, then runs through the status
//! classifier's guarded execution.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::auth::classifier::{AccountStatusClassifier, OperationError};
use crate::errors::Result;
use crate::provider::{Capability, CapabilitySet};

/// Uploads larger than this use the provider's chunked upload when declared.
pub const CHUNKED_UPLOAD_THRESHOLD: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub id: String,
    pub name: String,
    pub is_folder: bool,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    pub entries: Vec<FileEntry>,
    pub next_page_token: Option<String>,
}

/// Provider file operations, called with a current access token.
#[async_trait]
pub trait FileService: Send + Sync {
    async fn list(
        &self,
        access_token: &str,
        folder_id: Option<&str>,
        page_token: Option<&str>,
        page_size: u32,
    ) -> std::result::Result<FilePage, OperationError>;

    async fn download(&self, access_token: &str, file_id: &str)
        -> std::result::Result<Vec<u8>, OperationError>;

    async fn upload(
        &self,
        access_token: &str,
        parent_id: Option<&str>,
        name: &str,
        data: &[u8],
        chunked: bool,
    ) -> std::result::Result<FileEntry, OperationError>;

    async fn create_folder(
        &self,
        access_token: &str,
        parent_id: Option<&str>,
        name: &str,
    ) -> std::result::Result<FileEntry, OperationError>;

    /// Move to the provider's trash / recycle bin.
    async fn delete(&self, access_token: &str, file_id: &str)
        -> std::result::Result<(), OperationError>;

    async fn permanent_delete(&self, access_token: &str, file_id: &str)
        -> std::result::Result<(), OperationError>;

    async fn rename(
        &self,
        access_token: &str,
        file_id: &str,
        new_name: &str,
    ) -> std::result::Result<FileEntry, OperationError>;

    async fn move_item(
        &self,
        access_token: &str,
        file_id: &str,
        new_parent_id: &str,
    ) -> std::result::Result<FileEntry, OperationError>;

    async fn copy(
        &self,
        access_token: &str,
        file_id: &str,
        new_parent_id: Option<&str>,
    ) -> std::result::Result<FileEntry, OperationError>;

    async fn search(
        &self,
        access_token: &str,
        query: &str,
        page_size: u32,
    ) -> std::result::Result<FilePage, OperationError>;

    /// Create a shareable link and return it.
    async fn share(&self, access_token: &str, file_id: &str)
        -> std::result::Result<String, OperationError>;

    async fn thumbnail(&self, access_token: &str, file_id: &str)
        -> std::result::Result<Vec<u8>, OperationError>;
}

/// One account's files, behind capability checks and status handling.
pub struct Drive {
    account_id: AccountId,
    capabilities: CapabilitySet,
    classifier: Arc<AccountStatusClassifier>,
    service: Arc<dyn FileService>,
}

impl Drive {
    pub fn new(
        account_id: AccountId,
        capabilities: CapabilitySet,
        classifier: Arc<AccountStatusClassifier>,
        service: Arc<dyn FileService>,
    ) -> Self {
        Self {
            account_id,
            capabilities,
            classifier,
            service,
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// List a folder (root when `folder_id` is `None`). The page size is
    /// clamped to the provider's maximum.
    pub async fn list(
        &self,
        folder_id: Option<&str>,
        page_token: Option<&str>,
        page_size: Option<u32>,
    ) -> Result<FilePage> {
        let size = self.capabilities.page_size(page_size);
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move {
                    service
                        .list(&account.access_token, folder_id, page_token, size)
                        .await
                }
            })
            .await
    }

    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move { service.download(&account.access_token, file_id).await }
            })
            .await
    }

    pub async fn upload(&self, parent_id: Option<&str>, name: &str, data: &[u8]) -> Result<FileEntry> {
        let size = data.len() as u64;
        self.capabilities.ensure_upload(size)?;
        let chunked = self.capabilities.can_chunked_upload && size > CHUNKED_UPLOAD_THRESHOLD;
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move {
                    service
                        .upload(&account.access_token, parent_id, name, data, chunked)
                        .await
                }
            })
            .await
    }

    pub async fn create_folder(&self, parent_id: Option<&str>, name: &str) -> Result<FileEntry> {
        self.capabilities.ensure(Capability::CreateFolders)?;
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move {
                    service
                        .create_folder(&account.access_token, parent_id, name)
                        .await
                }
            })
            .await
    }

    pub async fn delete(&self, file_id: &str) -> Result<()> {
        self.capabilities.ensure(Capability::Delete)?;
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move { service.delete(&account.access_token, file_id).await }
            })
            .await
    }

    pub async fn permanent_delete(&self, file_id: &str) -> Result<()> {
        self.capabilities.ensure(Capability::PermanentDelete)?;
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move { service.permanent_delete(&account.access_token, file_id).await }
            })
            .await
    }

    pub async fn rename(&self, file_id: &str, new_name: &str) -> Result<FileEntry> {
        self.capabilities.ensure(Capability::Rename)?;
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move { service.rename(&account.access_token, file_id, new_name).await }
            })
            .await
    }

    pub async fn move_item(&self, file_id: &str, new_parent_id: &str) -> Result<FileEntry> {
        self.capabilities.ensure(Capability::Move)?;
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move {
                    service
                        .move_item(&account.access_token, file_id, new_parent_id)
                        .await
                }
            })
            .await
    }

    pub async fn copy(&self, file_id: &str, new_parent_id: Option<&str>) -> Result<FileEntry> {
        self.capabilities.ensure(Capability::Copy)?;
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move { service.copy(&account.access_token, file_id, new_parent_id).await }
            })
            .await
    }

    pub async fn search(&self, query: &str, page_size: Option<u32>) -> Result<FilePage> {
        self.capabilities.ensure(Capability::Search)?;
        let size = self.capabilities.page_size(page_size);
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move { service.search(&account.access_token, query, size).await }
            })
            .await
    }

    pub async fn share(&self, file_id: &str) -> Result<String> {
        self.capabilities.ensure(Capability::Share)?;
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move { service.share(&account.access_token, file_id).await }
            })
            .await
    }

    pub async fn thumbnail(&self, file_id: &str) -> Result<Vec<u8>> {
        self.capabilities.ensure(Capability::Thumbnails)?;
        self.classifier
            .execute(&self.account_id, |account| {
                let service = self.service.clone();
                async move { service.thumbnail(&account.access_token, file_id).await }
            })
            .await
    }
}
