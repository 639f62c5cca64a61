//! Declared, static capability sets.
//!
//! A `CapabilitySet` is fixed when a `ProviderConfiguration` is built and
//! never probed over the network. Callers check it before invoking an
//! operation; calling something the set declares unsupported is a caller
//! defect reported as [`AuthFailure::CapabilityViolation`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::AuthFailure;

use super::ProviderConfiguration;

/// An operation that a provider may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Upload,
    CreateFolders,
    Delete,
    PermanentDelete,
    Search,
    ChunkedUpload,
    Thumbnails,
    Share,
    Move,
    Copy,
    Rename,
}

impl Capability {
    /// Returns all capability variants in display order.
    pub fn all() -> &'static [Capability] {
        &[
            Capability::Upload,
            Capability::CreateFolders,
            Capability::Delete,
            Capability::PermanentDelete,
            Capability::Search,
            Capability::ChunkedUpload,
            Capability::Thumbnails,
            Capability::Share,
            Capability::Move,
            Capability::Copy,
            Capability::Rename,
        ]
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Upload => "upload",
            Capability::CreateFolders => "create folders",
            Capability::Delete => "delete",
            Capability::PermanentDelete => "permanent delete",
            Capability::Search => "search",
            Capability::ChunkedUpload => "chunked upload",
            Capability::Thumbnails => "thumbnails",
            Capability::Share => "share",
            Capability::Move => "move",
            Capability::Copy => "copy",
            Capability::Rename => "rename",
        };
        write!(f, "{s}")
    }
}

/// Feature flags and limits declared for one configured provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
    pub can_upload: bool,
    pub can_create_folders: bool,
    pub can_delete: bool,
    pub can_permanent_delete: bool,
    pub can_search: bool,
    pub can_chunked_upload: bool,
    pub has_thumbnails: bool,
    pub can_share: bool,
    pub can_move: bool,
    pub can_copy: bool,
    pub can_rename: bool,
    /// Largest single upload in bytes; `None` means unlimited.
    pub max_upload_size: Option<u64>,
    pub max_page_size: u32,
}

impl CapabilitySet {
    /// A set with every operation disabled. Useful as a base for
    /// read-only providers.
    pub fn read_only(max_page_size: u32) -> Self {
        Self {
            can_upload: false,
            can_create_folders: false,
            can_delete: false,
            can_permanent_delete: false,
            can_search: false,
            can_chunked_upload: false,
            has_thumbnails: false,
            can_share: false,
            can_move: false,
            can_copy: false,
            can_rename: false,
            max_upload_size: None,
            max_page_size,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Upload => self.can_upload,
            Capability::CreateFolders => self.can_create_folders,
            Capability::Delete => self.can_delete,
            Capability::PermanentDelete => self.can_permanent_delete,
            Capability::Search => self.can_search,
            Capability::ChunkedUpload => self.can_chunked_upload,
            Capability::Thumbnails => self.has_thumbnails,
            Capability::Share => self.can_share,
            Capability::Move => self.can_move,
            Capability::Copy => self.can_copy,
            Capability::Rename => self.can_rename,
        }
    }

    /// Fails with `CapabilityViolation` when `capability` is not declared.
    pub fn ensure(&self, capability: Capability) -> Result<(), AuthFailure> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(AuthFailure::CapabilityViolation { capability })
        }
    }

    /// Checks an upload of `size` bytes against both the upload flag and
    /// the declared size limit.
    pub fn ensure_upload(&self, size: u64) -> Result<(), AuthFailure> {
        self.ensure(Capability::Upload)?;
        match self.max_upload_size {
            Some(max) if size > max => Err(AuthFailure::CapabilityViolation {
                capability: Capability::Upload,
            }),
            _ => Ok(()),
        }
    }

    /// Clamps a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        let max = self.max_page_size.max(1);
        requested.unwrap_or(max).clamp(1, max)
    }

    /// Lists the declared capabilities in display order.
    pub fn enabled(&self) -> Vec<Capability> {
        Capability::all()
            .iter()
            .copied()
            .filter(|c| self.supports(*c))
            .collect()
    }
}

/// Returns the capability set declared for `config`. Pure lookup, no I/O.
pub fn capabilities_of(config: &ProviderConfiguration) -> &CapabilitySet {
    config.capabilities()
}
