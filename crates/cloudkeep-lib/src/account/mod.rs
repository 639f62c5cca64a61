//! Account records and their status machine.
//!
//! An `Account` is one authenticated grant for one external identity at
//! one provider. Records are created by the OAuth flow coordinator,
//! token fields are rewritten by the refresh manager and the status field
//! by the status classifier. Provider client secrets never appear here.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::errors::Result;
use crate::provider::ProviderType;

/// App-local account identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier (`acc_` + 128 random bits in hex).
    pub fn generate() -> Result<Self> {
        Ok(Self(format!("acc_{}", crypto::random_hex(16)?)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account health.
///
/// `Unknown` preserves a wire value this build does not recognise so it
/// is never silently read as `Error` or `Ok`; it is treated as needing
/// reauthentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccountStatus {
    Ok,
    MissingScopes,
    Revoked,
    Error,
    Unknown(String),
}

impl AccountStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AccountStatus::Ok => "ok",
            AccountStatus::MissingScopes => "missingScopes",
            AccountStatus::Revoked => "revoked",
            AccountStatus::Error => "error",
            AccountStatus::Unknown(raw) => raw,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "ok" => AccountStatus::Ok,
            "missingScopes" => AccountStatus::MissingScopes,
            "revoked" => AccountStatus::Revoked,
            "error" => AccountStatus::Error,
            other => AccountStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, AccountStatus::Ok)
    }

    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            AccountStatus::MissingScopes | AccountStatus::Revoked | AccountStatus::Unknown(_)
        )
    }

    pub fn has_error(&self) -> bool {
        matches!(self, AccountStatus::Error | AccountStatus::Revoked)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for AccountStatus {
    fn from(raw: String) -> Self {
        AccountStatus::parse(&raw)
    }
}

impl From<AccountStatus> for String {
    fn from(status: AccountStatus) -> Self {
        status.as_str().to_string()
    }
}

/// One authenticated grant.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub provider_type: ProviderType,
    pub external_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// `None` means the access token does not expire.
    pub expires_at: Option<DateTime<Utc>>,
    pub display_name: String,
    pub email: String,
    pub photo_url: Option<String>,
    pub status: AccountStatus,
    /// Detail of the failure that moved the account out of `ok`.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Account {
    pub fn is_usable(&self) -> bool {
        self.status.is_usable()
    }

    pub fn needs_reauth(&self) -> bool {
        self.status.needs_reauth()
    }

    pub fn has_error(&self) -> bool {
        self.status.has_error()
    }

    /// True when the token expires at or before `now + margin`.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => expiry - margin <= now,
            None => false,
        }
    }

    /// Replace token fields. A missing new refresh token keeps the old one.
    pub fn apply_tokens(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        self.access_token = access_token;
        if let Some(rt) = refresh_token {
            self.refresh_token = Some(rt);
        }
        self.expires_at = expires_at;
        self.touch(now);
    }

    /// Return to `ok` and drop any recorded failure detail.
    pub fn mark_ok(&mut self, now: DateTime<Utc>) {
        self.status = AccountStatus::Ok;
        self.last_error = None;
        self.touch(now);
    }

    pub fn mark_status(&mut self, status: AccountStatus, detail: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        self.last_error = detail;
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        // updated_at never moves backwards
        self.updated_at = if now > self.updated_at { now } else { self.updated_at };
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("provider_type", &self.provider_type)
            .field("external_id", &self.external_id)
            .field("access_token", &crypto::mask_secret(&self.access_token))
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(crypto::mask_secret),
            )
            .field("expires_at", &self.expires_at)
            .field("email", &self.email)
            .field("status", &self.status)
            .field("last_error", &self.last_error)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}
