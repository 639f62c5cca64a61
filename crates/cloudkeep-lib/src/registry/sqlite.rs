//! SQLite-backed account store.
//!
//! One row per account in `accounts`, with `UNIQUE(provider_type,
//! external_id)` enforced by the schema. Timestamps are RFC 3339 text,
//! metadata is a JSON object.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::AccountStore;
use crate::account::{Account, AccountId, AccountStatus};
use crate::errors::{CloudKeepError, Result};
use crate::provider::ProviderType;

const SELECT_COLUMNS: &str = "id, provider_type, external_id, access_token, refresh_token,
     expires_at, display_name, email, photo_url, status, last_error,
     created_at, updated_at, metadata";

pub struct SqliteAccountStore {
    db_path: PathBuf,
    db: Arc<Mutex<Connection>>,
}

impl SqliteAccountStore {
    /// Open (or create) the database at `db_path` and initialise the schema.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db_path,
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id            TEXT PRIMARY KEY,
                provider_type TEXT NOT NULL,
                external_id   TEXT NOT NULL,
                access_token  TEXT NOT NULL,
                refresh_token TEXT,
                expires_at    TEXT,
                display_name  TEXT NOT NULL DEFAULT '',
                email         TEXT NOT NULL DEFAULT '',
                photo_url     TEXT,
                status        TEXT NOT NULL,
                last_error    TEXT,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL,
                metadata      TEXT NOT NULL DEFAULT '{}',
                UNIQUE(provider_type, external_id)
            );",
        )?;
        Ok(())
    }
}

/// Column values as stored, converted to an `Account` outside the
/// rusqlite row callback so conversion errors use our own error type.
struct StoredRow {
    id: String,
    provider_type: String,
    external_id: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<String>,
    display_name: String,
    email: String,
    photo_url: Option<String>,
    status: String,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
    metadata: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            provider_type: row.get(1)?,
            external_id: row.get(2)?,
            access_token: row.get(3)?,
            refresh_token: row.get(4)?,
            expires_at: row.get(5)?,
            display_name: row.get(6)?,
            email: row.get(7)?,
            photo_url: row.get(8)?,
            status: row.get(9)?,
            last_error: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            metadata: row.get(13)?,
        })
    }

    fn into_account(self) -> Result<Account> {
        Ok(Account {
            id: AccountId::new(self.id),
            provider_type: self.provider_type.parse()?,
            external_id: self.external_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at.as_deref().map(parse_time).transpose()?,
            display_name: self.display_name,
            email: self.email,
            photo_url: self.photo_url,
            status: AccountStatus::parse(&self.status),
            last_error: self.last_error,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            metadata: serde_json::from_str(&self.metadata)?,
        })
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CloudKeepError::Storage(format!("Invalid timestamp '{raw}': {e}")))
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn get_account(
        &self,
        provider_type: ProviderType,
        external_id: &str,
    ) -> Result<Option<Account>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM accounts
                     WHERE provider_type = ?1 AND external_id = ?2"
                ),
                params![provider_type.as_str(), external_id],
                StoredRow::from_row,
            )
            .optional()?;
        row.map(StoredRow::into_account).transpose()
    }

    async fn get_account_by_id(&self, id: &AccountId) -> Result<Option<Account>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id.as_str()],
                StoredRow::from_row,
            )
            .optional()?;
        row.map(StoredRow::into_account).transpose()
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let metadata = serde_json::to_string(&account.metadata)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO accounts (id, provider_type, external_id, access_token,
                refresh_token, expires_at, display_name, email, photo_url, status,
                last_error, created_at, updated_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                provider_type = excluded.provider_type,
                external_id   = excluded.external_id,
                access_token  = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at    = excluded.expires_at,
                display_name  = excluded.display_name,
                email         = excluded.email,
                photo_url     = excluded.photo_url,
                status        = excluded.status,
                last_error    = excluded.last_error,
                updated_at    = excluded.updated_at,
                metadata      = excluded.metadata",
            params![
                account.id.as_str(),
                account.provider_type.as_str(),
                account.external_id,
                account.access_token,
                account.refresh_token,
                account.expires_at.map(|t| t.to_rfc3339()),
                account.display_name,
                account.email,
                account.photo_url,
                account.status.as_str(),
                account.last_error,
                account.created_at.to_rfc3339(),
                account.updated_at.to_rfc3339(),
                metadata,
            ],
        )?;
        Ok(())
    }

    async fn delete_account(&self, id: &AccountId) -> Result<bool> {
        let db = self.db.lock().await;
        let removed = db.execute("DELETE FROM accounts WHERE id = ?1", params![id.as_str()])?;
        Ok(removed > 0)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = {
            let db = self.db.lock().await;
            let mut stmt = db.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM accounts ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([], StoredRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(StoredRow::into_account).collect()
    }
}
