use anyhow::{Context, Result};
use async_trait::async_trait;
use chat_core::CredentialStore;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{ChatIdentity, MatrixUserId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIdentity {
    pub account: String,
    pub identity: ChatIdentity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `sqlite::memory:` opens its own empty database.
        let max_connections = if sqlite_path(database_url).is_some() { 5 } else { 1 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts or fully replaces the credentials stored for `account`.
    pub async fn put_identity(&self, account: &str, identity: &ChatIdentity) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_identities (account, user_id, access_token, home_server)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(account) DO UPDATE SET
                user_id = excluded.user_id,
                access_token = excluded.access_token,
                home_server = excluded.home_server,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(account_key(account))
        .bind(identity.user_id.as_str())
        .bind(&identity.access_token)
        .bind(&identity.home_server)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store chat identity for {account}"))?;
        Ok(())
    }

    pub async fn get_identity(&self, account: &str) -> Result<Option<ChatIdentity>> {
        let row = sqlx::query(
            "SELECT user_id, access_token, home_server FROM chat_identities WHERE account = ?",
        )
        .bind(account_key(account))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| ChatIdentity {
            user_id: MatrixUserId(r.get::<String, _>(0)),
            access_token: r.get::<String, _>(1),
            home_server: r.get::<String, _>(2),
        }))
    }

    pub async fn list_identities(&self) -> Result<Vec<StoredIdentity>> {
        let rows = sqlx::query(
            "SELECT account, user_id, access_token, home_server, created_at, updated_at
             FROM chat_identities
             ORDER BY account",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(stored_identity_from_row).collect())
    }

    /// Returns false when nothing was stored for `account`.
    pub async fn remove_identity(&self, account: &str) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM chat_identities WHERE account = ?")
            .bind(account_key(account))
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }
}

fn stored_identity_from_row(r: &SqliteRow) -> StoredIdentity {
    StoredIdentity {
        account: r.get::<String, _>(0),
        identity: ChatIdentity {
            user_id: MatrixUserId(r.get::<String, _>(1)),
            access_token: r.get::<String, _>(2),
            home_server: r.get::<String, _>(3),
        },
        created_at: r.get::<DateTime<Utc>, _>(4),
        updated_at: r.get::<DateTime<Utc>, _>(5),
    }
}

/// Addresses arrive checksummed or lowercased depending on the caller.
fn account_key(account: &str) -> String {
    account.trim().to_lowercase()
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[async_trait]
impl CredentialStore for Storage {
    async fn load_identity(&self, account: &str) -> Result<Option<ChatIdentity>> {
        self.get_identity(account).await
    }

    async fn save_identity(&self, account: &str, identity: &ChatIdentity) -> Result<()> {
        self.put_identity(account, identity).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
