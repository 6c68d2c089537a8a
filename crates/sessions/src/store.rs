//! Persistence for per-sender auth tokens.
//!
//! A stored token lets a restarted gateway restore a sender's session
//! without another QR scan.

use std::{collections::HashMap, path::Path};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    },
    tokio::sync::RwLock,
    tracing::debug,
};

/// Key-value store for auth tokens, keyed by sender id.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save(&self, sender_id: &str, token: &str) -> Result<()>;

    async fn load(&self, sender_id: &str) -> Result<Option<String>>;

    async fn delete(&self, sender_id: &str) -> Result<()>;
}

/// Process-lifetime store. Used when no database is configured.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save(&self, sender_id: &str, token: &str) -> Result<()> {
        self.tokens
            .write()
            .await
            .insert(sender_id.to_string(), token.to_string());
        Ok(())
    }

    async fn load(&self, sender_id: &str) -> Result<Option<String>> {
        Ok(self.tokens.read().await.get(sender_id).cloned())
    }

    async fn delete(&self, sender_id: &str) -> Result<()> {
        self.tokens.write().await.remove(sender_id);
        Ok(())
    }
}

/// SQLite-backed store.
pub struct SqliteTokenStore {
    pool: SqlitePool,
}

impl SqliteTokenStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open token database {}", path.display()))?;
        Self::with_pool(pool).await
    }

    /// Use an existing pool, creating the table if missing.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_tokens (
                sender_id  TEXT PRIMARY KEY NOT NULL,
                token      TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .context("failed to create session_tokens table")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn save(&self, sender_id: &str, token: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_tokens (sender_id, token, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(sender_id) DO UPDATE SET token = excluded.token, updated_at = excluded.updated_at",
        )
        .bind(sender_id)
        .bind(token)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        debug!(sender_id, "saved session token");
        Ok(())
    }

    async fn load(&self, sender_id: &str) -> Result<Option<String>> {
        let token =
            sqlx::query_scalar::<_, String>("SELECT token FROM session_tokens WHERE sender_id = ?")
                .bind(sender_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(token)
    }

    async fn delete(&self, sender_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_tokens WHERE sender_id = ?")
            .bind(sender_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn TokenStore) {
        assert_eq!(store.load("alice").await.unwrap(), None);

        store.save("alice", "t1").await.unwrap();
        store.save("alice", "t2").await.unwrap();
        store.save("bob", "b1").await.unwrap();
        assert_eq!(store.load("alice").await.unwrap().as_deref(), Some("t2"));

        store.delete("alice").await.unwrap();
        store.delete("alice").await.unwrap();
        assert_eq!(store.load("alice").await.unwrap(), None);
        assert_eq!(store.load("bob").await.unwrap().as_deref(), Some("b1"));
    }

    #[tokio::test]
    async fn memory_store() {
        exercise(&MemoryTokenStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteTokenStore::with_pool(pool).await.unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn sqlite_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.db");

        let store = SqliteTokenStore::connect(&path).await.unwrap();
        store.save("alice", "t1").await.unwrap();
        store.pool.close().await;

        let reopened = SqliteTokenStore::connect(&path).await.unwrap();
        assert_eq!(reopened.load("alice").await.unwrap().as_deref(), Some("t1"));
    }
}
