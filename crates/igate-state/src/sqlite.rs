//! SQLite-backed record store
//!
//! Two tables: `records` for keyed values and `record_log` for the
//! append-only collections. Values are stored as JSON text; upserts give
//! the last-write-wins behavior the contract asks for.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::info;

use crate::error::{Result, StateError};
use crate::store::RecordStore;

/// SQLite implementation of [`RecordStore`]
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if missing) a store at `url`, e.g.
    /// `sqlite:igate.db?mode=rwc`. The schema is created on first open.
    pub async fn new(url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS record_log (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                value      TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!(url, "Record store opened");
        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM records WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let text: String = row.get("value");
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO records (collection, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (collection, key) DO UPDATE
            SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(serde_json::to_string(&value)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM records WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        let rows =
            sqlx::query("SELECT key, value FROM records WHERE collection = ? ORDER BY key")
                .bind(collection)
                .fetch_all(&self.pool)
                .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("key");
            let text: String = row.get("value");
            entries.push((key, serde_json::from_str(&text)?));
        }
        Ok(entries)
    }

    async fn replace_all(&self, collection: &str, entries: Vec<(String, Value)>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now().to_rfc3339();
        for (key, value) in entries {
            sqlx::query(
                "INSERT INTO records (collection, key, value, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(collection)
            .bind(key)
            .bind(serde_json::to_string(&value)?)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn append(&self, collection: &str, value: Value) -> Result<()> {
        sqlx::query("INSERT INTO record_log (collection, value, created_at) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(serde_json::to_string(&value)?)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn log(&self, collection: &str) -> Result<Vec<Value>> {
        let rows = sqlx::query("SELECT value FROM record_log WHERE collection = ? ORDER BY id")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let text: String = row.get("value");
            values.push(serde_json::from_str(&text)?);
        }
        Ok(values)
    }
}
