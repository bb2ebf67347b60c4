//! SQLite store.
//!
//! One table holds every namespace:
//!
//! ```text
//! items(kind, category, user_id, key, value, created_at, updated_at)
//!   PRIMARY KEY (kind, category, user_id, key)
//! ```
//!
//! `value` is the JSON text of the record. Timestamps are RFC 3339 strings
//! with fixed precision, so lexical order is chronological order.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use maistro_core::error::MemoryError;
use maistro_core::memory::{Item, MemoryStore, Namespace, RecordKind};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

const IN_MEMORY: &str = ":memory:";

/// A persistent memory store backed by a single SQLite file.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an ephemeral database that lives as long as the store.
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let in_memory = path == IN_MEMORY || path == "sqlite::memory:";

        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
        } else {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    MemoryError::Storage(format!("Failed to create {}: {e}", parent.display()))
                })?;
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        };

        // Each in-memory connection is its own database, so pin the pool to one
        // connection that never expires.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite memory store initialized at {path}");
        Ok(store)
    }

    /// Wrap an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                kind        TEXT NOT NULL,
                category    TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (kind, category, user_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("items table: {e}")))?;

        Ok(())
    }

    fn timestamp(now: DateTime<Utc>) -> String {
        now.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, MemoryError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| MemoryError::Corrupt(format!("{column} '{raw}': {e}")))
    }

    fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<Item, MemoryError> {
        let column = |name: &str| -> Result<String, MemoryError> {
            row.try_get::<String, _>(name)
                .map_err(|e| MemoryError::QueryFailed(format!("{name} column: {e}")))
        };

        let kind = RecordKind::from_str(&column("kind")?)?;
        let value_json = column("value")?;
        let value = serde_json::from_str(&value_json)
            .map_err(|e| MemoryError::Corrupt(format!("value is not JSON: {e}")))?;

        Ok(Item {
            namespace: Namespace::new(kind, column("category")?, column("user_id")?),
            key: column("key")?,
            value,
            created_at: Self::parse_timestamp(&column("created_at")?, "created_at")?,
            updated_at: Self::parse_timestamp(&column("updated_at")?, "updated_at")?,
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn search(&self, namespace: &Namespace) -> Result<Vec<Item>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT kind, category, user_id, key, value, created_at, updated_at
            FROM items
            WHERE kind = ?1 AND category = ?2 AND user_id = ?3
            ORDER BY created_at, rowid
            "#,
        )
        .bind(namespace.kind.as_str())
        .bind(&namespace.category)
        .bind(&namespace.user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("search {namespace}: {e}")))?;

        rows.iter().map(Self::row_to_item).collect()
    }

    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<Item>, MemoryError> {
        let row = sqlx::query(
            r#"
            SELECT kind, category, user_id, key, value, created_at, updated_at
            FROM items
            WHERE kind = ?1 AND category = ?2 AND user_id = ?3 AND key = ?4
            "#,
        )
        .bind(namespace.kind.as_str())
        .bind(&namespace.category)
        .bind(&namespace.user_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("get {namespace}/{key}: {e}")))?;

        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), MemoryError> {
        let now = Self::timestamp(Utc::now());
        let value_json = serde_json::to_string(&value)
            .map_err(|e| MemoryError::Storage(format!("serialize value: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO items (kind, category, user_id, key, value, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT (kind, category, user_id, key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(namespace.kind.as_str())
        .bind(&namespace.category)
        .bind(&namespace.user_id)
        .bind(key)
        .bind(&value_json)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("put {namespace}/{key}: {e}")))?;

        debug!(%namespace, key, "Stored item");
        Ok(())
    }
}
