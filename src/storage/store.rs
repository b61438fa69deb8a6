//! Document-store backend on SQLite.
//!
//! Every record lands in one `records` table keyed by (collection, id), so
//! a "collection" here maps onto the store collections of the export: one
//! for users, one per dialog-kind listing, one per dialog id for messages.
//! The connection is established lazily by an explicit provider and shared
//! by all components; a connection-level failure discards it and the next
//! use reconnects transparently.

use serde_json::Value;
use sqlx::error::DatabaseError;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use super::Record;
use crate::types::{ExportError, User};

const MAX_CONNECTIONS: u32 = 5;
// Rows per INSERT statement, kept well under SQLite's bind parameter cap.
const BULK_CHUNK: usize = 300;

const USERS_COLLECTION: &str = "users";

enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(SqlitePool),
}

/// Owns the shared store connection and its lifecycle.
struct StoreProvider {
    url: String,
    state: Mutex<ConnectionState>,
}

impl StoreProvider {
    fn new(path: &str) -> Self {
        Self {
            url: format!("sqlite:{}?mode=rwc", path),
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    /// Hand out the live pool, connecting first if needed.
    async fn acquire(&self) -> Result<SqlitePool, ExportError> {
        let mut state = self.state.lock().await;

        if let ConnectionState::Connected(pool) = &*state {
            return Ok(pool.clone());
        }

        *state = ConnectionState::Connecting;
        match Self::connect(&self.url).await {
            Ok(pool) => {
                tracing::info!("[DocumentStore] connection established");
                *state = ConnectionState::Connected(pool.clone());
                Ok(pool)
            }
            Err(e) => {
                *state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Drop the current connection; the next acquire reconnects.
    async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = ConnectionState::Disconnected;
        tracing::info!("[DocumentStore] connection was closed.");
    }

    async fn connect(url: &str) -> Result<SqlitePool, ExportError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )",
        )
        .execute(&pool)
        .await?;

        Ok(pool)
    }
}

pub struct DocumentStore {
    provider: StoreProvider,
}

impl DocumentStore {
    pub fn new(path: &str) -> Self {
        Self {
            provider: StoreProvider::new(path),
        }
    }

    /// Best-effort bulk insert; a duplicate key degrades to per-record
    /// insert-or-replace for the affected chunk, never to an error.
    pub async fn write_collection(
        &self,
        collection: &str,
        records: &[Record],
    ) -> Result<(), ExportError> {
        if records.is_empty() {
            return Ok(());
        }

        match self.write_all(collection, records).await {
            Err(e) if is_connection_error(&e) => {
                tracing::warn!("[DocumentStore] connection lost, reconnecting: {}", e);
                self.provider.reset().await;
                self.write_all(collection, records).await
            }
            result => result,
        }
    }

    async fn write_all(&self, collection: &str, records: &[Record]) -> Result<(), ExportError> {
        let pool = self.provider.acquire().await?;

        tracing::debug!(
            "[DocumentStore] started saving {} records to [{}]",
            records.len(),
            collection
        );

        for chunk in records.chunks(BULK_CHUNK) {
            match bulk_insert(&pool, collection, chunk).await {
                Ok(()) => {}
                Err(e) if is_unique_violation(&e) => {
                    tracing::warn!(
                        "[DocumentStore] duplicate key in collection [{}]. Just try update.",
                        collection
                    );
                    for (id, value) in chunk {
                        upsert(&pool, collection, id, value).await?;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Timestamp of the newest message stored for a dialog, 0 when none.
    pub async fn last_cursor(&self, dialog_id: &str) -> Result<f64, ExportError> {
        match self.last_cursor_inner(dialog_id).await {
            Err(e) if is_connection_error(&e) => {
                tracing::warn!("[DocumentStore] connection lost, reconnecting: {}", e);
                self.provider.reset().await;
                self.last_cursor_inner(dialog_id).await
            }
            result => result,
        }
    }

    async fn last_cursor_inner(&self, dialog_id: &str) -> Result<f64, ExportError> {
        let pool = self.provider.acquire().await?;

        let row: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM records WHERE collection = ?
             ORDER BY CAST(id AS REAL) DESC LIMIT 1",
        )
        .bind(dialog_id)
        .fetch_optional(&pool)
        .await?;

        Ok(row
            .and_then(|(ts,)| ts.parse().ok())
            .unwrap_or(0.0))
    }

    pub async fn list_users(&self) -> Result<Vec<User>, ExportError> {
        match self.list_users_inner().await {
            Err(e) if is_connection_error(&e) => {
                tracing::warn!("[DocumentStore] connection lost, reconnecting: {}", e);
                self.provider.reset().await;
                self.list_users_inner().await
            }
            result => result,
        }
    }

    async fn list_users_inner(&self) -> Result<Vec<User>, ExportError> {
        let pool = self.provider.acquire().await?;

        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT data FROM records WHERE collection = ?")
                .bind(USERS_COLLECTION)
                .fetch_all(&pool)
                .await?;

        let mut users = Vec::with_capacity(rows.len());
        for (data,) in rows {
            let raw: Value = serde_json::from_str(&data)?;
            match User::from_value(raw) {
                Ok(user) => users.push(user),
                Err(e) => tracing::warn!("Skipping malformed stored user: {}", e),
            }
        }

        Ok(users)
    }

    pub async fn upsert_user(&self, user: &User) -> Result<(), ExportError> {
        match self.upsert_user_inner(user).await {
            Err(e) if is_connection_error(&e) => {
                tracing::warn!("[DocumentStore] connection lost, reconnecting: {}", e);
                self.provider.reset().await;
                self.upsert_user_inner(user).await
            }
            result => result,
        }
    }

    async fn upsert_user_inner(&self, user: &User) -> Result<(), ExportError> {
        let pool = self.provider.acquire().await?;
        upsert(&pool, USERS_COLLECTION, &user.id, &user.raw).await?;

        Ok(())
    }
}

async fn bulk_insert(
    pool: &SqlitePool,
    collection: &str,
    chunk: &[Record],
) -> Result<(), sqlx::Error> {
    let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
        sqlx::QueryBuilder::new("INSERT INTO records (collection, id, data) ");

    builder.push_values(chunk, |mut row, (id, value)| {
        row.push_bind(collection)
            .push_bind(id.as_str())
            .push_bind(value.to_string());
    });

    builder.build().execute(pool).await?;

    Ok(())
}

async fn upsert(
    pool: &SqlitePool,
    collection: &str,
    id: &str,
    value: &Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO records (collection, id, data) VALUES (?, ?, ?)
         ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data",
    )
    .bind(collection)
    .bind(id)
    .bind(value.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_connection_error(err: &ExportError) -> bool {
    matches!(
        err,
        ExportError::Database(
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
        )
    )
}
