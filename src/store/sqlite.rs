use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::QueuedRequest;
use crate::store::{QueueStore, StoredRequest};

/// SQLx-based SQLite queue store.
///
/// Records are kept in the `queued_requests` table. The id column is an
/// `AUTOINCREMENT` primary key, so SQLite never hands out an id twice, even
/// after the newest row is deleted or the process restarts.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Creates a store over a pool whose schema is already in place.
    pub fn new_uninitialized(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates a store and ensures the table exists.
    #[tracing::instrument(skip_all)]
    pub async fn try_new(pool: SqlitePool) -> Result<Self, Error> {
        create_table(&pool).await?;
        Ok(Self::new_uninitialized(pool))
    }
}

#[async_trait]
impl QueueStore for SqliteStore {
    type Error = Error;
    type ID = i64;

    #[tracing::instrument(skip_all, fields(method = request.method(), url = request.url()))]
    async fn add(&self, request: QueuedRequest) -> Result<i64, Error> {
        let headers: Vec<HeaderField> = request
            .headers()
            .iter()
            .map(|(name, value)| HeaderField {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        let headers = serde_json::to_string(&headers)?;

        let result = sqlx::query(
            "INSERT INTO queued_requests (method, url, headers, body) VALUES (?, ?, ?, ?)",
        )
        .bind(request.method())
        .bind(request.url())
        .bind(headers)
        .bind(request.body())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    #[tracing::instrument(skip_all)]
    async fn get_all(&self) -> Result<Vec<StoredRequest<i64>>, Error> {
        let rows = sqlx::query(
            "SELECT request_id, method, url, headers, body FROM queued_requests ORDER BY request_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<StoredRequest<i64>, Error> {
                let id: i64 = row.try_get("request_id")?;
                let method: String = row.try_get("method")?;
                let url: String = row.try_get("url")?;
                let headers: String = row.try_get("headers")?;
                let body: Vec<u8> = row.try_get("body")?;

                let headers = serde_json::from_str::<Vec<HeaderField>>(&headers)?
                    .into_iter()
                    .map(|field| (field.name, field.value))
                    .collect();
                Ok(StoredRequest::new(
                    id,
                    QueuedRequest::from_parts(method, url, headers, body),
                ))
            })
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: i64) -> Result<(), Error> {
        sqlx::query("DELETE FROM queued_requests WHERE request_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// One entry of the `headers` JSON column. Values are raw bytes since HTTP
/// header values need not be UTF-8.
#[derive(Serialize, Deserialize)]
struct HeaderField {
    name: String,
    value: Vec<u8>,
}

/// Ensures the queue table exists.
async fn create_table(pool: &SqlitePool) -> Result<(), Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS queued_requests (
            request_id INTEGER PRIMARY KEY AUTOINCREMENT,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// SQLite store errors.
#[derive(Debug)]
pub struct Error {
    context: tracing_error::SpanTrace,
    kind: SqliteStoreErrorKind,
}

/// Kinds of SQLite store errors.
#[derive(Debug)]
pub enum SqliteStoreErrorKind {
    Database(sqlx::Error),
    Serde(serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> &SqliteStoreErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            SqliteStoreErrorKind::Database(err) => writeln!(f, "Database error: {}", err),
            SqliteStoreErrorKind::Serde(err) => writeln!(f, "Serde error: {}", err),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            SqliteStoreErrorKind::Database(err) => Some(err),
            SqliteStoreErrorKind::Serde(err) => Some(err),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self {
            context: tracing_error::SpanTrace::capture(),
            kind: SqliteStoreErrorKind::Database(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self {
            context: tracing_error::SpanTrace::capture(),
            kind: SqliteStoreErrorKind::Serde(err),
        }
    }
}
