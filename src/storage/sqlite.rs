//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Bucket queries keep reading while persistence tasks write
//! - **Connection pooling**: Concurrent persistence tasks each get a connection
//! - **Migrations**: The `service_status` schema is provisioned on open
//!
//! ## Limitations
//!
//! - **Concurrency**: Writes are serialized by SQLite; the busy timeout makes
//!   concurrent persistence tasks wait instead of failing

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, trace, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{NewStatusRow, StatusRow};

const SELECT_COLUMNS: &str = "id, timestamp, type, name, load, status, substatus, label";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database and provision the schema
    ///
    /// A failure here leaves the process without a store and is meant to be
    /// fatal to the caller.
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use unitwatch::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./unitwatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal) // WAL mode for better concurrency
            .synchronous(SqliteSynchronous::Normal) // Balance safety and performance
            .busy_timeout(std::time::Duration::from_secs(30)); // Retry on lock contention

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!("SQLite connection pool created");

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    /// Helper to convert timestamp to Unix milliseconds for SQLite
    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    /// Helper to convert Unix milliseconds from SQLite to DateTime
    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn status_row(row: &SqliteRow) -> StorageResult<StatusRow> {
        Ok(StatusRow {
            id: row.try_get("id")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
            source: row.try_get("type")?,
            name: row.try_get("name")?,
            load: row.try_get("load")?,
            status: row.try_get("status")?,
            substatus: row.try_get("substatus")?,
            label: row.try_get("label")?,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip_all, fields(unit = %row.name))]
    async fn insert(&self, row: &NewStatusRow) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO service_status (timestamp, type, name, load, status, substatus, label)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Self::timestamp_to_millis(&row.timestamp))
        .bind(row.source.as_str())
        .bind(&row.name)
        .bind(&row.load)
        .bind(&row.status)
        .bind(&row.substatus)
        .bind(&row.label)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let id = result.last_insert_rowid();
        trace!("inserted row {}", id);
        Ok(id)
    }

    #[instrument(skip(self, label))]
    async fn latest_for_unit(
        &self,
        source: &str,
        name: &str,
        label: &str,
    ) -> StorageResult<Option<StatusRow>> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM service_status
            WHERE type = ? AND name = ? AND label = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#
        );

        let row = sqlx::query(&sql)
            .bind(source)
            .bind(name)
            .bind(label)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.as_ref().map(Self::status_row).transpose()
    }

    #[instrument(skip(self))]
    async fn query_latest_per_unit(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<StatusRow>> {
        let sql = format!(
            r#"
            WITH latest AS (
                SELECT MAX(id) AS id
                FROM service_status
                WHERE timestamp >= ? AND timestamp < ?
                GROUP BY name, label
            )
            SELECT {}
            FROM latest l
            JOIN service_status ss ON ss.id = l.id
            ORDER BY ss.id ASC
            "#,
            SELECT_COLUMNS
                .split(", ")
                .map(|column| format!("ss.{column}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let rows = sqlx::query(&sql)
            .bind(Self::timestamp_to_millis(&start))
            .bind(Self::timestamp_to_millis(&end))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let results = rows
            .iter()
            .map(Self::status_row)
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("query returned {} units", results.len());
        Ok(results)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM service_status WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let deleted = result.rows_affected() as usize;
        if deleted > 0 {
            debug!("deleted {} expired rows", deleted);
        }

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        // Simple ping query to verify connection
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let (total_rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM service_status")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let (oldest, newest): (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(timestamp), MAX(timestamp) FROM service_status")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let file_size_mb = file_size as f64 / 1_000_000.0;

        let time_range = match (oldest, newest) {
            (Some(old), Some(new)) => format!(
                "{} to {}",
                Self::millis_to_timestamp(old).format("%Y-%m-%d %H:%M"),
                Self::millis_to_timestamp(new).format("%Y-%m-%d %H:%M")
            ),
            _ => "no data".to_string(),
        };

        Ok(format!(
            "SQLite: {} rows, {:.2} MB on disk, time range: {}",
            total_rows, file_size_mb, time_range
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
