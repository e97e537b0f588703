//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{NewStatusRow, StatusRow};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`: every persistence task and every
/// HTTP request shares one backend behind an `Arc`. Concurrent writers rely on
/// the backend's own locking.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append one row, returning its surrogate key
    async fn insert(&self, row: &NewStatusRow) -> StorageResult<i64>;

    /// Newest row of one unit as observed by one collector
    ///
    /// Rows are matched on `(type, name, label)`; the label is compared as
    /// stored JSON text. Used for duplicate suppression.
    async fn latest_for_unit(
        &self,
        source: &str,
        name: &str,
        label: &str,
    ) -> StorageResult<Option<StatusRow>>;

    /// Last observation of every `(name, label)` within `[start, end)`
    ///
    /// "Last" means greatest surrogate key. Rows are returned in key order.
    async fn query_latest_per_unit(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<StatusRow>>;

    /// Delete rows strictly older than `before`
    ///
    /// Returns the number of rows deleted.
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Human-readable stats about the backend
    /// (e.g., "SQLite: 12000 rows, 3.20 MB on disk").
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
