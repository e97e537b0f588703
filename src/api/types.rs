//! API response types
//!
//! Shared with the integration tests, which deserialize the same structs.
//! The health report itself is [`crate::health::HealthReport`].

use serde::{Deserialize, Serialize};

use crate::actors::messages::StorageStats;
use crate::collectors::CollectorKind;

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// One running collector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectorInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CollectorKind,
    pub nodes: usize,
}

/// Process statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub timestamp: String,

    /// Ingestion counters of the storage actor
    pub storage: StorageStats,

    /// Summary reported by the backend
    pub backend: String,

    pub collectors: Vec<CollectorInfo>,
}
