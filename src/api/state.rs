//! API shared state

use std::sync::Arc;

use crate::actors::{collector::CollectorHandle, storage::StorageHandle};
use crate::health::HealthAggregator;
use crate::storage::StorageBackend;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Computes health reports from the backend
    pub aggregator: HealthAggregator,

    /// Handle to the storage actor for ingestion statistics
    pub storage: StorageHandle,

    /// Backend, for its own summary line
    pub backend: Arc<dyn StorageBackend>,

    /// Handles of the running collectors
    pub collectors: Vec<CollectorHandle>,
}

impl ApiState {
    pub fn new(
        aggregator: HealthAggregator,
        storage: StorageHandle,
        backend: Arc<dyn StorageBackend>,
        collectors: Vec<CollectorHandle>,
    ) -> Self {
        Self {
            aggregator,
            storage,
            backend,
            collectors,
        }
    }
}
