//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to one actor via mpsc
//! 2. **Events**: Collector output on the shared delivery queue, consumed by
//!    the store only

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::Unit;
use crate::collectors::CollectorKind;

/// Item on the delivery queue between the collectors and the store
///
/// Every producer talks to the store through this one enum, so a new kind of
/// payload is a new variant and the store's `match` has to handle it.
#[derive(Debug, Clone)]
pub enum CollectorEvent {
    /// Units of one node for one tick
    Batch(UnitBatch),

    /// One node could not be probed this tick
    ProbeFailed(ProbeFailure),
}

/// Units gathered from one node during one tick
#[derive(Debug, Clone)]
pub struct UnitBatch {
    /// Strategy that produced the batch, persisted as the row `type`
    pub source: CollectorKind,

    /// Address of the probed node (for logging)
    pub node: String,

    pub units: Vec<Unit>,
}

/// Outage signal for a node that did not answer
///
/// Kept apart from an empty batch so that an unreachable node is never
/// reported as a node whose services are all missing.
#[derive(Debug, Clone)]
pub struct ProbeFailure {
    pub source: CollectorKind,
    pub node: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Commands that can be sent to a UnitCollectorActor
#[derive(Debug)]
pub enum CollectorCommand {
    /// Run a tick now (bypassing the interval timer)
    ///
    /// The reply is sent once every node probe of that tick has finished.
    PollNow {
        respond_to: oneshot::Sender<TickSummary>,
    },

    /// Stop the timer and exit after the current tick
    Shutdown,
}

/// Outcome of one collector tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Nodes that delivered a batch
    pub batches: usize,

    /// Nodes whose probe failed
    pub failures: usize,
}

/// Commands that can be sent to the StorageActor
#[derive(Debug)]
pub enum StorageCommand {
    /// Get storage statistics
    GetStats {
        respond_to: oneshot::Sender<StorageStats>,
    },

    /// Stop consuming and wait for in-flight persistence tasks
    Shutdown,
}

/// Storage statistics since startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub batches_received: u64,
    pub units_inserted: u64,

    /// Units skipped by duplicate suppression
    pub units_suppressed: u64,

    pub insert_failures: u64,
    pub rows_pruned: u64,
    pub probe_failures: u64,
}
