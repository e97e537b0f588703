//! StorageActor - Persists collector batches
//!
//! ## Architecture
//!
//! The actor is the only consumer of the delivery queue. It takes events off
//! the queue in arrival order and hands every unit batch to its own
//! persistence task, so batches from different nodes or ticks may commit in
//! any order. Writes inside one batch stay sequential.
//!
//! ## Per-batch persistence
//!
//! 1. **Retention**: rows older than `now - retention` are deleted
//! 2. **Duplicate suppression** (`on_change`): a unit is skipped when the
//!    newest row of the same unit is `loaded/active/running` and nothing
//!    changed since
//! 3. **Insert**: one row per remaining unit; a failed insert is logged and
//!    the rest of the batch continues
//!
//! Persistence tasks live in a `JoinSet` owned by the actor. Shutdown
//! persists what is already queued and waits for every task before the actor
//! exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use chrono::{TimeDelta, Utc};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info_span, instrument, trace, warn};

use super::messages::{CollectorEvent, StorageCommand, StorageStats, UnitBatch};
use crate::config::StoreConfig;
use crate::storage::StorageBackend;
use crate::storage::schema::NewStatusRow;

/// How batches are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistPolicy {
    pub retention: Duration,
    pub on_change: bool,
}

impl From<&StoreConfig> for PersistPolicy {
    fn from(config: &StoreConfig) -> Self {
        Self {
            retention: config.retention(),
            on_change: config.on_change,
        }
    }
}

/// Result of persisting one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub inserted: u64,
    pub suppressed: u64,
    pub failed: u64,
    pub pruned: u64,
}

/// Write one batch: prune, then insert unit by unit
///
/// Never fails as a whole. Storage errors are logged and counted in the
/// outcome.
#[instrument(skip_all, fields(source = %batch.source, node = %batch.node))]
pub async fn persist_batch(
    backend: &dyn StorageBackend,
    policy: &PersistPolicy,
    batch: &UnitBatch,
) -> PersistOutcome {
    let mut outcome = PersistOutcome::default();

    let retention = TimeDelta::from_std(policy.retention).unwrap_or(TimeDelta::hours(24));
    let cutoff = Utc::now() - retention;
    match backend.cleanup_before(cutoff).await {
        Ok(pruned) => outcome.pruned = pruned as u64,
        Err(e) => warn!("retention cleanup failed: {}", e),
    }

    for unit in &batch.units {
        let row = match NewStatusRow::from_unit(batch.source, unit) {
            Ok(row) => row,
            Err(e) => {
                error!("skipping {}: {}", unit.name, e);
                outcome.failed += 1;
                continue;
            }
        };

        if policy.on_change && is_unchanged(backend, &row).await {
            trace!("{} unchanged, skipping", row.name);
            outcome.suppressed += 1;
            continue;
        }

        match backend.insert(&row).await {
            Ok(_) => outcome.inserted += 1,
            Err(e) => {
                warn!("failed to insert {}: {}", row.name, e);
                outcome.failed += 1;
            }
        }
    }

    debug!(
        "persisted batch: {} inserted, {} suppressed, {} failed",
        outcome.inserted, outcome.suppressed, outcome.failed
    );
    outcome
}

/// Whether the unit repeats a steady observation
///
/// Any lookup problem answers `false` so the row gets written.
async fn is_unchanged(backend: &dyn StorageBackend, row: &NewStatusRow) -> bool {
    match backend
        .latest_for_unit(row.source.as_str(), &row.name, &row.label)
        .await
    {
        Ok(Some(previous)) => {
            previous.is_steady()
                && previous.load == row.load
                && previous.status == row.status
                && previous.substatus == row.substatus
        }
        Ok(None) => false,
        Err(e) => {
            debug!("duplicate lookup for {} failed: {}", row.name, e);
            false
        }
    }
}

/// Statistics shared between the actor and its persistence tasks
#[derive(Debug, Default)]
struct StoreCounters {
    batches_received: AtomicU64,
    units_inserted: AtomicU64,
    units_suppressed: AtomicU64,
    insert_failures: AtomicU64,
    rows_pruned: AtomicU64,
    probe_failures: AtomicU64,
}

impl StoreCounters {
    fn record(&self, outcome: &PersistOutcome) {
        self.units_inserted
            .fetch_add(outcome.inserted, Ordering::Relaxed);
        self.units_suppressed
            .fetch_add(outcome.suppressed, Ordering::Relaxed);
        self.insert_failures
            .fetch_add(outcome.failed, Ordering::Relaxed);
        self.rows_pruned.fetch_add(outcome.pruned, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StorageStats {
        StorageStats {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            units_inserted: self.units_inserted.load(Ordering::Relaxed),
            units_suppressed: self.units_suppressed.load(Ordering::Relaxed),
            insert_failures: self.insert_failures.load(Ordering::Relaxed),
            rows_pruned: self.rows_pruned.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
        }
    }
}

/// Storage actor draining the delivery queue
pub struct StorageActor {
    backend: Arc<dyn StorageBackend>,

    policy: PersistPolicy,

    /// Delivery queue (all collectors hold a sender)
    event_rx: mpsc::UnboundedReceiver<CollectorEvent>,

    /// Command receiver
    command_rx: mpsc::Receiver<StorageCommand>,

    counters: Arc<StoreCounters>,

    /// In-flight persistence tasks
    tasks: JoinSet<()>,
}

impl StorageActor {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        policy: PersistPolicy,
        event_rx: mpsc::UnboundedReceiver<CollectorEvent>,
        command_rx: mpsc::Receiver<StorageCommand>,
    ) -> Self {
        debug!(
            "creating storage actor (retention {}, on_change {})",
            humantime::format_duration(policy.retention),
            policy.on_change
        );

        Self {
            backend,
            policy,
            event_rx,
            command_rx,
            counters: Arc::new(StoreCounters::default()),
            tasks: JoinSet::new(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting storage actor");

        let mut queue_open = true;

        loop {
            tokio::select! {
                event = self.event_rx.recv(), if queue_open => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            // Collectors are gone; stats stay available until shutdown
                            debug!("delivery queue closed");
                            queue_open = false;
                        }
                    }
                }

                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = result {
                        error!("persistence task failed: {}", e);
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(StorageCommand::GetStats { respond_to }) => {
                            let _ = respond_to.send(self.counters.snapshot());
                        }

                        Some(StorageCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        // Persist what has already been delivered
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event);
        }

        if !self.tasks.is_empty() {
            debug!("waiting for {} persistence tasks", self.tasks.len());
        }
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!("persistence task failed: {}", e);
            }
        }

        debug!("storage actor stopped");
    }

    fn handle_event(&mut self, event: CollectorEvent) {
        match event {
            CollectorEvent::Batch(batch) => {
                trace!(
                    "received {} units from {} ({})",
                    batch.units.len(),
                    batch.node,
                    batch.source
                );
                self.counters
                    .batches_received
                    .fetch_add(1, Ordering::Relaxed);

                let backend = Arc::clone(&self.backend);
                let counters = Arc::clone(&self.counters);
                let policy = self.policy;
                let span = info_span!("persist");

                self.tasks.spawn(
                    async move {
                        let outcome = persist_batch(backend.as_ref(), &policy, &batch).await;
                        counters.record(&outcome);
                    }
                    .instrument(span),
                );
            }

            CollectorEvent::ProbeFailed(failure) => {
                warn!(
                    "{} collector could not reach {} at {}: {}",
                    failure.source, failure.node, failure.timestamp, failure.reason
                );
                self.counters
                    .probe_failures
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Handle for controlling the StorageActor
#[derive(Clone)]
pub struct StorageHandle {
    sender: mpsc::Sender<StorageCommand>,

    /// Actor task, taken by the first `shutdown`
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StorageHandle {
    /// Spawn the storage actor on an already opened backend
    pub fn spawn(
        backend: Arc<dyn StorageBackend>,
        policy: PersistPolicy,
        event_rx: mpsc::UnboundedReceiver<CollectorEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = StorageActor::new(backend, policy, event_rx, cmd_rx);
        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Get storage statistics
    pub async fn get_stats(&self) -> Option<StorageStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Stop consuming and wait until every persistence task has finished
    ///
    /// The backend itself stays open.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let _ = self.sender.send(StorageCommand::Shutdown).await;

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.await.context("storage task failed")?;
        }
        Ok(())
    }
}
