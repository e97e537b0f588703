//! UnitCollectorActor - Polls a set of nodes for systemd unit states
//!
//! One actor runs per configured collector. Every tick probes all of the
//! collector's nodes concurrently; each node task pushes its own event onto the
//! delivery queue as soon as it is done, so events of one tick arrive in
//! completion order, not configuration order.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → JoinSet(probe node 1 … probe node N) → CollectorEvent → StorageActor
//!     ↑
//!     └─── Commands (PollNow, Shutdown)
//! ```
//!
//! A tick finishes when every node task has finished, and the next tick is
//! never started while one is in flight. Shutdown therefore waits for the
//! probes of the current tick instead of cancelling them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, error, info_span, instrument, trace, warn};

use crate::collectors::{CollectorKind, CommandRunner, Probe, build_probe};
use crate::config::{CollectorConfig, ConfigError, ResolvedNode};

use super::messages::{CollectorCommand, CollectorEvent, ProbeFailure, TickSummary, UnitBatch};

/// Actor that polls every node of one collector
pub struct UnitCollectorActor {
    probe: Arc<dyn Probe>,

    nodes: Vec<Arc<ResolvedNode>>,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<CollectorCommand>,

    /// Delivery queue towards the store
    event_tx: mpsc::UnboundedSender<CollectorEvent>,

    /// Display name for logging
    display_name: String,

    interval_duration: Duration,
}

impl UnitCollectorActor {
    pub fn new(
        probe: Arc<dyn Probe>,
        nodes: Vec<ResolvedNode>,
        interval_duration: Duration,
        command_rx: mpsc::Receiver<CollectorCommand>,
        event_tx: mpsc::UnboundedSender<CollectorEvent>,
        display_name: String,
    ) -> Self {
        Self {
            probe,
            nodes: nodes.into_iter().map(Arc::new).collect(),
            command_rx,
            event_tx,
            display_name,
            interval_duration,
        }
    }

    /// Run the actor's main loop
    ///
    /// The first tick runs as soon as the actor starts. The loop ends on
    /// `Shutdown` or when every handle has been dropped.
    #[instrument(skip(self), fields(collector = %self.display_name))]
    pub async fn run(mut self) {
        debug!(
            "starting collector actor ({} nodes every {})",
            self.nodes.len(),
            humantime::format_duration(self.interval_duration)
        );

        // First tick right away, before any command is looked at
        self.poll_nodes().await;

        let mut ticker = interval_at(
            Instant::now() + self.interval_duration,
            self.interval_duration,
        );
        // A slow tick pushes the schedule back instead of bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_nodes().await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(CollectorCommand::PollNow { respond_to }) => {
                            debug!("received PollNow command");
                            let summary = self.poll_nodes().await;
                            let _ = respond_to.send(summary);
                        }

                        Some(CollectorCommand::Shutdown) => {
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

        debug!("collector actor stopped");
    }

    /// Probe every node concurrently and wait for all of them
    ///
    /// A failing node never affects its siblings: it produces a
    /// `ProbeFailed` event and the others carry on.
    async fn poll_nodes(&self) -> TickSummary {
        let mut tasks = JoinSet::new();

        for node in &self.nodes {
            let probe = Arc::clone(&self.probe);
            let node = Arc::clone(node);
            let event_tx = self.event_tx.clone();
            let span = info_span!("probe", node = %node.address);

            tasks.spawn(
                async move {
                    let source = probe.kind();
                    let (event, delivered) = match probe.probe(&node).await {
                        Ok(units) => {
                            trace!("probe returned {} units", units.len());
                            let batch = UnitBatch {
                                source,
                                node: node.address.clone(),
                                units,
                            };
                            (CollectorEvent::Batch(batch), true)
                        }
                        Err(e) => {
                            warn!("probe failed: {}", e);
                            let failure = ProbeFailure {
                                source,
                                node: node.address.clone(),
                                reason: e.to_string(),
                                timestamp: Utc::now(),
                            };
                            (CollectorEvent::ProbeFailed(failure), false)
                        }
                    };

                    if event_tx.send(event).is_err() {
                        warn!("delivery queue closed, dropping event");
                    }
                    delivered
                }
                .instrument(span),
            );
        }

        let mut summary = TickSummary::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => summary.batches += 1,
                Ok(false) => summary.failures += 1,
                Err(e) => {
                    error!("probe task failed: {}", e);
                    summary.failures += 1;
                }
            }
        }

        trace!(
            "tick complete: {} batches, {} failures",
            summary.batches, summary.failures
        );
        summary
    }
}

/// Handle for controlling a UnitCollectorActor
///
/// Clones share the same actor.
#[derive(Clone)]
pub struct CollectorHandle {
    /// Command sender
    sender: mpsc::Sender<CollectorCommand>,

    /// Actor task, taken by the first `shutdown`
    task: Arc<Mutex<Option<JoinHandle<()>>>>,

    pub kind: CollectorKind,

    /// Display name
    pub display_name: String,

    pub node_count: usize,
}

impl CollectorHandle {
    /// Spawn a new collector actor
    pub fn spawn(
        probe: Arc<dyn Probe>,
        nodes: Vec<ResolvedNode>,
        interval: Duration,
        event_tx: mpsc::UnboundedSender<CollectorEvent>,
        display_name: String,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let kind = probe.kind();
        let node_count = nodes.len();
        let actor = UnitCollectorActor::new(
            probe,
            nodes,
            interval,
            cmd_rx,
            event_tx,
            display_name.clone(),
        );

        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            task: Arc::new(Mutex::new(Some(task))),
            kind,
            display_name,
            node_count,
        }
    }

    /// Build the strategy and resolve the nodes of one configured collector,
    /// then spawn it
    ///
    /// Unknown collector types and nodes without an address are rejected
    /// before anything is spawned.
    pub fn from_config(
        index: usize,
        config: &CollectorConfig,
        runner: Arc<dyn CommandRunner>,
        event_tx: mpsc::UnboundedSender<CollectorEvent>,
    ) -> Result<Self, ConfigError> {
        let probe = build_probe(config, runner)?;
        let nodes = config.resolve_nodes(index)?;
        let display_name = format!("{}#{}", probe.kind(), index);

        Ok(Self::spawn(
            probe,
            nodes,
            config.interval,
            event_tx,
            display_name,
        ))
    }

    /// Run a tick immediately and wait until every node has been probed
    pub async fn poll_now(&self) -> Result<TickSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CollectorCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")
    }

    /// Stop the timer and wait for the actor to exit
    ///
    /// An in-flight tick runs to completion first. Calling this again, or on
    /// another clone, returns once the actor is gone.
    pub async fn shutdown(&self) -> Result<()> {
        // The actor may already be gone, in which case there is nothing to stop
        let _ = self.sender.send(CollectorCommand::Shutdown).await;

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.await.context("collector task failed")?;
        }
        Ok(())
    }
}
