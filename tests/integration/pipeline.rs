//! End-to-end tests of the polling pipeline
//!
//! Configuration → collectors (with a canned command runner) → delivery queue
//! → storage actor → SQLite → health aggregation.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use unitwatch::actors::collector::CollectorHandle;
use unitwatch::actors::messages::{StorageStats, TickSummary};
use unitwatch::actors::storage::{PersistPolicy, StorageHandle};
use unitwatch::config::{Config, parse_config};
use unitwatch::health::{Health, HealthAggregator};
use unitwatch::storage::StorageBackend;

use crate::helpers::{FleetRunner, listing, listing_entry, open_backend, row_count};

const FLEET: &str = r#"
collectors:
  - type: systemd
    interval: 1h
    nodes:
      - username: ops
        hostname: web-1
        services:
          - name: nginx
            group: web
            importance: high
            ports: [80, 443]
      - username: ops
        ip: 10.0.0.20
        hostname: db-1
        services:
          - name: postgresql
            group: db
            importance: high
          - name: pgbouncer
            group: db
      - username: ops
        hostname: cache-1
        services:
          - name: redis
            group: cache
  - type: helper
    interval: 1h
    nodes:
      - username: deploy
        hostname: jobs-1
        services:
          - name: worker
            group: jobs
            suffix: [a, b]
store:
  on_change: true
  retention: 24h
"#;

fn fleet_runner() -> Arc<FleetRunner> {
    Arc::new(
        FleetRunner::new()
            .node(
                "ops@web-1",
                &listing(&[
                    listing_entry("nginx@80.service", "active", "running"),
                    listing_entry("nginx@443.service", "active", "running"),
                    listing_entry("sshd.service", "active", "running"),
                ]),
            )
            .node(
                "ops@10.0.0.20",
                &listing(&[
                    listing_entry("postgresql.service", "failed", "failed"),
                    listing_entry("pgbouncer.service", "active", "running"),
                ]),
            )
            // cache-1 is unreachable
            .node(
                "deploy@jobs-1",
                &listing(&[
                    listing_entry("worker@a.service", "active", "running"),
                    listing_entry("worker@b.service", "inactive", "dead"),
                    listing_entry("leftover.service", "failed", "failed"),
                ]),
            ),
    )
}

struct Pipeline {
    _dir: tempfile::TempDir,
    backend: Arc<dyn StorageBackend>,
    storage: StorageHandle,
    collectors: Vec<CollectorHandle>,
    aggregator: HealthAggregator,
}

async fn start(config: &Config, runner: Arc<FleetRunner>) -> Pipeline {
    let (dir, backend) = open_backend().await;
    let backend: Arc<dyn StorageBackend> = backend;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let storage = StorageHandle::spawn(
        backend.clone(),
        PersistPolicy::from(&config.store),
        event_rx,
    );

    let collectors = config
        .collectors
        .iter()
        .enumerate()
        .map(|(index, collector)| {
            CollectorHandle::from_config(index, collector, runner.clone(), event_tx.clone())
                .unwrap()
        })
        .collect();

    let aggregator = HealthAggregator::new(backend.clone(), config.groups());

    Pipeline {
        _dir: dir,
        backend,
        storage,
        collectors,
        aggregator,
    }
}

impl Pipeline {
    async fn poll_all(&self) -> Vec<TickSummary> {
        let mut summaries = Vec::new();
        for collector in &self.collectors {
            summaries.push(collector.poll_now().await.unwrap());
        }
        summaries
    }

    /// Stats once at least `batches` batches arrived and every unit of every
    /// received batch went through persistence
    async fn settled_stats(&self, batches: u64, units_per_batch: u64) -> StorageStats {
        let mut stats = StorageStats::default();
        for _ in 0..200 {
            stats = self.storage.get_stats().await.unwrap();
            let handled = stats.units_inserted + stats.units_suppressed + stats.insert_failures;
            if stats.batches_received >= batches
                && handled == stats.batches_received * units_per_batch
            {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("store did not settle: {stats:?}");
    }

    async fn stop(&self) {
        for collector in &self.collectors {
            collector.shutdown().await.unwrap();
        }
        self.storage.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn test_fleet_health_end_to_end() {
    let config = parse_config(FLEET).unwrap();
    let runner = fleet_runner();
    let pipeline = start(&config, runner.clone()).await;

    let summaries = pipeline.poll_all().await;
    assert_eq!(
        summaries,
        vec![
            TickSummary {
                batches: 2,
                failures: 1
            },
            TickSummary {
                batches: 1,
                failures: 0
            },
        ]
    );

    pipeline.stop().await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = pipeline
        .aggregator
        .latest(TimeDelta::hours(1))
        .await
        .unwrap();
    let frame = &report.report[0];

    let names: Vec<_> = frame.statuses.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["cache", "db", "jobs", "web"]);

    assert_eq!(frame.health_of("web"), Some(Health::Normal));
    // postgresql is important and failed
    assert_eq!(frame.health_of("db"), Some(Health::Down));
    // Unreachable node: nothing stored, not "all services dead"
    assert_eq!(frame.health_of("cache"), Some(Health::None));
    // worker@b is down but not important; leftover.service is unlabeled
    assert_eq!(frame.health_of("jobs"), Some(Health::Degraded));
}

#[tokio::test]
async fn test_remote_commands_per_strategy() {
    let config = parse_config(FLEET).unwrap();
    let runner = fleet_runner();
    let pipeline = start(&config, runner.clone()).await;

    pipeline.poll_all().await;
    pipeline.stop().await;

    let calls = runner.calls();
    let systemctl: Vec<_> = calls
        .iter()
        .filter(|(program, _)| program == "systemctl")
        .map(|(_, args)| args[2].clone())
        .collect();
    assert!(systemctl.contains(&"ops@web-1".to_string()));
    // IP wins over hostname
    assert!(systemctl.contains(&"ops@10.0.0.20".to_string()));
    assert!(systemctl.contains(&"ops@cache-1".to_string()));

    let (_, ssh_args) = calls
        .iter()
        .find(|(program, _)| program == "ssh")
        .expect("helper collector should use ssh");
    assert_eq!(ssh_args[0], "deploy@jobs-1");
    assert_eq!(ssh_args[1], "unitwatch-client");
    assert_eq!(ssh_args[3], r#"'["worker@a.service","worker@b.service"]'"#);
}

#[tokio::test]
async fn test_steady_units_are_stored_once() {
    let config = parse_config(
        r#"
collectors:
  - type: systemd
    interval: 1h
    nodes:
      - username: ops
        hostname: web-1
        services:
          - name: nginx
            group: web
            ports: [80, 443]
          - name: php-fpm
            group: web
store:
  on_change: true
"#,
    )
    .unwrap();
    let runner = Arc::new(FleetRunner::new().node(
        "ops@web-1",
        &listing(&[
            listing_entry("nginx@80.service", "active", "running"),
            listing_entry("nginx@443.service", "active", "running"),
            listing_entry("php-fpm.service", "failed", "failed"),
        ]),
    ));
    let pipeline = start(&config, runner).await;

    // Startup tick and the first PollNow may be persisted concurrently
    pipeline.poll_all().await;
    let first = pipeline.settled_stats(2, 3).await;
    assert!(first.units_inserted >= 3);

    pipeline.poll_all().await;
    let second = pipeline.settled_stats(3, 3).await;
    pipeline.stop().await;

    // Both nginx instances were already steady; php-fpm keeps failing
    assert!(second.units_suppressed >= 2, "{second:?}");
    assert_eq!(second.insert_failures, 0);

    let rows = row_count(pipeline.backend.as_ref()).await;
    assert_eq!(second.batches_received, 3);
    assert_eq!(rows, second.units_inserted);
    assert!(rows < 9, "{rows} rows stored");
}

#[tokio::test]
async fn test_zero_nodes_collector_still_ticks() {
    let config = parse_config("collectors:\n  - type: systemd\n    interval: 1h\n").unwrap();
    let pipeline = start(&config, fleet_runner()).await;

    let summaries = pipeline.poll_all().await;
    assert_eq!(summaries, vec![TickSummary::default()]);

    pipeline.stop().await;
    assert_eq!(row_count(pipeline.backend.as_ref()).await, 0);
}
