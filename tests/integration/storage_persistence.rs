//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Rows survive reopening the database
//! - Concurrent persistence tasks all land
//! - Retention pruning keeps the newest history
//! - Reports over history see each observation in its own bucket

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::mpsc;
use unitwatch::actors::messages::{CollectorEvent, UnitBatch};
use unitwatch::actors::storage::{PersistPolicy, StorageHandle, persist_batch};
use unitwatch::collectors::CollectorKind;
use unitwatch::health::{Health, HealthAggregator};
use unitwatch::storage::StorageBackend;
use unitwatch::storage::sqlite::SqliteBackend;
use unitwatch::{Importance, Unit};

use crate::helpers::{observed, open_backend, row_count, seed};

fn batch(node: &str, units: Vec<Unit>) -> UnitBatch {
    UnitBatch {
        source: CollectorKind::Systemd,
        node: node.to_string(),
        units,
    }
}

#[tokio::test]
async fn test_rows_survive_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("reopen.db");

    {
        let backend = SqliteBackend::new(&db_path).await.unwrap();
        seed(
            &backend,
            &[
                observed("nginx.service", "web", Importance::High, true),
                observed("postgresql.service", "db", Importance::High, false),
            ],
        )
        .await;
        backend.close().await.unwrap();
    }

    let backend: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    assert_eq!(row_count(backend.as_ref()).await, 2);

    let aggregator = HealthAggregator::new(backend, ["web".to_string(), "db".to_string()]);
    let report = aggregator.latest(TimeDelta::hours(1)).await.unwrap();
    assert_eq!(report.report[0].health_of("web"), Some(Health::Normal));
    assert_eq!(report.report[0].health_of("db"), Some(Health::Down));
}

#[tokio::test]
async fn test_concurrent_batches_all_land() {
    let (_dir, backend) = open_backend().await;
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let storage = StorageHandle::spawn(
        backend.clone(),
        PersistPolicy {
            retention: Duration::from_secs(24 * 60 * 60),
            on_change: false,
        },
        event_rx,
    );

    let mut producers = Vec::new();
    for node in 0..8 {
        let event_tx = event_tx.clone();
        producers.push(tokio::spawn(async move {
            for tick in 0..5 {
                let units = (0..4)
                    .map(|i| {
                        observed(
                            &format!("svc-{node}-{tick}-{i}.service"),
                            "web",
                            Importance::Low,
                            true,
                        )
                    })
                    .collect();
                event_tx
                    .send(CollectorEvent::Batch(batch(&format!("node-{node}"), units)))
                    .unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    drop(event_tx);

    storage.shutdown().await.unwrap();
    assert_eq!(row_count(backend.as_ref()).await, 8 * 5 * 4);
}

#[tokio::test]
async fn test_retention_keeps_recent_history() {
    let (_dir, backend) = open_backend().await;

    let mut history = Vec::new();
    for hours_ago in [30, 25, 23, 2] {
        let mut unit = observed("nginx.service", "web", Importance::High, true);
        unit.timestamp = Utc::now() - TimeDelta::hours(hours_ago);
        history.push(unit);
    }
    seed(backend.as_ref(), &history).await;

    let outcome = persist_batch(
        backend.as_ref(),
        &PersistPolicy {
            retention: Duration::from_secs(24 * 60 * 60),
            on_change: false,
        },
        &batch(
            "web-1",
            vec![observed("nginx.service", "web", Importance::High, true)],
        ),
    )
    .await;

    assert_eq!(outcome.pruned, 2);
    assert_eq!(outcome.inserted, 1);
    assert_eq!(row_count(backend.as_ref()).await, 3);
}

#[tokio::test]
async fn test_history_report_follows_state_changes() {
    let (_dir, backend) = open_backend().await;
    let now = Utc::now();

    // db went down three hours ago and came back an hour later
    let mut down = observed("postgresql.service", "db", Importance::High, false);
    down.timestamp = now - TimeDelta::minutes(170);
    let mut up = observed("postgresql.service", "db", Importance::High, true);
    up.timestamp = now - TimeDelta::minutes(110);
    let mut replica = observed("postgresql-replica.service", "db", Importance::Low, true);
    replica.timestamp = now - TimeDelta::minutes(170);
    seed(backend.as_ref(), &[down, replica, up]).await;

    let aggregator = HealthAggregator::new(backend, ["db".to_string()]);
    let report = aggregator
        .aggregate(now - TimeDelta::hours(2), now + TimeDelta::hours(1), TimeDelta::hours(1))
        .await
        .unwrap();

    let healths: Vec<_> = report
        .report
        .iter()
        .map(|frame| frame.health_of("db").unwrap())
        .collect();
    // [now-3h, now-2h): down + replica, [now-2h, now-1h): up, [now-1h, now): nothing
    assert_eq!(healths, vec![Health::Down, Health::Normal, Health::None]);
    assert_eq!(report.report[0].timestamp, now - TimeDelta::hours(2));
}
