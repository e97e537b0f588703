//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - The report endpoints return the documented JSON shape
//! - Query parameters fall back to their defaults
//! - Invalid windows are rejected
//! - Liveness and statistics endpoints respond

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use unitwatch::actors::storage::{PersistPolicy, StorageHandle};
use unitwatch::api::{ApiConfig, ApiState, HealthResponse, StatsResponse, spawn_api_server};
use unitwatch::health::{Health, HealthAggregator, HealthReport};
use unitwatch::storage::StorageBackend;

use crate::helpers::{open_backend, seed_web_and_db};

// Helper to create test API server
async fn spawn_test_api(backend: Arc<dyn StorageBackend>) -> SocketAddr {
    let (_event_tx, event_rx) = mpsc::unbounded_channel();
    let storage = StorageHandle::spawn(
        backend.clone(),
        PersistPolicy {
            retention: std::time::Duration::from_secs(24 * 60 * 60),
            on_change: false,
        },
        event_rx,
    );

    let aggregator = HealthAggregator::new(
        backend.clone(),
        ["web", "db", "cache"].map(String::from),
    );
    let state = ApiState::new(aggregator, storage, backend, vec![]);

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        enable_cors: true,
    };

    spawn_api_server(config, state).await.unwrap()
}

#[tokio::test]
async fn test_latest_endpoint() {
    let (_dir, backend) = open_backend().await;
    seed_web_and_db(backend.as_ref()).await;
    let addr = spawn_test_api(backend).await;

    let response = reqwest::get(format!("http://{}/api/v1/system/health/latest", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report: HealthReport = response.json().await.unwrap();
    assert_eq!(report.report.len(), 1);

    let frame = &report.report[0];
    assert_eq!(frame.health_of("web"), Some(Health::Normal));
    assert_eq!(frame.health_of("db"), Some(Health::Down));
    assert_eq!(frame.health_of("cache"), Some(Health::None));
}

#[tokio::test]
async fn test_report_json_shape() {
    let (_dir, backend) = open_backend().await;
    seed_web_and_db(backend.as_ref()).await;
    let addr = spawn_test_api(backend).await;

    let body: Value = reqwest::get(format!("http://{}/api/v1/system/health/latest", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let frame = &body["report"][0];
    assert!(frame["timestamp"].as_str().unwrap().parse::<DateTime<Utc>>().is_ok());
    assert_eq!(frame["statuses"][0], serde_json::json!({"name": "cache", "health": "none"}));
    assert_eq!(frame["statuses"][1], serde_json::json!({"name": "db", "health": "down"}));
    assert_eq!(frame["statuses"][2], serde_json::json!({"name": "web", "health": "normal"}));
}

#[tokio::test]
async fn test_report_with_explicit_window() {
    let (_dir, backend) = open_backend().await;
    let addr = spawn_test_api(backend).await;

    let to = Utc::now();
    let from = to - TimeDelta::hours(2);
    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/api/v1/system/health", addr))
        .query(&[
            ("from", from.to_rfc3339()),
            ("to", to.to_rfc3339()),
            ("interval", "30m".to_string()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report: HealthReport = response.json().await.unwrap();
    assert_eq!(report.report.len(), 4);
    assert!(
        report
            .report
            .iter()
            .all(|frame| frame.statuses.iter().all(|s| s.health == Health::None))
    );
}

#[tokio::test]
async fn test_unparseable_parameters_use_defaults() {
    let (_dir, backend) = open_backend().await;
    let addr = spawn_test_api(backend).await;

    let response = reqwest::get(format!(
        "http://{}/api/v1/system/health?from=yesterday&to=&interval=often",
        addr
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // now-24h to now in 1h steps
    let report: HealthReport = response.json().await.unwrap();
    assert_eq!(report.report.len(), 24);
}

#[tokio::test]
async fn test_zero_interval_is_rejected() {
    let (_dir, backend) = open_backend().await;
    let addr = spawn_test_api(backend).await;

    let response = reqwest::get(format!(
        "http://{}/api/v1/system/health?interval=0s",
        addr
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("interval"));
}

#[tokio::test]
async fn test_too_many_buckets_is_rejected() {
    let (_dir, backend) = open_backend().await;
    let addr = spawn_test_api(backend).await;

    let response = reqwest::get(format!(
        "http://{}/api/v1/system/health?interval=1s",
        addr
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_interval_beyond_calendar_is_rejected() {
    let (_dir, backend) = open_backend().await;
    let addr = spawn_test_api(backend).await;

    let response = reqwest::get(format!(
        "http://{}/api/v1/system/health?interval=300000y",
        addr
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("interval"));
}

#[tokio::test]
async fn test_corrupt_row_is_an_internal_error() {
    let (_dir, backend) = open_backend().await;
    let mut row = unitwatch::storage::NewStatusRow::from_unit(
        unitwatch::collectors::CollectorKind::Systemd,
        &crate::helpers::observed("nginx.service", "web", unitwatch::Importance::Low, true),
    )
    .unwrap();
    row.label = "not json".to_string();
    backend.insert(&row).await.unwrap();

    let addr = spawn_test_api(backend).await;
    let response = reqwest::get(format!("http://{}/api/v1/system/health/latest", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let (_dir, backend) = open_backend().await;
    let addr = spawn_test_api(backend).await;

    let response = reqwest::get(format!("http://{}/api/v1/health", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: HealthResponse = response.json().await.unwrap();
    assert_eq!(body.status, "ok");
}

#[tokio::test]
async fn test_stats_endpoint() {
    let (_dir, backend) = open_backend().await;
    seed_web_and_db(backend.as_ref()).await;
    let addr = spawn_test_api(backend).await;

    let response = reqwest::get(format!("http://{}/api/v1/stats", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats: StatsResponse = response.json().await.unwrap();
    assert!(stats.backend.starts_with("SQLite: 3 rows"), "{}", stats.backend);
    assert_eq!(stats.storage.batches_received, 0);
    assert!(stats.collectors.is_empty());
}
