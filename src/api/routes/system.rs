//! Group health report endpoints

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::api::{error::ApiResult, state::ApiState};
use crate::health::HealthReport;

/// Bucket width used when none (or garbage) is given
fn default_interval() -> TimeDelta {
    TimeDelta::hours(1)
}

/// Report length used when `from` is missing or unparseable
fn default_lookback() -> TimeDelta {
    TimeDelta::hours(24)
}

/// Query parameters of the report endpoint
///
/// Kept as raw strings: an unparseable value falls back to its default
/// instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct SystemHealthQuery {
    /// RFC 3339 start, default now - 24h
    pub from: Option<String>,

    /// RFC 3339 end, default now
    pub to: Option<String>,

    /// Bucket width such as `1h` or `15m`, default 1h
    pub interval: Option<String>,
}

impl SystemHealthQuery {
    /// Resolve the window against `now`
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>, TimeDelta) {
        let from = parse_timestamp(self.from.as_deref()).unwrap_or(now - default_lookback());
        let to = parse_timestamp(self.to.as_deref()).unwrap_or(now);
        let interval = parse_interval(self.interval.as_deref()).unwrap_or_else(default_interval);
        (from, to, interval)
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn parse_interval(value: Option<&str>) -> Option<TimeDelta> {
    let duration = humantime::parse_duration(value?).ok()?;
    TimeDelta::from_std(duration).ok()
}

/// GET /api/v1/system/health
///
/// Group health per bucket over `[from, to)`
pub async fn get_system_health(
    State(state): State<ApiState>,
    Query(query): Query<SystemHealthQuery>,
) -> ApiResult<Json<HealthReport>> {
    let (from, to, interval) = query.window(Utc::now());
    debug!("health report from {} to {} every {}", from, to, interval);

    let report = state.aggregator.aggregate(from, to, interval).await?;
    Ok(Json(report))
}

/// GET /api/v1/system/health/latest
///
/// Single frame over the last hour
pub async fn get_latest_health(State(state): State<ApiState>) -> ApiResult<Json<HealthReport>> {
    let report = state.aggregator.latest(default_interval()).await?;
    Ok(Json(report))
}
