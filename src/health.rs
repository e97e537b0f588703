//! Health aggregation
//!
//! Turns persisted unit observations into a time series of per-group health.
//! A report covers `[from, to)` in steps of `interval`: every step `t` becomes
//! one frame, computed from the window `[t - interval, t)`. Inside a window
//! only the last observation of each unit counts (greatest row id wins).
//!
//! Every group declared in the configuration appears in every frame, with
//! [`Health::None`] when nothing was observed for it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::storage::{StorageBackend, StorageError};
use crate::{Importance, Unit};

/// Upper bound on the number of frames of one report
pub const MAX_BUCKETS: usize = 10_000;

/// Health of one group within one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Every unit is active
    Normal,
    /// Some units are down, none of them important
    Degraded,
    /// No unit is active, or an important one is not
    Down,
    /// Nothing observed
    None,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Health::Normal => "normal",
            Health::Degraded => "degraded",
            Health::Down => "down",
            Health::None => "none",
        };
        f.write_str(s)
    }
}

/// Classify a group from the latest observation of each of its units
///
/// Checked in order: no units, all active, none active, an inactive
/// high-importance unit.
pub fn classify(units: &[Unit]) -> Health {
    if units.is_empty() {
        return Health::None;
    }

    let active = units.iter().filter(|unit| unit.is_active()).count();
    if active == units.len() {
        return Health::Normal;
    }

    let important_failure = units
        .iter()
        .any(|unit| !unit.is_active() && unit.label.importance == Importance::High);

    if active == 0 || important_failure {
        Health::Down
    } else {
        Health::Degraded
    }
}

#[derive(Debug)]
pub enum HealthError {
    /// Reading observations failed
    Storage(StorageError),

    /// A stored label is not valid JSON; the database holds corrupt rows
    CorruptLabel {
        row_id: i64,
        source: serde_json::Error,
    },

    /// The requested window cannot be split into buckets
    InvalidWindow(String),
}

impl fmt::Display for HealthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthError::Storage(e) => write!(f, "storage error: {}", e),
            HealthError::CorruptLabel { row_id, source } => {
                write!(f, "corrupt label in row {}: {}", row_id, source)
            }
            HealthError::InvalidWindow(msg) => write!(f, "invalid window: {}", msg),
        }
    }
}

impl std::error::Error for HealthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HealthError::Storage(e) => Some(e),
            HealthError::CorruptLabel { source, .. } => Some(source),
            HealthError::InvalidWindow(_) => None,
        }
    }
}

impl From<StorageError> for HealthError {
    fn from(err: StorageError) -> Self {
        HealthError::Storage(err)
    }
}

/// One frame of a report and the window it is computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Frame timestamp, equal to `end`
    pub timestamp: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Bucket {
    /// Bucket whose window ends at `timestamp`
    ///
    /// Fails when the window would start before the earliest representable
    /// instant.
    pub fn ending_at(timestamp: DateTime<Utc>, interval: TimeDelta) -> Result<Self, HealthError> {
        let start = window_start(timestamp, interval)?;
        Ok(Self {
            timestamp,
            start,
            end: timestamp,
        })
    }
}

fn window_start(end: DateTime<Utc>, interval: TimeDelta) -> Result<DateTime<Utc>, HealthError> {
    end.checked_sub_signed(interval).ok_or_else(|| {
        HealthError::InvalidWindow(format!(
            "interval {} reaches before the earliest supported date",
            interval
        ))
    })
}

/// The buckets of `[from, to)` in steps of `interval`
#[derive(Debug, Clone, Copy)]
pub struct TimeBuckets {
    from: DateTime<Utc>,
    /// Start of the first window, `from - interval`
    first_start: DateTime<Utc>,
    interval: TimeDelta,
    count: usize,
}

impl TimeBuckets {
    /// `from >= to` yields no buckets. A non-positive interval or more than
    /// [`MAX_BUCKETS`] buckets is rejected, as is a first window starting
    /// outside the representable date range.
    pub fn new(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: TimeDelta,
    ) -> Result<Self, HealthError> {
        let step = interval.num_milliseconds();
        if step <= 0 {
            return Err(HealthError::InvalidWindow(format!(
                "interval must be at least 1ms, got {}",
                interval
            )));
        }

        let span = (to - from).num_milliseconds();
        let count = if span <= 0 {
            0
        } else {
            // Last bucket may start less than one interval before `to`
            span.div_euclid(step) + i64::from(span.rem_euclid(step) != 0)
        };

        if count > MAX_BUCKETS as i64 {
            return Err(HealthError::InvalidWindow(format!(
                "{} buckets requested, at most {} allowed",
                count, MAX_BUCKETS
            )));
        }

        Ok(Self {
            from,
            first_start: window_start(from, interval)?,
            interval,
            count: count as usize,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Bucket> + '_ {
        (0..self.count).map(move |i| {
            // count <= MAX_BUCKETS fits in i32; every end lies before `to`
            let offset = self.interval * i as i32;
            let end = self.from + offset;
            Bucket {
                timestamp: end,
                start: self.first_start + offset,
                end,
            }
        })
    }
}

/// Response body of the health endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub report: Vec<StatusTimeFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTimeFrame {
    pub timestamp: DateTime<Utc>,
    /// Sorted by group name
    pub statuses: Vec<GroupStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStatus {
    pub name: String,
    pub health: Health,
}

impl StatusTimeFrame {
    /// Health of one group, if the frame lists it
    pub fn health_of(&self, group: &str) -> Option<Health> {
        self.statuses
            .iter()
            .find(|status| status.name == group)
            .map(|status| status.health)
    }
}

/// Computes health reports straight from the storage backend
#[derive(Clone)]
pub struct HealthAggregator {
    backend: Arc<dyn StorageBackend>,
    groups: Arc<BTreeSet<String>>,
}

impl HealthAggregator {
    /// `groups` are listed in every frame, observed or not
    pub fn new(backend: Arc<dyn StorageBackend>, groups: impl IntoIterator<Item = String>) -> Self {
        Self {
            backend,
            groups: Arc::new(groups.into_iter().collect()),
        }
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Report over `[from, to)`
    ///
    /// Either every frame is computed or the call fails; a storage error or a
    /// corrupt label aborts the whole report.
    #[instrument(skip(self))]
    pub async fn aggregate(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: TimeDelta,
    ) -> Result<HealthReport, HealthError> {
        let buckets = TimeBuckets::new(from, to, interval)?;
        debug!("aggregating {} buckets", buckets.len());

        let mut report = Vec::with_capacity(buckets.len());
        for bucket in buckets.iter() {
            report.push(self.frame(bucket).await?);
        }

        Ok(HealthReport { report })
    }

    /// Single frame ending now
    #[instrument(skip(self))]
    pub async fn latest(&self, interval: TimeDelta) -> Result<HealthReport, HealthError> {
        if interval <= TimeDelta::zero() {
            return Err(HealthError::InvalidWindow(format!(
                "interval must be positive, got {}",
                interval
            )));
        }

        let frame = self.frame(Bucket::ending_at(Utc::now(), interval)?).await?;
        Ok(HealthReport {
            report: vec![frame],
        })
    }

    async fn frame(&self, bucket: Bucket) -> Result<StatusTimeFrame, HealthError> {
        let rows = self
            .backend
            .query_latest_per_unit(bucket.start, bucket.end)
            .await?;
        trace!("bucket {} has {} units", bucket.timestamp, rows.len());

        let mut members: BTreeMap<String, Vec<Unit>> = self
            .groups
            .iter()
            .map(|group| (group.clone(), Vec::new()))
            .collect();

        for row in rows {
            let row_id = row.id;
            let unit = row
                .into_unit()
                .map_err(|source| HealthError::CorruptLabel { row_id, source })?;

            if unit.label.group.is_empty() {
                continue;
            }
            members
                .entry(unit.label.group.clone())
                .or_default()
                .push(unit);
        }

        let statuses = members
            .into_iter()
            .map(|(name, units)| GroupStatus {
                health: classify(&units),
                name,
            })
            .collect();

        Ok(StatusTimeFrame {
            timestamp: bucket.timestamp,
            statuses,
        })
    }
}
