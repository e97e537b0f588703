//! Row definitions for the `service_status` table
//!
//! | column      | content                                       |
//! |-------------|-----------------------------------------------|
//! | `id`        | autoincrement surrogate key                   |
//! | `timestamp` | observation time, Unix milliseconds (UTC)     |
//! | `type`      | collector that produced the row               |
//! | `name`      | unit name                                     |
//! | `load`      | load state                                    |
//! | `status`    | active state                                  |
//! | `substatus` | sub-state                                     |
//! | `label`     | JSON-encoded [`Label`]                        |
//!
//! The label is kept as the exact JSON text that was written. Rows of the same
//! unit are matched on that text, so it must be produced by one serializer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use crate::collectors::CollectorKind;
use crate::{Label, Unit};

/// A row about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewStatusRow {
    pub timestamp: DateTime<Utc>,
    pub source: CollectorKind,
    pub name: String,
    pub load: String,
    pub status: String,
    pub substatus: String,
    pub label: String,
}

impl NewStatusRow {
    pub fn from_unit(source: CollectorKind, unit: &Unit) -> StorageResult<Self> {
        let label = serde_json::to_string(&unit.label).map_err(|e| {
            StorageError::SerializationError(format!("failed to serialize label: {}", e))
        })?;

        Ok(Self {
            timestamp: unit.timestamp,
            source,
            name: unit.name.clone(),
            load: unit.load.clone(),
            status: unit.state.clone(),
            substatus: unit.sub.clone(),
            label,
        })
    }
}

/// A persisted row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRow {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// Collector tag as stored, see [`CollectorKind::as_str`]
    pub source: String,
    pub name: String,
    pub load: String,
    pub status: String,
    pub substatus: String,
    pub label: String,
}

impl StatusRow {
    pub fn label(&self) -> Result<Label, serde_json::Error> {
        serde_json::from_str(&self.label)
    }

    /// Rebuild the observed unit; fails if the stored label is not a valid label
    pub fn into_unit(self) -> Result<Unit, serde_json::Error> {
        let label = self.label()?;
        Ok(Unit {
            name: self.name,
            timestamp: self.timestamp,
            load: self.load,
            state: self.status,
            sub: self.substatus,
            description: String::new(),
            label,
        })
    }

    /// `loaded` / `active` / `running`
    pub fn is_steady(&self) -> bool {
        self.load == crate::LOAD_LOADED
            && self.status == crate::STATE_ACTIVE
            && self.substatus == crate::SUB_RUNNING
    }
}
