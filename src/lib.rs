pub mod actors;
pub mod api;
pub mod collectors;
pub mod config;
pub mod health;
pub mod storage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Load state of a unit whose definition was found by systemd
pub const LOAD_LOADED: &str = "loaded";

/// Active state of a running unit
pub const STATE_ACTIVE: &str = "active";

/// Active state used for units that could not be found on the node
pub const STATE_INACTIVE: &str = "inactive";

/// Sub-state of a running service
pub const SUB_RUNNING: &str = "running";

/// Sub-state used for units that could not be found on the node
pub const SUB_DEAD: &str = "dead";

/// One observed systemd unit at one instant
///
/// Units are produced by the collectors, travel through the delivery queue in
/// batches and are either persisted or dropped by duplicate suppression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit identifier, e.g. `nginx.service` or `nginx@443.service`
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub load: String,
    pub state: String,
    pub sub: String,
    pub description: String,
    pub label: Label,
}

impl Unit {
    /// Synthesize the record for a configured unit that the node did not report
    pub fn dead(name: impl Into<String>, label: Label, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            timestamp,
            load: String::new(),
            state: STATE_INACTIVE.to_string(),
            sub: SUB_DEAD.to_string(),
            description: String::new(),
            label,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == STATE_ACTIVE
    }

    /// `loaded` / `active` / `running`
    pub fn is_steady(&self) -> bool {
        self.load == LOAD_LOADED && self.state == STATE_ACTIVE && self.sub == SUB_RUNNING
    }

    /// Whether two observations describe the same unit state
    pub fn same_state(&self, load: &str, state: &str, sub: &str) -> bool {
        self.load == load && self.state == state && self.sub == sub
    }
}

/// Classification metadata attached to every unit
///
/// Stored as a JSON blob next to the unit row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Label {
    pub group: String,
    pub importance: Importance,
    pub hostname: String,
    pub remark: String,
}

impl Label {
    pub fn new(group: impl Into<String>, importance: Importance, hostname: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            importance,
            hostname: hostname.into(),
            remark: String::new(),
        }
    }

    /// Units returned by a helper that match no configured service carry no group
    pub fn is_unlabeled(&self) -> bool {
        self.group.is_empty()
    }
}

/// Severity of a service; a failing `high` unit takes its whole group down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    #[default]
    Low,
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Importance::High => write!(f, "high"),
            Importance::Low => write!(f, "low"),
        }
    }
}
