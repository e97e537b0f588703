//! Collector strategies
//!
//! A strategy knows how to ask one node for the state of its systemd units and
//! how to turn the answer into labeled [`Unit`] records. Scheduling and fan-out
//! across nodes live in [`crate::actors::collector`]; strategies only see one
//! node at a time.
//!
//! ## Strategies
//!
//! - **systemd** ([`systemd::SystemdProbe`]): runs `systemctl -H user@host`
//!   locally and picks the configured units out of the full listing. Units the
//!   node does not report are synthesized as dead.
//! - **helper** ([`helper::HelperProbe`]): runs a helper program on the node
//!   over ssh, handing it the expected unit names, and labels whatever it
//!   returns.

pub mod command;
pub mod helper;
pub mod systemd;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CollectorConfig, ConfigError, ResolvedNode};
use crate::{Label, Unit};

pub use command::{CommandOutput, CommandRunner, ProcessRunner};

/// Which strategy produced a batch; persisted as the row `type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorKind {
    Systemd,
    /// Also accepted under its legacy name `kolektor`
    #[serde(alias = "kolektor")]
    Helper,
}

impl CollectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorKind::Systemd => "systemd",
            CollectorKind::Helper => "helper",
        }
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "systemd" => Ok(CollectorKind::Systemd),
            "helper" | "kolektor" => Ok(CollectorKind::Helper),
            other => Err(ConfigError::UnknownCollector(other.to_string())),
        }
    }
}

/// Errors of a single node probe
///
/// A failed probe only affects that node for that tick.
#[derive(Debug)]
pub enum ProbeError {
    /// The command could not be started or its arguments not encoded
    Transport(String),

    /// The remote command ran but reported failure
    NonZeroExit { code: Option<i32>, output: String },

    /// The command did not finish in time
    Timeout(Duration),

    /// The command's output is not the expected JSON
    MalformedOutput(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Transport(msg) => write!(f, "transport error: {}", msg),
            ProbeError::NonZeroExit { code, output } => match code {
                Some(code) => write!(f, "command exited with status {}: {}", code, output),
                None => write!(f, "command terminated by signal: {}", output),
            },
            ProbeError::Timeout(after) => write!(f, "command timed out after {:?}", after),
            ProbeError::MalformedOutput(msg) => write!(f, "malformed output: {}", msg),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Polling contract shared by all strategies
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> CollectorKind;

    /// Query one node and return its labeled units
    async fn probe(&self, node: &ResolvedNode) -> Result<Vec<Unit>, ProbeError>;
}

/// Pick the strategy named by the collector's `type`
pub fn build_probe(
    config: &CollectorConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<Arc<dyn Probe>, ConfigError> {
    let probe: Arc<dyn Probe> = match config.kind.parse::<CollectorKind>()? {
        CollectorKind::Systemd => Arc::new(systemd::SystemdProbe::new(
            runner,
            config.command_timeout,
        )),
        CollectorKind::Helper => Arc::new(helper::HelperProbe::new(
            runner,
            config.helper_command.clone(),
            config.command_timeout,
        )),
    };
    Ok(probe)
}

/// One entry of the JSON unit listing, as printed by `systemctl -o json` and
/// the helper
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReportedUnit {
    pub unit: String,
    #[serde(default)]
    pub load: String,
    #[serde(default)]
    pub active: String,
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub description: String,
}

impl ReportedUnit {
    pub fn into_unit(self, timestamp: DateTime<Utc>, label: Label) -> Unit {
        Unit {
            name: self.unit,
            timestamp,
            load: self.load,
            state: self.active,
            sub: self.sub,
            description: self.description,
            label,
        }
    }
}

pub(crate) fn parse_listing(stdout: &[u8]) -> Result<Vec<ReportedUnit>, ProbeError> {
    serde_json::from_slice(stdout).map_err(|e| ProbeError::MalformedOutput(e.to_string()))
}
