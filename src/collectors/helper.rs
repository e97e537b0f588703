//! Delegated strategy: a helper program on the node reports the units
//!
//! The helper is invoked as `ssh user@host <helper> --services '<json>'` where
//! `<json>` is the array of expected unit names. It answers with a JSON array
//! of `{unit, active, sub, load}` records.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument, trace};

use super::{CollectorKind, CommandRunner, Probe, ProbeError, parse_listing};
use crate::config::ResolvedNode;
use crate::{Label, Unit};

pub struct HelperProbe {
    runner: Arc<dyn CommandRunner>,
    command: String,
    timeout: Duration,
}

impl HelperProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, command: String, timeout: Duration) -> Self {
        Self {
            runner,
            command,
            timeout,
        }
    }

    fn command_args(&self, node: &ResolvedNode) -> Result<Vec<String>, ProbeError> {
        let expected = serde_json::to_string(&node.expected_units())
            .map_err(|e| ProbeError::Transport(format!("failed to encode unit list: {}", e)))?;

        // ssh hands the arguments to the remote shell, the quotes keep the
        // array in one piece
        Ok(vec![
            node.destination(),
            self.command.clone(),
            "--services".to_string(),
            format!("'{}'", expected),
        ])
    }
}

#[async_trait]
impl Probe for HelperProbe {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Helper
    }

    #[instrument(skip_all, fields(node = %node.address))]
    async fn probe(&self, node: &ResolvedNode) -> Result<Vec<Unit>, ProbeError> {
        let args = self.command_args(node)?;
        trace!("asking helper for {}", args[3]);

        let output = self
            .runner
            .run("ssh", &args, self.timeout)
            .await?
            .into_result()?;

        let timestamp = Utc::now();
        let units: Vec<Unit> = parse_listing(&output.stdout)?
            .into_iter()
            .map(|reported| {
                let label = node.label_for(&reported.unit).unwrap_or_else(|| {
                    trace!("{} matches no configured service", reported.unit);
                    Label::default()
                });
                reported.into_unit(timestamp, label)
            })
            .collect();

        debug!("helper reported {} units", units.len());
        Ok(units)
    }
}
