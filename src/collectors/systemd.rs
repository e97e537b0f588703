//! Direct strategy: `systemctl -H user@host list-units`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, trace};

use super::{CollectorKind, CommandRunner, Probe, ProbeError, ReportedUnit, parse_listing};
use crate::Unit;
use crate::config::ResolvedNode;

/// Lists every unit of a node and keeps the configured ones
///
/// Each configured instance name yields exactly one unit: the reported one if
/// the node knows it, a synthesized dead one otherwise.
pub struct SystemdProbe {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl SystemdProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn command_args(node: &ResolvedNode) -> Vec<String> {
        vec![
            "list-units".to_string(),
            "-H".to_string(),
            node.destination(),
            "-o".to_string(),
            "json".to_string(),
            "--no-pager".to_string(),
            "--all".to_string(),
        ]
    }
}

#[async_trait]
impl Probe for SystemdProbe {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Systemd
    }

    #[instrument(skip_all, fields(node = %node.address))]
    async fn probe(&self, node: &ResolvedNode) -> Result<Vec<Unit>, ProbeError> {
        let output = self
            .runner
            .run("systemctl", &Self::command_args(node), self.timeout)
            .await?
            .into_result()?;

        let reported = parse_listing(&output.stdout)?;
        trace!("node reported {} units", reported.len());

        let units = select_configured(node, reported, Utc::now());
        debug!("collected {} units", units.len());
        Ok(units)
    }
}

/// Match the listing against the node's configured services
fn select_configured(
    node: &ResolvedNode,
    reported: Vec<ReportedUnit>,
    timestamp: DateTime<Utc>,
) -> Vec<Unit> {
    let by_name: HashMap<String, ReportedUnit> = reported
        .into_iter()
        .map(|unit| (unit.unit.clone(), unit))
        .collect();

    let mut units = Vec::new();
    for service in &node.services {
        let label = service.label(&node.address);
        for name in service.instance_names() {
            let unit = match by_name.get(&name) {
                Some(found) => found.clone().into_unit(timestamp, label.clone()),
                None => {
                    trace!("{name} not reported, marking dead");
                    Unit::dead(name, label.clone(), timestamp)
                }
            };
            units.push(unit);
        }
    }
    units
}
