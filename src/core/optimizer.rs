// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! System optimization sub-actions

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::time::timeout;
use tracing::debug;

use crate::error::CollaboratorError;
use crate::monitors::{BatteryAdvisor, MemoryAdvisor, ThermalAdvisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationAction {
    ReleaseMemory,
    BatterySaver,
    ThermalMitigation,
}

impl fmt::Display for OptimizationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReleaseMemory => "release memory",
            Self::BatterySaver => "battery saver",
            Self::ThermalMitigation => "thermal mitigation",
        };
        f.write_str(name)
    }
}

/// Per-action outcome of one optimization request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub completed: Vec<OptimizationAction>,
    pub timed_out: Vec<OptimizationAction>,
    pub failed: Vec<(OptimizationAction, String)>,
}

impl OptimizationReport {
    /// Some requested action did not acknowledge successfully
    pub fn is_partial(&self) -> bool {
        !self.timed_out.is_empty() || !self.failed.is_empty()
    }
}

enum Outcome {
    Completed,
    TimedOut,
    Failed(String),
}

/// Run every requested action concurrently, each bounded by `ack_timeout`.
/// Thermal mitigation runs only when `thermal` is given.
pub(crate) async fn optimize(
    memory: Arc<dyn MemoryAdvisor>,
    battery: Arc<dyn BatteryAdvisor>,
    thermal: Option<Arc<dyn ThermalAdvisor>>,
    ack_timeout: Duration,
) -> OptimizationReport {
    let mut actions: Vec<(OptimizationAction, BoxFuture<'static, Result<(), CollaboratorError>>)> = vec![
        (
            OptimizationAction::ReleaseMemory,
            async move { memory.release_memory().await }.boxed(),
        ),
        (
            OptimizationAction::BatterySaver,
            async move { battery.enable_power_saving().await }.boxed(),
        ),
    ];
    if let Some(thermal) = thermal {
        actions.push((
            OptimizationAction::ThermalMitigation,
            async move { thermal.mitigate().await }.boxed(),
        ));
    }

    let outcomes = futures::future::join_all(actions.into_iter().map(|(action, fut)| async move {
        let outcome = match timeout(ack_timeout, fut).await {
            Ok(Ok(())) => Outcome::Completed,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(_) => Outcome::TimedOut,
        };
        (action, outcome)
    }))
    .await;

    let mut report = OptimizationReport::default();
    for (action, outcome) in outcomes {
        debug!("Optimization action '{}' finished", action);
        match outcome {
            Outcome::Completed => report.completed.push(action),
            Outcome::TimedOut => report.timed_out.push(action),
            Outcome::Failed(reason) => report.failed.push((action, reason)),
        }
    }
    report
}
