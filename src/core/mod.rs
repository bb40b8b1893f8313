//! Core module - fan-in, health derivation and lifecycle coordination

mod stream;
mod event_bus;
mod reducer;
mod optimizer;
mod coordinator;

pub use stream::{bounded, Delivery, EventReceiver, EventSender, SendOutcome, TryRecvError};
pub use event_bus::{CoordinatorEvent, Envelope, EventBus};
pub use reducer::{HealthPolicy, Reducer, Step, SubStates};
pub use optimizer::{OptimizationAction, OptimizationReport};
pub use coordinator::{HealthCoordinator, MonitorSet};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::monitors::{
    BatterySubState, CameraSubState, MemorySubState, MonitorKind, PermissionSubState, ThermalState,
};

/// Aggregated health, derived only by the coordinator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealth {
    Healthy,
    Warning,
    Critical,
    #[default]
    Unknown,
}

impl fmt::Display for SystemHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Immutable snapshot of the whole system.
///
/// A new value replaces the previous one on every reducer cycle; readers
/// always hold a complete snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemStatus {
    pub is_initialized: bool,
    pub system_health: SystemHealth,
    pub camera: CameraSubState,
    pub memory: MemorySubState,
    pub battery: BatterySubState,
    pub thermal: ThermalState,
    pub permissions: PermissionSubState,
    /// Monitors whose latest report is a fault
    pub faulted_monitors: Vec<MonitorKind>,
}
