//! Monitor module - per-source health monitors and their collaborators

mod traits;
mod substate;
mod collaborators;
mod polling;
mod probes;
mod simulator;

pub use traits::{Monitor, MonitorEvent, MonitorKind};
pub use substate::*;
pub use collaborators::*;
pub use polling::{PollingMonitor, Probe};
pub use probes::*;
pub use simulator::*;
