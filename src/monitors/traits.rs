// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Monitor trait and common types

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BatterySubState, CameraSubState, MemorySubState, PermissionSubState, ThermalState};
use crate::core::EventSender;
use crate::error::MonitorError;

/// Identifies the monitor a sub-state or event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    Camera,
    Permission,
    Memory,
    Battery,
    Thermal,
}

impl MonitorKind {
    pub const ALL: [MonitorKind; 5] = [
        Self::Camera,
        Self::Permission,
        Self::Memory,
        Self::Battery,
        Self::Thermal,
    ];

    /// Stable position in [`MonitorKind::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Camera => "camera",
            Self::Permission => "permission",
            Self::Memory => "memory",
            Self::Battery => "battery",
            Self::Thermal => "thermal",
        };
        f.write_str(name)
    }
}

/// A sub-state transition or fault emitted by a monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MonitorEvent {
    Camera(CameraSubState),
    Permission(PermissionSubState),
    Memory(MemorySubState),
    Battery(BatterySubState),
    Thermal(ThermalState),
    /// Internal monitor fault. Emitted instead of terminating.
    Fault(MonitorError),
}

impl MonitorEvent {
    /// The monitor this event belongs to
    pub fn source(&self) -> MonitorKind {
        match self {
            Self::Camera(_) => MonitorKind::Camera,
            Self::Permission(_) => MonitorKind::Permission,
            Self::Memory(_) => MonitorKind::Memory,
            Self::Battery(_) => MonitorKind::Battery,
            Self::Thermal(_) => MonitorKind::Thermal,
            Self::Fault(err) => err.kind(),
        }
    }
}

/// Contract every monitor implements.
///
/// The coordinator hands the monitor the sending half of its bounded queue
/// on `start`. A monitor never blocks on the coordinator or on another
/// monitor; it only blocks on its own signal source.
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Source this monitor reports for
    fn kind(&self) -> MonitorKind;

    fn is_running(&self) -> bool;

    /// Start emitting into `sink`. Starting a running monitor is a no-op
    /// that returns success and drops `sink`.
    async fn start(&self, sink: EventSender<MonitorEvent>) -> Result<(), MonitorError>;

    /// Stop emitting and release the sink. The caller bounds how long it
    /// waits for this to finish.
    async fn stop(&self) -> Result<(), MonitorError>;
}
