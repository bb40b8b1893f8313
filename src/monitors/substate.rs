// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Per-monitor sub-states
//!
//! Each value here is produced only by its owning monitor. The coordinator
//! keeps the latest one per source and never edits them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Camera session state as reported by the capture collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSubState {
    #[default]
    Idle,
    Configuring,
    Ready,
    Recording,
    Error(String),
}

impl CameraSubState {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }
}

/// Capabilities the capture pipeline may need authorization for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Camera,
    Microphone,
    PhotoLibrary,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Self::Camera, Self::Microphone, Self::PhotoLibrary];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Camera => "camera",
            Self::Microphone => "microphone",
            Self::PhotoLibrary => "photo library",
        };
        f.write_str(name)
    }
}

/// Authorization status of a single capability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Authorized,
    Denied,
    Restricted,
    #[default]
    Undetermined,
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Authorized => "authorized",
            Self::Denied => "denied",
            Self::Restricted => "restricted",
            Self::Undetermined => "undetermined",
        };
        f.write_str(name)
    }
}

/// Latest known authorization for every tracked capability.
/// Capabilities missing from the map are undetermined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSubState {
    pub statuses: BTreeMap<Capability, PermissionStatus>,
}

impl PermissionSubState {
    pub fn new(statuses: BTreeMap<Capability, PermissionStatus>) -> Self {
        Self { statuses }
    }

    /// Builder-style insert
    pub fn with(mut self, capability: Capability, status: PermissionStatus) -> Self {
        self.statuses.insert(capability, status);
        self
    }

    pub fn status(&self, capability: Capability) -> PermissionStatus {
        self.statuses.get(&capability).copied().unwrap_or_default()
    }
}

/// Memory pressure classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    #[default]
    Nominal,
    Warning,
    Critical,
}

impl MemoryPressure {
    /// Classify a usage ratio against the warning/critical ratios
    pub fn classify(ratio: f64, warning_ratio: f64, critical_ratio: f64) -> Self {
        if ratio >= critical_ratio {
            Self::Critical
        } else if ratio >= warning_ratio {
            Self::Warning
        } else {
            Self::Nominal
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySubState {
    pub pressure: MemoryPressure,
    /// Fraction of available memory in use, 0.0 - 1.0
    pub usage_ratio: f64,
}

impl MemorySubState {
    pub fn new(pressure: MemoryPressure, usage_ratio: f64) -> Self {
        Self {
            pressure,
            usage_ratio: usage_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn from_ratio(usage_ratio: f64, warning_ratio: f64, critical_ratio: f64) -> Self {
        Self::new(
            MemoryPressure::classify(usage_ratio, warning_ratio, critical_ratio),
            usage_ratio,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingState {
    #[default]
    Unknown,
    Unplugged,
    Charging,
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatterySubState {
    /// Charge level 0.0 - 1.0; `None` until the battery has been sampled
    pub level: Option<f64>,
    pub charging: ChargingState,
}

impl BatterySubState {
    /// A non-finite level is treated as unknown
    pub fn new(level: f64, charging: ChargingState) -> Self {
        Self {
            level: level.is_finite().then(|| level.clamp(0.0, 1.0)),
            charging,
        }
    }

    pub fn unplugged(level: f64) -> Self {
        Self::new(level, ChargingState::Unplugged)
    }
}

/// Device thermal state, ordered from coolest to hottest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalState {
    #[default]
    Nominal,
    Fair,
    Serious,
    Critical,
}

impl fmt::Display for ThermalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nominal => "nominal",
            Self::Fair => "fair",
            Self::Serious => "serious",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}
