// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Error taxonomy shared by the monitors and the coordinator
//!
//! Every error here is `Clone`: initialization is single-flight, and all
//! callers that piggy-back on one attempt receive the same error value.

use serde::Serialize;
use thiserror::Error;

use crate::monitors::{Capability, MonitorKind, PermissionStatus};

/// Fault raised by a single monitor. Isolated to that monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
pub enum MonitorError {
    #[error("{kind} monitor failed to start: {reason}")]
    StartFailed { kind: MonitorKind, reason: String },

    #[error("{kind} monitor fault: {reason}")]
    Fault { kind: MonitorKind, reason: String },

    #[error("{kind} monitor failed to stop: {reason}")]
    StopFailed { kind: MonitorKind, reason: String },

    #[error("{kind} monitor did not stop within {grace_ms} ms")]
    StopTimeout { kind: MonitorKind, grace_ms: u64 },
}

impl MonitorError {
    pub fn fault(kind: MonitorKind, reason: impl Into<String>) -> Self {
        Self::Fault { kind, reason: reason.into() }
    }

    pub fn start_failed(kind: MonitorKind, reason: impl Into<String>) -> Self {
        Self::StartFailed { kind, reason: reason.into() }
    }

    /// Monitor the error originated from
    pub fn kind(&self) -> MonitorKind {
        match self {
            Self::StartFailed { kind, .. }
            | Self::Fault { kind, .. }
            | Self::StopFailed { kind, .. }
            | Self::StopTimeout { kind, .. } => *kind,
        }
    }
}

/// One or more monitors failed to start; the started ones were rolled back.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("initialization failed: {}", join(.failures))]
pub struct InitializationError {
    pub failures: Vec<MonitorError>,
}

/// A single unmet condition of the recording gate
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Precondition {
    #[error("system is not initialized")]
    NotInitialized,

    #[error("system health is critical")]
    HealthCritical,

    #[error("memory pressure is critical")]
    MemoryCritical,

    #[error("battery level {level:.2} is at or below {threshold:.2}")]
    BatteryLow { level: f64, threshold: f64 },

    #[error("thermal state is critical")]
    ThermalCritical,

    #[error("{capability} permission is {status}")]
    PermissionMissing {
        capability: Capability,
        status: PermissionStatus,
    },
}

/// A gated command was invoked while recording is not allowed.
/// Returned synchronously; nothing was changed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("precondition failed: {}", join(.unmet))]
pub struct PreconditionError {
    pub unmet: Vec<Precondition>,
}

/// Failure reported by an external collaborator (camera, advisors, registry)
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{operation} failed: {reason}")]
pub struct CollaboratorError {
    pub operation: String,
    pub reason: String,
}

impl CollaboratorError {
    pub fn new(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned to callers of the coordinator's command surface
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("system is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

/// Informational: a bounded queue dropped events for one source.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{monitor} queue overflowed, {dropped} event(s) dropped")]
pub struct OverflowError {
    pub monitor: MonitorKind,
    pub dropped: u64,
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
