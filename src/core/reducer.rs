// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Health reducer - derives `SystemHealth` from the latest sub-states
//!
//! Health is recomputed from scratch on every event; nothing accumulates,
//! so a dropped event cannot leave the health stale once a newer value
//! from the same source arrives. Side effects are edge-triggered: the
//! reducer remembers the previous health and asks for a recording stop
//! on the transition into `Critical`, or when the camera reports a
//! recording while health is already `Critical`. The coordinator confirms
//! with the camera collaborator before stopping.

use std::collections::BTreeSet;

use tracing::warn;

use super::{CoordinatorEvent, SystemHealth, SystemStatus};
use crate::config::CoordinatorConfig;
use crate::error::{Precondition, PreconditionError};
use crate::monitors::{
    BatterySubState, CameraSubState, Capability, MemoryPressure, MemorySubState, MonitorEvent,
    MonitorKind, PermissionStatus, PermissionSubState, ThermalState,
};

/// Latest known value per monitor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubStates {
    pub camera: CameraSubState,
    pub permissions: PermissionSubState,
    pub memory: MemorySubState,
    pub battery: BatterySubState,
    pub thermal: ThermalState,
    pub faulted: BTreeSet<MonitorKind>,
}

impl SubStates {
    /// Record `event` as the latest value of `source`.
    ///
    /// Each field is owned by one monitor, so an event whose variant belongs
    /// to another source is handed back untouched.
    pub fn apply(&mut self, source: MonitorKind, event: MonitorEvent) -> Result<(), MonitorEvent> {
        if event.source() != source {
            return Err(event);
        }

        match event {
            MonitorEvent::Camera(state) => self.camera = state,
            MonitorEvent::Permission(state) => self.permissions = state,
            MonitorEvent::Memory(state) => self.memory = state,
            MonitorEvent::Battery(state) => self.battery = state,
            MonitorEvent::Thermal(state) => self.thermal = state,
            MonitorEvent::Fault(_) => {
                self.faulted.insert(source);
                return Ok(());
            }
        }
        self.faulted.remove(&source);
        Ok(())
    }
}

/// Thresholds and requirements behind the health and recording rules
#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    pub critical_battery: f64,
    pub warning_battery: f64,
    pub required_permissions: Vec<Capability>,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }
}

impl HealthPolicy {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            critical_battery: config.critical_battery_threshold,
            warning_battery: config.warning_battery_threshold,
            required_permissions: config.required_permissions.clone(),
        }
    }

    fn battery_below(battery: &BatterySubState, threshold: f64) -> bool {
        battery.level.is_some_and(|level| level < threshold)
    }

    /// Most-restrictive-wins: any critical input makes the system critical,
    /// otherwise any warning input (or faulted monitor) makes it a warning.
    pub fn derive_health(&self, substates: &SubStates) -> SystemHealth {
        let permission_denied = self
            .required_permissions
            .iter()
            .any(|&capability| substates.permissions.status(capability) == PermissionStatus::Denied);

        if substates.memory.pressure == MemoryPressure::Critical
            || Self::battery_below(&substates.battery, self.critical_battery)
            || substates.thermal == ThermalState::Critical
            || permission_denied
        {
            SystemHealth::Critical
        } else if substates.memory.pressure == MemoryPressure::Warning
            || Self::battery_below(&substates.battery, self.warning_battery)
            || substates.thermal == ThermalState::Serious
            || !substates.faulted.is_empty()
        {
            SystemHealth::Warning
        } else {
            SystemHealth::Healthy
        }
    }

    /// Snapshot for `substates`. Health is `Unknown` while not initialized.
    pub fn status(&self, is_initialized: bool, substates: &SubStates) -> SystemStatus {
        SystemStatus {
            is_initialized,
            system_health: if is_initialized {
                self.derive_health(substates)
            } else {
                SystemHealth::Unknown
            },
            camera: substates.camera.clone(),
            memory: substates.memory,
            battery: substates.battery,
            thermal: substates.thermal,
            permissions: substates.permissions.clone(),
            faulted_monitors: substates.faulted.iter().copied().collect(),
        }
    }

    /// Recording gate. Collects every unmet condition.
    pub fn check_recording(&self, status: &SystemStatus) -> Result<(), PreconditionError> {
        let mut unmet = Vec::new();

        if !status.is_initialized {
            unmet.push(Precondition::NotInitialized);
        }
        if status.system_health == SystemHealth::Critical {
            unmet.push(Precondition::HealthCritical);
        }
        if status.memory.pressure == MemoryPressure::Critical {
            unmet.push(Precondition::MemoryCritical);
        }
        if let Some(level) = status.battery.level {
            if !(level > self.critical_battery) {
                unmet.push(Precondition::BatteryLow {
                    level,
                    threshold: self.critical_battery,
                });
            }
        }
        if status.thermal == ThermalState::Critical {
            unmet.push(Precondition::ThermalCritical);
        }
        for &capability in &self.required_permissions {
            let permission = status.permissions.status(capability);
            if permission != PermissionStatus::Authorized {
                unmet.push(Precondition::PermissionMissing {
                    capability,
                    status: permission,
                });
            }
        }

        if unmet.is_empty() {
            Ok(())
        } else {
            Err(PreconditionError { unmet })
        }
    }

    pub fn can_record(&self, status: &SystemStatus) -> bool {
        self.check_recording(status).is_ok()
    }
}

/// Outcome of one reducer cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub status: SystemStatus,
    pub events: Vec<CoordinatorEvent>,
    /// Health just became critical, or a recording appeared while critical.
    /// The camera must be stopped if it reports recording.
    pub stop_recording: bool,
}

/// Owned by the fan-in loop; the only writer of health.
pub struct Reducer {
    policy: HealthPolicy,
    substates: SubStates,
    health: SystemHealth,
    recording_reported: bool,
}

impl Reducer {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            substates: SubStates::default(),
            health: SystemHealth::Unknown,
            recording_reported: false,
        }
    }

    pub fn health(&self) -> SystemHealth {
        self.health
    }

    pub fn substates(&self) -> &SubStates {
        &self.substates
    }

    /// First cycle after initialization, from the default sub-states
    pub fn start(&mut self) -> Step {
        let mut events = Vec::new();
        let stop_recording = self.transition(&mut events);
        Step {
            status: self.policy.status(true, &self.substates),
            events,
            stop_recording,
        }
    }

    pub fn reduce(&mut self, source: MonitorKind, event: MonitorEvent) -> Step {
        let previous = self.substates.clone();
        let mut events = Vec::new();

        if let MonitorEvent::Fault(err) = &event {
            if event.source() == source && !previous.faulted.contains(&source) {
                events.push(CoordinatorEvent::MonitorFault {
                    source,
                    message: err.to_string(),
                });
            }
        }

        if let Err(rejected) = self.substates.apply(source, event) {
            warn!(
                monitor = %source,
                "Discarding event owned by the {} monitor",
                rejected.source()
            );
            return Step {
                status: self.policy.status(true, &self.substates),
                events: Vec::new(),
                stop_recording: false,
            };
        }

        self.derived_events(&previous, &mut events);
        let entered_critical = self.transition(&mut events);
        let recording_while_critical = self.health == SystemHealth::Critical
            && self.substates.camera.is_recording()
            && !previous.camera.is_recording();
        let stop_recording = entered_critical || recording_while_critical;

        Step {
            status: self.policy.status(true, &self.substates),
            events,
            stop_recording,
        }
    }

    /// The coordinator stopped the recording itself. Returns the event to
    /// publish; the camera catching up later is not reported again.
    pub fn record_forced_stop(&mut self) -> CoordinatorEvent {
        self.recording_reported = false;
        CoordinatorEvent::RecordingStateChanged {
            recording: false,
            forced: true,
        }
    }

    fn derived_events(&mut self, previous: &SubStates, events: &mut Vec<CoordinatorEvent>) {
        let current = &self.substates;

        if current.camera != previous.camera {
            if let Some(message) = current.camera.error() {
                events.push(CoordinatorEvent::CameraError(message.to_string()));
            }
        }

        let recording = current.camera.is_recording();
        if recording != self.recording_reported {
            self.recording_reported = recording;
            events.push(CoordinatorEvent::RecordingStateChanged {
                recording,
                forced: false,
            });
        }

        if current.memory.pressure >= MemoryPressure::Warning
            && current.memory.pressure != previous.memory.pressure
        {
            events.push(CoordinatorEvent::MemoryWarning {
                ratio: current.memory.usage_ratio,
                pressure: current.memory.pressure,
            });
        }

        let critical = self.policy.critical_battery;
        if HealthPolicy::battery_below(&current.battery, critical)
            && !HealthPolicy::battery_below(&previous.battery, critical)
        {
            if let Some(level) = current.battery.level {
                events.push(CoordinatorEvent::BatteryCritical { level });
            }
        }

        if current.thermal >= ThermalState::Serious && current.thermal != previous.thermal {
            events.push(CoordinatorEvent::ThermalWarning(current.thermal));
        }

        if current.permissions != previous.permissions {
            events.push(CoordinatorEvent::PermissionChanged(current.permissions.clone()));
        }
    }

    /// Recompute health and publish only on change. Returns true on the
    /// transition into `Critical`.
    fn transition(&mut self, events: &mut Vec<CoordinatorEvent>) -> bool {
        let health = self.policy.derive_health(&self.substates);
        if health == self.health {
            return false;
        }

        self.health = health;
        events.push(CoordinatorEvent::HealthChanged(health));
        health == SystemHealth::Critical
    }
}
