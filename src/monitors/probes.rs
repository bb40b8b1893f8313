// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Probes adapting each collaborator to the polling monitor

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::info;

use super::{
    BatteryAdvisor, CameraControl, Capability, MemoryAdvisor, MemorySubState, MonitorEvent,
    MonitorKind, PermissionRegistry, PermissionStatus, PermissionSubState, Probe, ThermalAdvisor,
};
use crate::error::MonitorError;

pub struct CameraProbe {
    camera: Arc<dyn CameraControl>,
}

impl CameraProbe {
    pub fn new(camera: Arc<dyn CameraControl>) -> Self {
        Self { camera }
    }
}

#[async_trait]
impl Probe for CameraProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Camera
    }

    async fn sample(&self) -> Result<MonitorEvent, MonitorError> {
        Ok(MonitorEvent::Camera(self.camera.current_state()))
    }

    fn notifier(&self) -> Option<Arc<Notify>> {
        self.camera.change_notifier()
    }
}

/// Reads the tracked capabilities. On the first sample that finds an
/// undetermined capability, prompts once through `request_all`.
pub struct PermissionProbe {
    registry: Arc<dyn PermissionRegistry>,
    capabilities: Vec<Capability>,
    requested: AtomicBool,
}

impl PermissionProbe {
    pub fn new(registry: Arc<dyn PermissionRegistry>, capabilities: Vec<Capability>) -> Self {
        Self {
            registry,
            capabilities,
            requested: AtomicBool::new(false),
        }
    }

    fn read(&self) -> PermissionSubState {
        PermissionSubState::new(
            self.capabilities
                .iter()
                .map(|&capability| (capability, self.registry.status_of(capability)))
                .collect(),
        )
    }
}

#[async_trait]
impl Probe for PermissionProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Permission
    }

    async fn sample(&self) -> Result<MonitorEvent, MonitorError> {
        let mut permissions = self.read();

        let undetermined = permissions
            .statuses
            .values()
            .any(|status| *status == PermissionStatus::Undetermined);
        if undetermined && !self.requested.swap(true, Ordering::SeqCst) {
            info!("Requesting undetermined permissions");
            let granted = self.registry.request_all().await;
            for (capability, status) in granted {
                if self.capabilities.contains(&capability) {
                    permissions.statuses.insert(capability, status);
                }
            }
        }

        Ok(MonitorEvent::Permission(permissions))
    }

    fn notifier(&self) -> Option<Arc<Notify>> {
        self.registry.change_notifier()
    }
}

/// Classifies the advisor's usage ratio into a pressure level
pub struct MemoryProbe {
    advisor: Arc<dyn MemoryAdvisor>,
    warning_ratio: f64,
    critical_ratio: f64,
}

impl MemoryProbe {
    pub fn new(advisor: Arc<dyn MemoryAdvisor>, warning_ratio: f64, critical_ratio: f64) -> Self {
        Self {
            advisor,
            warning_ratio,
            critical_ratio,
        }
    }
}

#[async_trait]
impl Probe for MemoryProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Memory
    }

    async fn sample(&self) -> Result<MonitorEvent, MonitorError> {
        let ratio = self
            .advisor
            .current_pressure()
            .map_err(|e| MonitorError::fault(MonitorKind::Memory, e.to_string()))?;
        Ok(MonitorEvent::Memory(MemorySubState::from_ratio(
            ratio,
            self.warning_ratio,
            self.critical_ratio,
        )))
    }

    fn notifier(&self) -> Option<Arc<Notify>> {
        self.advisor.change_notifier()
    }
}

pub struct BatteryProbe {
    advisor: Arc<dyn BatteryAdvisor>,
}

impl BatteryProbe {
    pub fn new(advisor: Arc<dyn BatteryAdvisor>) -> Self {
        Self { advisor }
    }
}

#[async_trait]
impl Probe for BatteryProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Battery
    }

    async fn sample(&self) -> Result<MonitorEvent, MonitorError> {
        self.advisor
            .current_level()
            .map(MonitorEvent::Battery)
            .map_err(|e| MonitorError::fault(MonitorKind::Battery, e.to_string()))
    }

    fn notifier(&self) -> Option<Arc<Notify>> {
        self.advisor.change_notifier()
    }
}

pub struct ThermalProbe {
    advisor: Arc<dyn ThermalAdvisor>,
}

impl ThermalProbe {
    pub fn new(advisor: Arc<dyn ThermalAdvisor>) -> Self {
        Self { advisor }
    }
}

#[async_trait]
impl Probe for ThermalProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Thermal
    }

    async fn sample(&self) -> Result<MonitorEvent, MonitorError> {
        self.advisor
            .current_state()
            .map(MonitorEvent::Thermal)
            .map_err(|e| MonitorError::fault(MonitorKind::Thermal, e.to_string()))
    }

    fn notifier(&self) -> Option<Arc<Notify>> {
        self.advisor.change_notifier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::{MemoryPressure, SimulatedMemory, SimulatedPermissions};

    #[tokio::test]
    async fn test_permission_probe_requests_once() {
        let registry = Arc::new(SimulatedPermissions::new());
        registry.grant_on_request(Capability::Camera, PermissionStatus::Authorized);
        registry.grant_on_request(Capability::Microphone, PermissionStatus::Denied);
        let probe = PermissionProbe::new(
            Arc::clone(&registry) as Arc<dyn PermissionRegistry>,
            vec![Capability::Camera, Capability::Microphone],
        );

        let first = probe.sample().await.unwrap();
        let expected = PermissionSubState::default()
            .with(Capability::Camera, PermissionStatus::Authorized)
            .with(Capability::Microphone, PermissionStatus::Denied);
        assert_eq!(first, MonitorEvent::Permission(expected));

        probe.sample().await.unwrap();
        assert_eq!(registry.request_calls(), 1);
    }

    #[tokio::test]
    async fn test_memory_probe_classifies_ratio() {
        let memory = Arc::new(SimulatedMemory::new(0.85));
        let probe = MemoryProbe::new(memory, 0.8, 0.95);
        match probe.sample().await.unwrap() {
            MonitorEvent::Memory(state) => {
                assert_eq!(state.pressure, MemoryPressure::Warning);
                assert!((state.usage_ratio - 0.85).abs() < f64::EPSILON);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
