// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Interfaces of the external collaborators the coordinator consumes
//!
//! Implementations wrap the platform capture session and OS advisory
//! signals. Each advisor may expose a [`Notify`] that fires when its value
//! changes; polling monitors wake on it in addition to their timer.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{BatterySubState, CameraSubState, Capability, PermissionStatus, ThermalState};
use crate::error::CollaboratorError;

/// Camera control surface
#[async_trait]
pub trait CameraControl: Send + Sync {
    async fn start_recording(&self) -> Result<(), CollaboratorError>;

    async fn stop_recording(&self) -> Result<(), CollaboratorError>;

    async fn capture_photo(&self) -> Result<(), CollaboratorError>;

    fn current_state(&self) -> CameraSubState;

    fn change_notifier(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// Authorization status per capability
#[async_trait]
pub trait PermissionRegistry: Send + Sync {
    fn status_of(&self, capability: Capability) -> PermissionStatus;

    /// Prompt for every capability that is still undetermined
    async fn request_all(&self) -> BTreeMap<Capability, PermissionStatus>;

    fn change_notifier(&self) -> Option<Arc<Notify>> {
        None
    }
}

#[async_trait]
pub trait MemoryAdvisor: Send + Sync {
    /// Fraction of available memory currently in use, 0.0 - 1.0
    fn current_pressure(&self) -> Result<f64, CollaboratorError>;

    /// Ask the app to drop caches and other reclaimable memory
    async fn release_memory(&self) -> Result<(), CollaboratorError>;

    fn change_notifier(&self) -> Option<Arc<Notify>> {
        None
    }
}

#[async_trait]
pub trait BatteryAdvisor: Send + Sync {
    fn current_level(&self) -> Result<BatterySubState, CollaboratorError>;

    /// Switch capture to a battery-optimized mode
    async fn enable_power_saving(&self) -> Result<(), CollaboratorError>;

    fn change_notifier(&self) -> Option<Arc<Notify>> {
        None
    }
}

#[async_trait]
pub trait ThermalAdvisor: Send + Sync {
    fn current_state(&self) -> Result<ThermalState, CollaboratorError>;

    /// Reduce frame rate / resolution to shed heat
    async fn mitigate(&self) -> Result<(), CollaboratorError>;

    fn change_notifier(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// The full set of collaborators one coordinator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub camera: Arc<dyn CameraControl>,
    pub permissions: Arc<dyn PermissionRegistry>,
    pub memory: Arc<dyn MemoryAdvisor>,
    pub battery: Arc<dyn BatteryAdvisor>,
    pub thermal: Arc<dyn ThermalAdvisor>,
}
