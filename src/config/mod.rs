// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Configuration module

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::monitors::{BatterySubState, Capability, ChargingState, ThermalState};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Log level
    pub log_level: String,

    /// Health coordinator configuration
    pub coordinator: CoordinatorConfig,

    /// Simulated collaborators for the headless driver
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "DualCam".to_string(),
            log_level: "info".to_string(),
            coordinator: CoordinatorConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.coordinator.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("dualcam"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Health coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bound of every monitor queue and every event subscriber queue
    pub queue_capacity: usize,

    /// Max wait for each monitor stop and for the camera stop on shutdown
    pub monitor_stop_grace_period_ms: u64,

    /// Max wait for start-recording and capture-photo calls
    pub command_timeout_ms: u64,

    /// Battery level below which the system is critical
    pub critical_battery_threshold: f64,

    /// Battery level below which the system is degraded
    pub warning_battery_threshold: f64,

    /// Memory usage ratio classified as warning pressure
    pub memory_warning_ratio: f64,

    /// Memory usage ratio classified as critical pressure
    pub memory_critical_ratio: f64,

    /// Thermal state at or above which optimization mitigates heat
    pub thermal_mitigation_threshold: ThermalState,

    /// Acknowledgement timeout of each optimization action
    pub optimization_timeout_ms: u64,

    /// Sampling period of polling monitors
    pub poll_interval_ms: u64,

    /// Capabilities that must be authorized before recording
    pub required_permissions: Vec<Capability>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            monitor_stop_grace_period_ms: 2000,
            command_timeout_ms: 5000,
            critical_battery_threshold: 0.1,
            warning_battery_threshold: 0.2,
            memory_warning_ratio: 0.80,
            memory_critical_ratio: 0.95,
            thermal_mitigation_threshold: ThermalState::Serious,
            optimization_timeout_ms: 3000,
            poll_interval_ms: 250,
            required_permissions: vec![Capability::Camera, Capability::Microphone],
        }
    }
}

impl CoordinatorConfig {
    pub fn monitor_stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.monitor_stop_grace_period_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn optimization_timeout(&self) -> Duration {
        Duration::from_millis(self.optimization_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings the coordinator cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be positive");
        }

        let ratios = [
            ("critical_battery_threshold", self.critical_battery_threshold),
            ("warning_battery_threshold", self.warning_battery_threshold),
            ("memory_warning_ratio", self.memory_warning_ratio),
            ("memory_critical_ratio", self.memory_critical_ratio),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within 0..=1, got {}", name, value);
            }
        }

        if self.warning_battery_threshold <= self.critical_battery_threshold {
            bail!(
                "warning_battery_threshold ({}) must be above critical_battery_threshold ({})",
                self.warning_battery_threshold,
                self.critical_battery_threshold
            );
        }
        if self.memory_warning_ratio >= self.memory_critical_ratio {
            bail!(
                "memory_warning_ratio ({}) must be below memory_critical_ratio ({})",
                self.memory_warning_ratio,
                self.memory_critical_ratio
            );
        }
        Ok(())
    }
}

/// Seeds for the simulated collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Initial battery level
    pub battery_level: f64,

    /// Battery level lost on every tick
    pub battery_drain_per_tick: f64,

    /// Initial memory usage ratio
    pub memory_ratio: f64,

    /// Initial thermal state
    pub thermal_state: ThermalState,

    /// Authorize every capability on request
    pub grant_permissions: bool,

    /// Tick interval in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            battery_level: 0.8,
            battery_drain_per_tick: 0.0,
            memory_ratio: 0.4,
            thermal_state: ThermalState::Nominal,
            grant_permissions: true,
            tick_interval_ms: 1000,
        }
    }
}

impl SimulationConfig {
    pub fn battery(&self) -> BatterySubState {
        let charging = if self.battery_drain_per_tick > 0.0 {
            ChargingState::Unplugged
        } else {
            ChargingState::Charging
        };
        BatterySubState::new(self.battery_level, charging)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
