// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! DualCam - System Health Coordinator for a Dual-Camera Recorder
//!
//! Aggregates five independent device monitors into one system health
//! status and enforces the recording safety policy:
//! - Camera session, permission, memory, battery and thermal monitors
//! - Bounded drop-oldest queue per monitor; no source can starve another
//! - Most-restrictive-wins health derivation
//! - Forced recording stop when health turns critical while recording
//! - Single-flight initialization and ordered, bounded shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      HealthCoordinator                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────┐ ┌────────────┐ ┌────────┐ ┌─────────┐ ┌─────────┐│
//! │  │ Camera │ │ Permission │ │ Memory │ │ Battery │ │ Thermal ││
//! │  └────────┘ └────────────┘ └────────┘ └─────────┘ └─────────┘│
//! │       ↓           ↓            ↓          ↓           ↓      │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │        Fan-in loop → Reducer → SystemStatus            │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                             ↓                                │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                      Event Bus                         │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod monitors;

// Re-exports for convenience
pub use config::{Config, CoordinatorConfig, SimulationConfig};
pub use self::core::{CoordinatorEvent, Envelope, EventBus, HealthCoordinator, SystemHealth, SystemStatus};
pub use error::{CommandError, InitializationError, MonitorError, PreconditionError};
pub use monitors::{Collaborators, Monitor, MonitorEvent, MonitorKind};

/// DualCam version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// DualCam name
pub const NAME: &str = "DualCam";
