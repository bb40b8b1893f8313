// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Coordinator event bus
//!
//! A registry of per-subscriber bounded queues. Every subscriber gets its
//! own drop-oldest queue, so a slow consumer loses its own stale events and
//! never holds back the publisher or other subscribers.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use super::optimizer::OptimizationReport;
use super::stream::{bounded, EventReceiver, EventSender, SendOutcome};
use super::SystemHealth;
use crate::error::InitializationError;
use crate::monitors::{MemoryPressure, MonitorKind, PermissionSubState, ThermalState};

/// Events published by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    // Lifecycle
    InitializationStarted,
    InitializationCompleted,
    InitializationFailed(InitializationError),
    ShutdownStarted,
    ShutdownCompleted,

    // Derived
    HealthChanged(SystemHealth),
    RecordingStateChanged { recording: bool, forced: bool },
    MemoryWarning { ratio: f64, pressure: MemoryPressure },
    BatteryCritical { level: f64 },
    ThermalWarning(ThermalState),
    PermissionChanged(PermissionSubState),
    CameraError(String),
    MonitorFault { source: MonitorKind, message: String },
    Overflow { source: MonitorKind, dropped: u64 },

    // Optimization
    OptimizationRequested,
    OptimizationCompleted(OptimizationReport),
}

/// Published event wrapper
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub event: CoordinatorEvent,
}

/// Broadcast registry for coordinator events
pub struct EventBus {
    subscribers: Mutex<Vec<EventSender<Envelope>>>,
    capacity: usize,
    event_counter: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
            event_counter: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber. It sees events published from now on.
    pub fn subscribe(&self) -> EventReceiver<Envelope> {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, pruning dropped ones.
    /// Returns the envelope id.
    pub fn publish(&self, event: CoordinatorEvent) -> u64 {
        let id = self.event_counter.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        trace!("Publishing event #{}: {:?}", id, envelope.event);

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| match subscriber.send(envelope.clone()) {
            SendOutcome::Queued => true,
            SendOutcome::DroppedOldest => {
                debug!("Subscriber lagging, dropped oldest event");
                true
            }
            SendOutcome::Closed => false,
        });
        id
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| !subscriber.is_closed());
        subscribers.len()
    }
}
