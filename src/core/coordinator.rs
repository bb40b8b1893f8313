// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! System health coordinator
//!
//! Fans in the five monitor queues, keeps the aggregated [`SystemStatus`],
//! enforces the recording safety policy and republishes everything on its
//! own event bus.
//!
//! The status snapshot has a single writer at any time: the lifecycle path
//! while no fan-in loop exists, the fan-in loop while it runs. Snapshots are
//! published with an atomic pointer swap; readers load the last published
//! `Arc<SystemStatus>` without taking a lock and never wait on a monitor.
//!
//! Every camera stop goes through one async lock and first asks the camera
//! collaborator whether it is recording, so the forced stop, the stop
//! command and shutdown never issue overlapping stops.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::optimizer::optimize;
use super::reducer::{HealthPolicy, Reducer};
use super::stream::{bounded, Delivery, EventReceiver};
use super::{CoordinatorEvent, Envelope, EventBus, SystemHealth, SystemStatus};
use crate::config::CoordinatorConfig;
use crate::error::{
    CollaboratorError, CommandError, InitializationError, MonitorError, OverflowError,
};
use crate::monitors::{
    BatteryProbe, CameraProbe, CameraSubState, Collaborators, MemoryProbe, Monitor, MonitorEvent,
    MonitorKind, PermissionProbe, PollingMonitor, ThermalProbe,
};

/// One monitor per source
#[derive(Clone)]
pub struct MonitorSet {
    pub camera: Arc<dyn Monitor>,
    pub permission: Arc<dyn Monitor>,
    pub memory: Arc<dyn Monitor>,
    pub battery: Arc<dyn Monitor>,
    pub thermal: Arc<dyn Monitor>,
}

impl MonitorSet {
    /// Polling monitors over each collaborator
    pub fn polling(collaborators: &Collaborators, config: &CoordinatorConfig) -> Self {
        let period = config.poll_interval();
        Self {
            camera: Arc::new(PollingMonitor::new(
                CameraProbe::new(Arc::clone(&collaborators.camera)),
                period,
            )),
            permission: Arc::new(PollingMonitor::new(
                PermissionProbe::new(
                    Arc::clone(&collaborators.permissions),
                    config.required_permissions.clone(),
                ),
                period,
            )),
            memory: Arc::new(PollingMonitor::new(
                MemoryProbe::new(
                    Arc::clone(&collaborators.memory),
                    config.memory_warning_ratio,
                    config.memory_critical_ratio,
                ),
                period,
            )),
            battery: Arc::new(PollingMonitor::new(
                BatteryProbe::new(Arc::clone(&collaborators.battery)),
                period,
            )),
            thermal: Arc::new(PollingMonitor::new(
                ThermalProbe::new(Arc::clone(&collaborators.thermal)),
                period,
            )),
        }
    }

    pub fn get(&self, kind: MonitorKind) -> &Arc<dyn Monitor> {
        match kind {
            MonitorKind::Camera => &self.camera,
            MonitorKind::Permission => &self.permission,
            MonitorKind::Memory => &self.memory,
            MonitorKind::Battery => &self.battery,
            MonitorKind::Thermal => &self.thermal,
        }
    }
}

type InitFlight = Shared<BoxFuture<'static, Result<(), InitializationError>>>;

struct Running {
    fan_in_shutdown: broadcast::Sender<()>,
    fan_in: JoinHandle<()>,
}

struct Inner {
    config: CoordinatorConfig,
    policy: HealthPolicy,
    collaborators: Collaborators,
    monitors: MonitorSet,
    status: ArcSwap<SystemStatus>,
    bus: EventBus,
    /// Serializes initialization and shutdown
    lifecycle: tokio::sync::Mutex<Option<Running>>,
    /// Serializes every camera stop
    camera_stop: tokio::sync::Mutex<()>,
    /// Set once shutdown has started; the fan-in loop leaves the recording
    /// to the shutdown path from then on
    shutting_down: AtomicBool,
    init_flight: Mutex<Option<InitFlight>>,
    optimization_cancel: Mutex<Option<broadcast::Sender<()>>>,
}

/// Aggregates monitor readings into one health status and enforces the
/// recording safety policy. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct HealthCoordinator {
    inner: Arc<Inner>,
}

impl HealthCoordinator {
    pub fn new(config: CoordinatorConfig, collaborators: Collaborators, monitors: MonitorSet) -> Self {
        let policy = HealthPolicy::from_config(&config);
        let bus = EventBus::new(config.queue_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                collaborators,
                monitors,
                status: ArcSwap::from_pointee(SystemStatus::default()),
                bus,
                lifecycle: tokio::sync::Mutex::new(None),
                camera_stop: tokio::sync::Mutex::new(()),
                shutting_down: AtomicBool::new(false),
                init_flight: Mutex::new(None),
                optimization_cancel: Mutex::new(None),
            }),
        }
    }

    /// Coordinator whose monitors poll the given collaborators
    pub fn with_polling_monitors(config: CoordinatorConfig, collaborators: Collaborators) -> Self {
        let monitors = MonitorSet::polling(&collaborators, &config);
        Self::new(config, collaborators, monitors)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.inner.policy
    }

    /// Subscribe to coordinator events published from now on
    pub fn subscribe(&self) -> EventReceiver<Envelope> {
        self.inner.bus.subscribe()
    }

    /// Last published snapshot. Never waits on a monitor.
    pub fn get_system_status(&self) -> Arc<SystemStatus> {
        self.inner.status.load_full()
    }

    pub fn can_record(&self) -> bool {
        self.inner.policy.can_record(&self.get_system_status())
    }

    /// Start every monitor and the fan-in loop.
    ///
    /// Concurrent calls share one attempt and observe the same outcome.
    /// Returns immediately when already initialized.
    pub async fn initialize_system(&self) -> Result<(), InitializationError> {
        let flight = {
            let mut slot = self.inner.init_flight.lock();
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    if self.inner.status.load().is_initialized {
                        return Ok(());
                    }
                    let inner = Arc::clone(&self.inner);
                    let flight = async move {
                        let result = Arc::clone(&inner).initialize().await;
                        inner.init_flight.lock().take();
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Stop recording, stop monitors, stop the fan-in loop, then mark the
    /// system uninitialized. A no-op when not initialized.
    pub async fn shutdown_system(&self) {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;
        let Some(running) = lifecycle.take() else {
            debug!("Shutdown requested while not initialized");
            return;
        };

        info!("Shutting down system health coordinator...");
        inner.shutting_down.store(true, Ordering::SeqCst);
        inner.bus.publish(CoordinatorEvent::ShutdownStarted);

        // Shutdown wins over any optimization in flight
        let cancel = inner.optimization_cancel.lock().take();
        if let Some(cancel) = cancel {
            let _ = cancel.send(());
        }

        // 1. In-progress recording
        match inner.stop_camera_if_recording().await {
            Ok(true) => info!("Stopped in-progress recording"),
            Ok(false) => {}
            Err(e) => warn!("Could not stop recording during shutdown: {}", e),
        }

        // 2. Monitors
        inner.stop_monitors(&MonitorKind::ALL).await;

        // 3. Fan-in loop
        let _ = running.fan_in_shutdown.send(());
        let abort = running.fan_in.abort_handle();
        match timeout(inner.config.monitor_stop_grace_period(), running.fan_in).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Fan-in loop terminated abnormally: {}", e),
            Err(_) => {
                warn!("Fan-in loop did not exit within the grace period, aborting");
                abort.abort();
            }
        }

        // 4. Freeze the last snapshot as uninitialized
        let last = inner.status.load_full();
        inner.publish_status(SystemStatus {
            is_initialized: false,
            system_health: SystemHealth::Unknown,
            ..(*last).clone()
        });
        inner.bus.publish(CoordinatorEvent::ShutdownCompleted);
        info!("System health coordinator shut down");
    }

    /// Fire-and-forget cleanup: memory release, battery saver, and thermal
    /// mitigation when the thermal state calls for it. Completion is
    /// reported through `OptimizationCompleted`.
    pub fn request_system_optimization(&self) -> Result<(), CommandError> {
        let inner = &self.inner;
        let cancel = inner
            .optimization_cancel
            .lock()
            .as_ref()
            .map(broadcast::Sender::subscribe);
        let Some(mut cancel) = cancel else {
            return Err(CommandError::NotInitialized);
        };

        let status = self.get_system_status();
        inner.bus.publish(CoordinatorEvent::OptimizationRequested);

        let collaborators = &inner.collaborators;
        let thermal = (status.thermal >= inner.config.thermal_mitigation_threshold)
            .then(|| Arc::clone(&collaborators.thermal));
        info!(
            thermal_mitigation = thermal.is_some(),
            "System optimization requested"
        );

        let work = optimize(
            Arc::clone(&collaborators.memory),
            Arc::clone(&collaborators.battery),
            thermal,
            inner.config.optimization_timeout(),
        );
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.recv() => {
                    info!("Optimization cancelled by shutdown");
                }
                report = work => {
                    if report.is_partial() {
                        warn!(
                            timed_out = ?report.timed_out,
                            failed = ?report.failed,
                            "Optimization completed partially"
                        );
                    } else {
                        info!("Optimization completed");
                    }
                    inner.bus.publish(CoordinatorEvent::OptimizationCompleted(report));
                }
            }
        });

        Ok(())
    }

    /// Start recording if the recording gate allows it. Already recording
    /// is not an error: the current camera state is returned.
    pub async fn start_recording(&self) -> Result<CameraSubState, CommandError> {
        let status = self.get_system_status();
        if status.is_initialized && status.camera.is_recording() {
            return Ok(status.camera.clone());
        }
        self.inner.policy.check_recording(&status)?;

        let camera = &self.inner.collaborators.camera;
        let current = camera.current_state();
        if current.is_recording() {
            return Ok(current);
        }

        info!("Starting recording");
        self.inner
            .bounded_command("start_recording", camera.start_recording())
            .await?;
        Ok(camera.current_state())
    }

    /// Stopping is never gated on health; it only needs a running system.
    pub async fn stop_recording(&self) -> Result<CameraSubState, CommandError> {
        if !self.get_system_status().is_initialized {
            return Err(CommandError::NotInitialized);
        }

        if self.inner.stop_camera_if_recording().await? {
            info!("Recording stopped");
        }
        Ok(self.inner.collaborators.camera.current_state())
    }

    pub async fn capture_photo(&self) -> Result<(), CommandError> {
        let status = self.get_system_status();
        self.inner.policy.check_recording(&status)?;

        let camera = &self.inner.collaborators.camera;
        self.inner
            .bounded_command("capture_photo", camera.capture_photo())
            .await
    }
}

impl Inner {
    async fn initialize(self: Arc<Self>) -> Result<(), InitializationError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Ok(());
        }

        info!("Initializing system health coordinator...");
        self.bus.publish(CoordinatorEvent::InitializationStarted);

        let capacity = self.config.queue_capacity;
        let mut sinks = Vec::with_capacity(MonitorKind::ALL.len());
        let mut open = |kind: MonitorKind| {
            let (tx, rx) = bounded(capacity);
            sinks.push((kind, tx));
            rx
        };
        let queues = MonitorQueues {
            camera: open(MonitorKind::Camera),
            permission: open(MonitorKind::Permission),
            memory: open(MonitorKind::Memory),
            battery: open(MonitorKind::Battery),
            thermal: open(MonitorKind::Thermal),
        };

        let starts = sinks.into_iter().map(|(kind, sink)| {
            let monitor = Arc::clone(self.monitors.get(kind));
            async move { (kind, monitor.start(sink).await) }
        });

        let mut started = Vec::new();
        let mut failures = Vec::new();
        for (kind, result) in join_all(starts).await {
            match result {
                Ok(()) => started.push(kind),
                Err(e) => {
                    error!(monitor = %kind, "Monitor failed to start: {}", e);
                    failures.push(e);
                }
            }
        }

        if !failures.is_empty() {
            warn!("Rolling back {} started monitor(s)", started.len());
            self.stop_monitors(&started).await;
            let err = InitializationError { failures };
            self.bus
                .publish(CoordinatorEvent::InitializationFailed(err.clone()));
            return Err(err);
        }

        let mut reducer = Reducer::new(self.policy.clone());
        let first = reducer.start();
        self.publish_status(first.status);

        let (cancel, _) = broadcast::channel(1);
        *self.optimization_cancel.lock() = Some(cancel);
        self.shutting_down.store(false, Ordering::SeqCst);

        self.bus.publish(CoordinatorEvent::InitializationCompleted);
        for event in first.events {
            self.bus.publish(event);
        }

        let (fan_in_shutdown, shutdown) = broadcast::channel(1);
        let fan_in = FanIn {
            inner: Arc::clone(&self),
            reducer,
            queues,
            shutdown,
        };
        *lifecycle = Some(Running {
            fan_in_shutdown,
            fan_in: tokio::spawn(fan_in.run()),
        });

        info!("System health coordinator initialized");
        Ok(())
    }

    fn publish_status(&self, status: SystemStatus) {
        self.status.store(Arc::new(status));
    }

    /// Stop the given monitors concurrently, each bounded by the grace period
    async fn stop_monitors(&self, kinds: &[MonitorKind]) {
        let grace = self.config.monitor_stop_grace_period();
        let stops = kinds.iter().map(|&kind| {
            let monitor = Arc::clone(self.monitors.get(kind));
            async move { (kind, timeout(grace, monitor.stop()).await) }
        });

        for (kind, result) in join_all(stops).await {
            match result {
                Ok(Ok(())) => debug!(monitor = %kind, "Monitor stopped"),
                Ok(Err(e)) => warn!(monitor = %kind, "{}", e),
                Err(_) => {
                    let err = MonitorError::StopTimeout {
                        kind,
                        grace_ms: self.config.monitor_stop_grace_period_ms,
                    };
                    warn!(monitor = %kind, "{}, continuing", err);
                }
            }
        }
    }

    /// Stop the camera if it reports recording. Returns whether a stop was
    /// issued.
    async fn stop_camera_if_recording(&self) -> Result<bool, CommandError> {
        let _guard = self.camera_stop.lock().await;
        let camera = &self.collaborators.camera;
        if !camera.current_state().is_recording() {
            return Ok(false);
        }

        let grace = self.config.monitor_stop_grace_period();
        match timeout(grace, camera.stop_recording()).await {
            Ok(result) => result.map(|()| true).map_err(CommandError::from),
            Err(_) => Err(CommandError::Timeout {
                operation: "stop_recording".to_string(),
                timeout_ms: self.config.monitor_stop_grace_period_ms,
            }),
        }
    }

    async fn bounded_command<F>(&self, operation: &str, command: F) -> Result<(), CommandError>
    where
        F: Future<Output = Result<(), CollaboratorError>>,
    {
        match timeout(self.config.command_timeout(), command).await {
            Ok(result) => result.map_err(CommandError::from),
            Err(_) => Err(CommandError::Timeout {
                operation: operation.to_string(),
                timeout_ms: self.config.command_timeout_ms,
            }),
        }
    }
}

struct MonitorQueues {
    camera: EventReceiver<MonitorEvent>,
    permission: EventReceiver<MonitorEvent>,
    memory: EventReceiver<MonitorEvent>,
    battery: EventReceiver<MonitorEvent>,
    thermal: EventReceiver<MonitorEvent>,
}

/// The single task that owns the reducer while the system runs
struct FanIn {
    inner: Arc<Inner>,
    reducer: Reducer,
    queues: MonitorQueues,
    shutdown: broadcast::Receiver<()>,
}

impl FanIn {
    async fn run(mut self) {
        debug!("Fan-in loop started");
        let mut closed = [false; 5];

        loop {
            // Each queue is polled on its own; a quiet or flooded source
            // never holds back the others.
            let (kind, delivery) = tokio::select! {
                _ = self.shutdown.recv() => break,
                d = self.queues.camera.recv(), if !closed[0] => (MonitorKind::Camera, d),
                d = self.queues.permission.recv(), if !closed[1] => (MonitorKind::Permission, d),
                d = self.queues.memory.recv(), if !closed[2] => (MonitorKind::Memory, d),
                d = self.queues.battery.recv(), if !closed[3] => (MonitorKind::Battery, d),
                d = self.queues.thermal.recv(), if !closed[4] => (MonitorKind::Thermal, d),
            };

            match delivery {
                Some(Delivery::Event(event)) => self.process(kind, event).await,
                Some(Delivery::Overflow { dropped }) => self.overflow(kind, dropped),
                None => {
                    debug!(monitor = %kind, "Monitor stream closed");
                    closed[kind.index()] = true;
                }
            }
        }

        debug!("Fan-in loop exited");
    }

    async fn process(&mut self, kind: MonitorKind, event: MonitorEvent) {
        let step = self.reducer.reduce(kind, event);
        self.inner.publish_status(step.status);
        for event in step.events {
            if let CoordinatorEvent::HealthChanged(health) = &event {
                info!("System health changed to {}", health);
            }
            self.inner.bus.publish(event);
        }

        if step.stop_recording {
            self.force_stop_recording().await;
        }
    }

    fn overflow(&self, kind: MonitorKind, dropped: u64) {
        let err = OverflowError { monitor: kind, dropped };
        warn!(monitor = %kind, "{}", err);
        self.inner
            .bus
            .publish(CoordinatorEvent::Overflow { source: kind, dropped });
    }

    async fn force_stop_recording(&mut self) {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            debug!("Shutdown in progress, leaving the recording to it");
            return;
        }
        match self.inner.stop_camera_if_recording().await {
            Ok(true) => {
                warn!("System health is critical while recording, recording stopped");
                let event = self.reducer.record_forced_stop();
                self.inner.bus.publish(event);
            }
            Ok(false) => debug!("System health is critical, camera not recording"),
            Err(e) => error!("Forced recording stop failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::{Precondition, PreconditionError};
    use crate::monitors::{
        BatterySubState, CameraControl, Capability, MemorySubState, PermissionStatus,
        PermissionSubState, ScriptedMonitor, SimulatedBattery, SimulatedCamera, SimulatedMemory, SimulatedPermissions,
        SimulatedThermal, ThermalState,
    };
    use crate::core::OptimizationAction;

    struct Harness {
        coordinator: HealthCoordinator,
        camera: Arc<SimulatedCamera>,
        memory: Arc<SimulatedMemory>,
        battery: Arc<SimulatedBattery>,
        monitors: Vec<Arc<ScriptedMonitor>>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(test_config())
        }

        fn with_config(config: CoordinatorConfig) -> Self {
            let camera = Arc::new(SimulatedCamera::new());
            let memory = Arc::new(SimulatedMemory::new(0.4));
            let battery = Arc::new(SimulatedBattery::new(BatterySubState::unplugged(0.8)));
            let collaborators = Collaborators {
                camera: camera.clone(),
                permissions: Arc::new(SimulatedPermissions::authorized()),
                memory: memory.clone(),
                battery: battery.clone(),
                thermal: Arc::new(SimulatedThermal::new(ThermalState::Nominal)),
            };

            let monitors: Vec<Arc<ScriptedMonitor>> = MonitorKind::ALL
                .iter()
                .map(|&kind| Arc::new(ScriptedMonitor::new(kind)))
                .collect();
            let set = MonitorSet {
                camera: monitors[0].clone(),
                permission: monitors[1].clone(),
                memory: monitors[2].clone(),
                battery: monitors[3].clone(),
                thermal: monitors[4].clone(),
            };

            Self {
                coordinator: HealthCoordinator::new(config, collaborators, set),
                camera,
                memory,
                battery,
                monitors,
            }
        }

        fn monitor(&self, kind: MonitorKind) -> &ScriptedMonitor {
            &self.monitors[kind.index()]
        }

        fn emit(&self, event: MonitorEvent) {
            self.monitor(event.source()).emit(event);
        }

        fn emit_nominal(&self) {
            self.emit(MonitorEvent::Camera(CameraSubState::Ready));
            self.emit(MonitorEvent::Permission(
                PermissionSubState::default()
                    .with(Capability::Camera, PermissionStatus::Authorized)
                    .with(Capability::Microphone, PermissionStatus::Authorized),
            ));
            self.emit(MonitorEvent::Memory(MemorySubState::from_ratio(0.4, 0.8, 0.95)));
            self.emit(MonitorEvent::Battery(BatterySubState::unplugged(0.8)));
            self.emit(MonitorEvent::Thermal(ThermalState::Nominal));
        }

        async fn start_nominal(&self) {
            self.coordinator.initialize_system().await.unwrap();
            self.emit_nominal();
            let coordinator = self.coordinator.clone();
            wait_until(move || coordinator.can_record()).await;
        }
    }

    fn test_config() -> CoordinatorConfig {
        CoordinatorConfig {
            queue_capacity: 8,
            monitor_stop_grace_period_ms: 100,
            command_timeout_ms: 200,
            optimization_timeout_ms: 100,
            poll_interval_ms: 5,
            ..CoordinatorConfig::default()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn drain(rx: &mut EventReceiver<Envelope>) -> Vec<CoordinatorEvent> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|delivery| match delivery {
                Delivery::Event(envelope) => Some(envelope.event),
                Delivery::Overflow { .. } => None,
            })
            .collect()
    }

    fn count(events: &[CoordinatorEvent], wanted: &CoordinatorEvent) -> usize {
        events.iter().filter(|event| *event == wanted).count()
    }

    #[tokio::test]
    async fn test_nominal_system_is_healthy() {
        let h = Harness::new();
        let mut rx = h.coordinator.subscribe();
        h.start_nominal().await;

        let status = h.coordinator.get_system_status();
        assert!(status.is_initialized);
        assert_eq!(status.system_health, SystemHealth::Healthy);
        assert_eq!(status.battery.level, Some(0.8));

        let events = drain(&mut rx);
        assert_eq!(events[0], CoordinatorEvent::InitializationStarted);
        assert_eq!(events[1], CoordinatorEvent::InitializationCompleted);
        assert_eq!(events[2], CoordinatorEvent::HealthChanged(SystemHealth::Healthy));
    }

    #[tokio::test]
    async fn test_low_battery_forces_single_stop() {
        let h = Harness::new();
        h.start_nominal().await;
        h.camera.set_state(CameraSubState::Recording);
        h.emit(MonitorEvent::Camera(CameraSubState::Recording));
        let coordinator = h.coordinator.clone();
        wait_until(move || coordinator.get_system_status().camera.is_recording()).await;

        let mut rx = h.coordinator.subscribe();
        h.emit(MonitorEvent::Battery(BatterySubState::unplugged(0.08)));
        let camera = h.camera.clone();
        wait_until(move || camera.stop_calls() == 1).await;

        for level in [0.07, 0.06, 0.05] {
            h.emit(MonitorEvent::Battery(BatterySubState::unplugged(level)));
        }
        let coordinator = h.coordinator.clone();
        wait_until(move || coordinator.get_system_status().battery.level == Some(0.05)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(h.camera.stop_calls(), 1);
        assert_eq!(h.coordinator.get_system_status().system_health, SystemHealth::Critical);
        let events = drain(&mut rx);
        assert_eq!(count(&events, &CoordinatorEvent::HealthChanged(SystemHealth::Critical)), 1);
        assert_eq!(
            count(
                &events,
                &CoordinatorEvent::RecordingStateChanged { recording: false, forced: true }
            ),
            1
        );
        assert_eq!(count(&events, &CoordinatorEvent::BatteryCritical { level: 0.08 }), 1);
    }

    #[tokio::test]
    async fn test_memory_warning_keeps_recording_allowed() {
        let h = Harness::new();
        h.start_nominal().await;
        h.emit(MonitorEvent::Battery(BatterySubState::unplugged(0.5)));
        h.emit(MonitorEvent::Memory(MemorySubState::from_ratio(0.85, 0.8, 0.95)));

        let coordinator = h.coordinator.clone();
        wait_until(move || coordinator.get_system_status().system_health == SystemHealth::Warning).await;
        assert!(h.coordinator.can_record());
    }

    #[tokio::test]
    async fn test_camera_error_forwarded_verbatim() {
        let h = Harness::new();
        h.start_nominal().await;
        let mut rx = h.coordinator.subscribe();

        h.emit(MonitorEvent::Camera(CameraSubState::Error("format unsupported".into())));
        let coordinator = h.coordinator.clone();
        wait_until(move || coordinator.get_system_status().camera.error().is_some()).await;

        assert_eq!(
            drain(&mut rx),
            vec![CoordinatorEvent::CameraError("format unsupported".into())]
        );
        assert_eq!(h.coordinator.get_system_status().system_health, SystemHealth::Healthy);
    }

    #[tokio::test]
    async fn test_thermal_critical_stops_recording() {
        let h = Harness::new();
        h.start_nominal().await;
        h.emit(MonitorEvent::Camera(CameraSubState::Recording));
        h.camera.set_state(CameraSubState::Recording);
        let coordinator = h.coordinator.clone();
        wait_until(move || coordinator.get_system_status().camera.is_recording()).await;

        h.emit(MonitorEvent::Thermal(ThermalState::Critical));

        let camera = h.camera.clone();
        wait_until(move || camera.stop_calls() == 1).await;
        assert_eq!(h.coordinator.get_system_status().system_health, SystemHealth::Critical);
        assert!(!h.coordinator.can_record());
    }

    #[tokio::test]
    async fn test_critical_edge_stops_recording_before_camera_reports() {
        let h = Harness::new();
        h.start_nominal().await;
        let mut rx = h.coordinator.subscribe();

        // The camera monitor has not reported the recording yet
        h.coordinator.start_recording().await.unwrap();
        assert!(!h.coordinator.get_system_status().camera.is_recording());

        h.emit(MonitorEvent::Battery(BatterySubState::unplugged(0.05)));
        let camera = h.camera.clone();
        wait_until(move || camera.stop_calls() == 1).await;
        assert_eq!(h.coordinator.get_system_status().system_health, SystemHealth::Critical);

        // The late report of the already stopped recording stops nothing
        h.emit(MonitorEvent::Camera(CameraSubState::Recording));
        let coordinator = h.coordinator.clone();
        wait_until(move || coordinator.get_system_status().camera.is_recording()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(h.camera.stop_calls(), 1);
        assert!(!h.camera.current_state().is_recording());
        let events = drain(&mut rx);
        assert_eq!(
            count(
                &events,
                &CoordinatorEvent::RecordingStateChanged { recording: false, forced: true }
            ),
            1
        );
    }

    #[tokio::test]
    async fn test_recording_started_while_critical_is_stopped() {
        let h = Harness::new();
        h.start_nominal().await;
        h.emit(MonitorEvent::Thermal(ThermalState::Critical));
        let coordinator = h.coordinator.clone();
        wait_until(move || coordinator.get_system_status().system_health == SystemHealth::Critical)
            .await;
        assert_eq!(h.camera.stop_calls(), 0);

        h.camera.set_state(CameraSubState::Recording);
        h.emit(MonitorEvent::Camera(CameraSubState::Recording));

        let camera = h.camera.clone();
        wait_until(move || camera.stop_calls() == 1).await;
        let camera = h.camera.clone();
        wait_until(move || !camera.current_state().is_recording()).await;
    }

    #[tokio::test]
    async fn test_forced_stop_yields_to_shutdown() {
        let h = Harness::new();
        h.start_nominal().await;
        h.camera.set_state(CameraSubState::Recording);
        h.camera.set_latency(Some(Duration::from_millis(50)));

        h.emit(MonitorEvent::Battery(BatterySubState::unplugged(0.05)));
        let camera = h.camera.clone();
        wait_until(move || camera.stop_calls() == 1).await;
        h.coordinator.shutdown_system().await;

        assert_eq!(h.camera.stop_calls(), 1);
        assert!(!h.camera.current_state().is_recording());
        assert!(!h.coordinator.get_system_status().is_initialized);
    }

    #[tokio::test]
    async fn test_published_snapshot_is_immutable() {
        let h = Harness::new();
        h.start_nominal().await;
        let before = h.coordinator.get_system_status();

        h.emit(MonitorEvent::Battery(BatterySubState::unplugged(0.5)));
        let coordinator = h.coordinator.clone();
        wait_until(move || coordinator.get_system_status().battery.level == Some(0.5)).await;

        assert_eq!(before.battery.level, Some(0.8));
        assert!(!Arc::ptr_eq(&before, &h.coordinator.get_system_status()));
    }

    #[tokio::test]
    async fn test_shutdown_when_not_initialized_is_silent() {
        let h = Harness::new();
        let mut rx = h.coordinator.subscribe();
        h.coordinator.shutdown_system().await;
        assert!(drain(&mut rx).is_empty());
        assert!(h.monitors.iter().all(|m| m.stop_calls() == 0));
    }

    #[tokio::test]
    async fn test_concurrent_initialization_is_single_flight() {
        let h = Harness::new();
        for monitor in &h.monitors {
            monitor.set_start_delay(Some(Duration::from_millis(20)));
        }
        let mut rx = h.coordinator.subscribe();

        let results = join_all((0..8).map(|_| h.coordinator.initialize_system())).await;

        assert!(results.iter().all(Result::is_ok));
        assert!(h.monitors.iter().all(|m| m.start_calls() == 1));
        let events = drain(&mut rx);
        assert_eq!(count(&events, &CoordinatorEvent::InitializationStarted), 1);
        assert_eq!(count(&events, &CoordinatorEvent::InitializationCompleted), 1);

        // Initialized: a further call is a silent no-op
        h.coordinator.initialize_system().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back_for_every_caller() {
        let h = Harness::new();
        for monitor in &h.monitors {
            monitor.set_start_delay(Some(Duration::from_millis(20)));
        }
        h.monitor(MonitorKind::Battery).fail_start("battery service missing");
        let mut rx = h.coordinator.subscribe();

        let results = join_all((0..4).map(|_| h.coordinator.initialize_system())).await;

        let first = results[0].clone().unwrap_err();
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.failures[0].kind(), MonitorKind::Battery);
        assert!(results.iter().all(|r| r.as_ref().err() == Some(&first)));

        for monitor in &h.monitors {
            assert!(!monitor.is_running());
            let expected_stops = if monitor.kind() == MonitorKind::Battery { 0 } else { 1 };
            assert_eq!(monitor.stop_calls(), expected_stops);
        }
        assert!(!h.coordinator.get_system_status().is_initialized);

        let events = drain(&mut rx);
        assert_eq!(count(&events, &CoordinatorEvent::InitializationStarted), 1);
        assert_eq!(
            count(&events, &CoordinatorEvent::InitializationFailed(first.clone())),
            1
        );

        // Clean state: a later attempt can succeed
        h.monitor(MonitorKind::Battery).clear_start_failure();
        h.coordinator.initialize_system().await.unwrap();
        assert!(h.coordinator.get_system_status().is_initialized);
    }

    #[tokio::test]
    async fn test_shutdown_is_ordered_and_idempotent() {
        let h = Harness::new();
        h.start_nominal().await;
        h.camera.set_state(CameraSubState::Recording);
        let mut rx = h.coordinator.subscribe();

        let log = Arc::new(Mutex::new(Vec::new()));
        let camera_log = log.clone();
        h.camera.on_stop(move || camera_log.lock().push("camera".to_string()));
        for monitor in &h.monitors {
            let log = log.clone();
            let kind = monitor.kind();
            let coordinator = h.coordinator.clone();
            monitor.on_stop(move || {
                let initialized = coordinator.get_system_status().is_initialized;
                log.lock().push(format!("{}:{}", kind, initialized));
            });
        }

        h.coordinator.shutdown_system().await;
        h.coordinator.shutdown_system().await;

        assert_eq!(h.camera.stop_calls(), 1);
        assert!(h.monitors.iter().all(|m| m.stop_calls() == 1 && !m.is_running()));

        // Recording first, then monitors while still initialized
        let log = log.lock().clone();
        assert_eq!(log.len(), 1 + MonitorKind::ALL.len());
        assert_eq!(log[0], "camera");
        assert!(log[1..].iter().all(|entry| entry.ends_with(":true")));

        let status = h.coordinator.get_system_status();
        assert!(!status.is_initialized);
        assert_eq!(status.system_health, SystemHealth::Unknown);

        let events = drain(&mut rx);
        assert_eq!(events.first(), Some(&CoordinatorEvent::ShutdownStarted));
        assert_eq!(events.last(), Some(&CoordinatorEvent::ShutdownCompleted));
        assert_eq!(count(&events, &CoordinatorEvent::ShutdownCompleted), 1);
    }

    #[tokio::test]
    async fn test_stuck_monitor_does_not_block_shutdown() {
        let h = Harness::new();
        h.start_nominal().await;
        h.monitor(MonitorKind::Thermal).hang_on_stop(true);
        let mut rx = h.coordinator.subscribe();

        timeout(Duration::from_secs(2), h.coordinator.shutdown_system())
            .await
            .expect("shutdown blocked on a stuck monitor");

        assert!(drain(&mut rx).contains(&CoordinatorEvent::ShutdownCompleted));
        assert!(!h.coordinator.get_system_status().is_initialized);
    }

    #[tokio::test]
    async fn test_monitor_fault_is_isolated() {
        let h = Harness::new();
        h.start_nominal().await;

        h.emit(MonitorEvent::Fault(MonitorError::fault(MonitorKind::Memory, "vm stats unavailable")));
        h.emit(MonitorEvent::Battery(BatterySubState::unplugged(0.6)));
        h.emit(MonitorEvent::Thermal(ThermalState::Fair));

        let coordinator = h.coordinator.clone();
        wait_until(move || {
            let status = coordinator.get_system_status();
            status.thermal == ThermalState::Fair && status.battery.level == Some(0.6)
        })
        .await;

        let status = h.coordinator.get_system_status();
        assert_eq!(status.system_health, SystemHealth::Warning);
        assert_eq!(status.faulted_monitors, vec![MonitorKind::Memory]);
    }

    #[tokio::test]
    async fn test_flooded_monitor_does_not_starve_others() {
        let h = Harness::new();
        h.start_nominal().await;
        let mut rx = h.coordinator.subscribe();

        // No await in between: the fan-in loop cannot drain meanwhile
        for i in 0..200 {
            let ratio = 0.3 + (i as f64) * 0.001;
            h.emit(MonitorEvent::Memory(MemorySubState::from_ratio(ratio, 0.8, 0.95)));
        }
        h.emit(MonitorEvent::Battery(BatterySubState::unplugged(0.3)));

        let coordinator = h.coordinator.clone();
        wait_until(move || {
            let status = coordinator.get_system_status();
            status.battery.level == Some(0.3) && (status.memory.usage_ratio - 0.499).abs() < 1e-9
        })
        .await;

        let events = drain(&mut rx);
        assert!(events.contains(&CoordinatorEvent::Overflow {
            source: MonitorKind::Memory,
            dropped: 192,
        }));
    }

    #[tokio::test]
    async fn test_start_recording_is_gated_and_idempotent() {
        let h = Harness::new();

        let err = h.coordinator.start_recording().await.unwrap_err();
        assert!(matches!(
            err,
            CommandError::Precondition(PreconditionError { ref unmet }) if unmet.contains(&Precondition::NotInitialized)
        ));

        h.coordinator.initialize_system().await.unwrap();
        // Permissions not reported yet
        let err = h.coordinator.start_recording().await.unwrap_err();
        assert!(matches!(err, CommandError::Precondition(_)));
        assert!(matches!(
            h.coordinator.capture_photo().await,
            Err(CommandError::Precondition(_))
        ));
        assert_eq!(h.camera.start_calls(), 0);
        assert_eq!(h.camera.photo_calls(), 0);

        h.emit_nominal();
        let coordinator = h.coordinator.clone();
        wait_until(move || coordinator.can_record()).await;

        assert_eq!(h.coordinator.start_recording().await.unwrap(), CameraSubState::Recording);
        assert_eq!(h.coordinator.start_recording().await.unwrap(), CameraSubState::Recording);
        assert_eq!(h.camera.start_calls(), 1);

        h.coordinator.capture_photo().await.unwrap();
        assert_eq!(h.camera.photo_calls(), 1);

        assert_eq!(h.coordinator.stop_recording().await.unwrap(), CameraSubState::Ready);
        assert_eq!(h.coordinator.stop_recording().await.unwrap(), CameraSubState::Ready);
        assert_eq!(h.camera.stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_optimization_reports_completion() {
        let h = Harness::new();
        h.start_nominal().await;
        h.emit(MonitorEvent::Thermal(ThermalState::Serious));
        let coordinator = h.coordinator.clone();
        wait_until(move || coordinator.get_system_status().thermal == ThermalState::Serious).await;
        let mut rx = h.coordinator.subscribe();

        h.coordinator.request_system_optimization().unwrap();
        let mut events = Vec::new();
        wait_until(|| {
            events.extend(drain(&mut rx));
            events
                .iter()
                .any(|e| matches!(e, CoordinatorEvent::OptimizationCompleted(_)))
        })
        .await;

        assert_eq!(events[0], CoordinatorEvent::OptimizationRequested);
        let report = events
            .iter()
            .find_map(|e| match e {
                CoordinatorEvent::OptimizationCompleted(report) => Some(report.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!report.is_partial());
        assert!(report.completed.contains(&OptimizationAction::ThermalMitigation));
        assert_eq!(h.memory.release_calls(), 1);
        assert!(h.battery.is_power_saving());
    }

    #[tokio::test]
    async fn test_optimization_timeout_is_partial() {
        let h = Harness::new();
        h.start_nominal().await;
        h.memory.set_latency(Some(Duration::from_secs(5)));
        let mut rx = h.coordinator.subscribe();

        h.coordinator.request_system_optimization().unwrap();
        let mut events = Vec::new();
        wait_until(|| {
            events.extend(drain(&mut rx));
            events
                .iter()
                .any(|e| matches!(e, CoordinatorEvent::OptimizationCompleted(_)))
        })
        .await;

        let report = events
            .iter()
            .find_map(|e| match e {
                CoordinatorEvent::OptimizationCompleted(report) => Some(report.clone()),
                _ => None,
            })
            .unwrap();
        assert!(report.is_partial());
        assert_eq!(report.timed_out, vec![OptimizationAction::ReleaseMemory]);
        assert_eq!(report.completed, vec![OptimizationAction::BatterySaver]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_optimization() {
        let h = Harness::with_config(CoordinatorConfig {
            optimization_timeout_ms: 10_000,
            ..test_config()
        });
        h.start_nominal().await;
        h.memory.set_latency(Some(Duration::from_secs(10)));
        let mut rx = h.coordinator.subscribe();

        h.coordinator.request_system_optimization().unwrap();
        timeout(Duration::from_secs(2), h.coordinator.shutdown_system())
            .await
            .expect("shutdown waited on optimization");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let events = drain(&mut rx);
        assert!(events.contains(&CoordinatorEvent::ShutdownCompleted));
        assert!(!events
            .iter()
            .any(|e| matches!(e, CoordinatorEvent::OptimizationCompleted(_))));
        assert_eq!(
            h.coordinator.request_system_optimization(),
            Err(CommandError::NotInitialized)
        );
    }

    #[tokio::test]
    async fn test_polling_monitors_end_to_end() {
        let camera = Arc::new(SimulatedCamera::new());
        let battery = Arc::new(SimulatedBattery::new(BatterySubState::unplugged(0.8)));
        let collaborators = Collaborators {
            camera: camera.clone(),
            permissions: Arc::new(SimulatedPermissions::authorized()),
            memory: Arc::new(SimulatedMemory::new(0.3)),
            battery: battery.clone(),
            thermal: Arc::new(SimulatedThermal::new(ThermalState::Nominal)),
        };
        let coordinator = HealthCoordinator::with_polling_monitors(test_config(), collaborators);

        coordinator.initialize_system().await.unwrap();
        let c = coordinator.clone();
        wait_until(move || c.can_record()).await;

        coordinator.start_recording().await.unwrap();
        let c = coordinator.clone();
        wait_until(move || c.get_system_status().camera.is_recording()).await;

        battery.set_level(0.05);
        let cam = camera.clone();
        wait_until(move || cam.stop_calls() == 1).await;
        let c = coordinator.clone();
        wait_until(move || !c.get_system_status().camera.is_recording()).await;
        assert_eq!(coordinator.get_system_status().system_health, SystemHealth::Critical);

        coordinator.shutdown_system().await;
        assert!(!coordinator.get_system_status().is_initialized);
        assert_eq!(camera.stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_slow_camera_poll_does_not_delay_forced_stop() {
        let camera = Arc::new(SimulatedCamera::without_notifier());
        let battery = Arc::new(SimulatedBattery::new(BatterySubState::unplugged(0.8)));
        let collaborators = Collaborators {
            camera: camera.clone(),
            permissions: Arc::new(SimulatedPermissions::authorized()),
            memory: Arc::new(SimulatedMemory::new(0.3)),
            battery: battery.clone(),
            thermal: Arc::new(SimulatedThermal::new(ThermalState::Nominal)),
        };
        let config = CoordinatorConfig {
            poll_interval_ms: 200,
            ..test_config()
        };
        let coordinator = HealthCoordinator::with_polling_monitors(config, collaborators);

        coordinator.initialize_system().await.unwrap();
        let c = coordinator.clone();
        wait_until(move || c.can_record()).await;

        coordinator.start_recording().await.unwrap();
        battery.set_level(0.05);

        let cam = camera.clone();
        wait_until(move || cam.stop_calls() == 1).await;
        assert!(!camera.current_state().is_recording());

        coordinator.shutdown_system().await;
        assert_eq!(camera.stop_calls(), 1);
    }
}
