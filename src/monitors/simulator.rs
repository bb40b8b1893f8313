// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Simulated collaborators and a scripted monitor for demo/testing

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{
    BatteryAdvisor, BatterySubState, CameraControl, CameraSubState, Capability, MemoryAdvisor,
    Monitor, MonitorEvent, MonitorKind, PermissionRegistry, PermissionStatus, ThermalAdvisor,
    ThermalState,
};
use crate::core::{EventSender, SendOutcome};
use crate::error::{CollaboratorError, MonitorError};

/// Optional artificial latency for a collaborator call
#[derive(Default)]
struct Latency(Mutex<Option<Duration>>);

impl Latency {
    fn set(&self, delay: Option<Duration>) {
        *self.0.lock() = delay;
    }

    async fn wait(&self) {
        let delay = *self.0.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Callback run when a simulated component is asked to stop
pub type StopHook = Arc<dyn Fn() + Send + Sync>;

/// In-memory camera that records every command it receives
pub struct SimulatedCamera {
    state: Mutex<CameraSubState>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    photo_calls: AtomicUsize,
    fail_commands: AtomicBool,
    latency: Latency,
    notify: Option<Arc<Notify>>,
    on_stop: Mutex<Option<StopHook>>,
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CameraSubState::Ready),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            photo_calls: AtomicUsize::new(0),
            fail_commands: AtomicBool::new(false),
            latency: Latency::default(),
            notify: Some(Arc::new(Notify::new())),
            on_stop: Mutex::new(None),
        }
    }

    /// Camera without a change notifier; its monitor only learns about
    /// state changes on the next poll.
    pub fn without_notifier() -> Self {
        Self {
            notify: None,
            ..Self::new()
        }
    }

    pub fn set_state(&self, state: CameraSubState) {
        *self.state.lock() = state;
        if let Some(notify) = &self.notify {
            notify.notify_one();
        }
    }

    /// Run `hook` whenever `stop_recording` is called
    pub fn on_stop(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_stop.lock() = Some(Arc::new(hook));
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_commands.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, delay: Option<Duration>) {
        self.latency.set(delay);
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn photo_calls(&self) -> usize {
        self.photo_calls.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &str) -> Result<(), CollaboratorError> {
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new(operation, "capture session unavailable"));
        }
        Ok(())
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraControl for SimulatedCamera {
    async fn start_recording(&self) -> Result<(), CollaboratorError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.latency.wait().await;
        self.check("start_recording")?;
        self.set_state(CameraSubState::Recording);
        Ok(())
    }

    async fn stop_recording(&self) -> Result<(), CollaboratorError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.on_stop.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
        self.latency.wait().await;
        self.check("stop_recording")?;
        self.set_state(CameraSubState::Ready);
        Ok(())
    }

    async fn capture_photo(&self) -> Result<(), CollaboratorError> {
        self.photo_calls.fetch_add(1, Ordering::SeqCst);
        self.latency.wait().await;
        self.check("capture_photo")
    }

    fn current_state(&self) -> CameraSubState {
        self.state.lock().clone()
    }

    fn change_notifier(&self) -> Option<Arc<Notify>> {
        self.notify.clone()
    }
}

/// Permission registry whose prompts resolve to preconfigured answers
pub struct SimulatedPermissions {
    statuses: Mutex<BTreeMap<Capability, PermissionStatus>>,
    on_request: Mutex<BTreeMap<Capability, PermissionStatus>>,
    request_calls: AtomicUsize,
    notify: Arc<Notify>,
}

impl SimulatedPermissions {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(BTreeMap::new()),
            on_request: Mutex::new(BTreeMap::new()),
            request_calls: AtomicUsize::new(0),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Registry where every capability is already authorized
    pub fn authorized() -> Self {
        let registry = Self::new();
        for capability in Capability::ALL {
            registry.set(capability, PermissionStatus::Authorized);
        }
        registry
    }

    pub fn set(&self, capability: Capability, status: PermissionStatus) {
        self.statuses.lock().insert(capability, status);
        self.notify.notify_one();
    }

    /// Answer `request_all` will give for `capability` if still undetermined
    pub fn grant_on_request(&self, capability: Capability, status: PermissionStatus) {
        self.on_request.lock().insert(capability, status);
    }

    pub fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedPermissions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionRegistry for SimulatedPermissions {
    fn status_of(&self, capability: Capability) -> PermissionStatus {
        self.statuses.lock().get(&capability).copied().unwrap_or_default()
    }

    async fn request_all(&self) -> BTreeMap<Capability, PermissionStatus> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        let answers = self.on_request.lock().clone();
        let mut statuses = self.statuses.lock();
        for capability in Capability::ALL {
            let current = statuses.get(&capability).copied().unwrap_or_default();
            if current == PermissionStatus::Undetermined {
                if let Some(answer) = answers.get(&capability) {
                    statuses.insert(capability, *answer);
                }
            }
        }
        statuses.clone()
    }

    fn change_notifier(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.notify))
    }
}

pub struct SimulatedMemory {
    ratio: Mutex<f64>,
    failing: AtomicBool,
    release_calls: AtomicUsize,
    latency: Latency,
    notify: Arc<Notify>,
}

impl SimulatedMemory {
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio: Mutex::new(ratio),
            failing: AtomicBool::new(false),
            release_calls: AtomicUsize::new(0),
            latency: Latency::default(),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn set_ratio(&self, ratio: f64) {
        *self.ratio.lock() = ratio.clamp(0.0, 1.0);
        self.notify.notify_one();
    }

    pub fn ratio(&self) -> f64 {
        *self.ratio.lock()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Delay applied to `release_memory` acknowledgements
    pub fn set_latency(&self, delay: Option<Duration>) {
        self.latency.set(delay);
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MemoryAdvisor for SimulatedMemory {
    fn current_pressure(&self) -> Result<f64, CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("current_pressure", "memory statistics unavailable"));
        }
        Ok(self.ratio())
    }

    async fn release_memory(&self) -> Result<(), CollaboratorError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.latency.wait().await;
        let mut ratio = self.ratio.lock();
        *ratio = (*ratio - 0.1).max(0.0);
        drop(ratio);
        self.notify.notify_one();
        Ok(())
    }

    fn change_notifier(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.notify))
    }
}

pub struct SimulatedBattery {
    state: Mutex<BatterySubState>,
    failing: AtomicBool,
    power_saving: AtomicBool,
    power_saving_calls: AtomicUsize,
    fail_power_saving: AtomicBool,
    latency: Latency,
    notify: Arc<Notify>,
}

impl SimulatedBattery {
    pub fn new(state: BatterySubState) -> Self {
        Self {
            state: Mutex::new(state),
            failing: AtomicBool::new(false),
            power_saving: AtomicBool::new(false),
            power_saving_calls: AtomicUsize::new(0),
            fail_power_saving: AtomicBool::new(false),
            latency: Latency::default(),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn set_level(&self, level: f64) {
        let mut state = self.state.lock();
        *state = BatterySubState::new(level, state.charging);
        drop(state);
        self.notify.notify_one();
    }

    /// Lower the level by `step`, returning the new level
    pub fn drain(&self, step: f64) -> f64 {
        let mut state = self.state.lock();
        let level = (state.level.unwrap_or(1.0) - step).max(0.0);
        *state = BatterySubState::new(level, state.charging);
        drop(state);
        self.notify.notify_one();
        level
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn set_power_saving_fails(&self, failing: bool) {
        self.fail_power_saving.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, delay: Option<Duration>) {
        self.latency.set(delay);
    }

    pub fn is_power_saving(&self) -> bool {
        self.power_saving.load(Ordering::SeqCst)
    }

    pub fn power_saving_calls(&self) -> usize {
        self.power_saving_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatteryAdvisor for SimulatedBattery {
    fn current_level(&self) -> Result<BatterySubState, CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("current_level", "battery service unavailable"));
        }
        Ok(*self.state.lock())
    }

    async fn enable_power_saving(&self) -> Result<(), CollaboratorError> {
        self.power_saving_calls.fetch_add(1, Ordering::SeqCst);
        self.latency.wait().await;
        if self.fail_power_saving.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("enable_power_saving", "mode switch rejected"));
        }
        self.power_saving.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn change_notifier(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.notify))
    }
}

pub struct SimulatedThermal {
    state: Mutex<ThermalState>,
    mitigate_calls: AtomicUsize,
    latency: Latency,
    notify: Arc<Notify>,
}

impl SimulatedThermal {
    pub fn new(state: ThermalState) -> Self {
        Self {
            state: Mutex::new(state),
            mitigate_calls: AtomicUsize::new(0),
            latency: Latency::default(),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn set_state(&self, state: ThermalState) {
        *self.state.lock() = state;
        self.notify.notify_one();
    }

    pub fn set_latency(&self, delay: Option<Duration>) {
        self.latency.set(delay);
    }

    pub fn mitigate_calls(&self) -> usize {
        self.mitigate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThermalAdvisor for SimulatedThermal {
    fn current_state(&self) -> Result<ThermalState, CollaboratorError> {
        Ok(*self.state.lock())
    }

    async fn mitigate(&self) -> Result<(), CollaboratorError> {
        self.mitigate_calls.fetch_add(1, Ordering::SeqCst);
        self.latency.wait().await;
        Ok(())
    }

    fn change_notifier(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.notify))
    }
}

/// Monitor whose events are pushed by hand through [`ScriptedMonitor::emit`]
pub struct ScriptedMonitor {
    kind: MonitorKind,
    sink: Mutex<Option<EventSender<MonitorEvent>>>,
    start_failure: Mutex<Option<String>>,
    start_delay: Mutex<Option<Duration>>,
    hang_on_stop: AtomicBool,
    on_stop: Mutex<Option<StopHook>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl ScriptedMonitor {
    pub fn new(kind: MonitorKind) -> Self {
        Self {
            kind,
            sink: Mutex::new(None),
            start_failure: Mutex::new(None),
            start_delay: Mutex::new(None),
            hang_on_stop: AtomicBool::new(false),
            on_stop: Mutex::new(None),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// Make every following `start` fail with `reason`
    pub fn fail_start(&self, reason: impl Into<String>) {
        *self.start_failure.lock() = Some(reason.into());
    }

    pub fn clear_start_failure(&self) {
        self.start_failure.lock().take();
    }

    pub fn set_start_delay(&self, delay: Option<Duration>) {
        *self.start_delay.lock() = delay;
    }

    /// Make `stop` never complete
    pub fn hang_on_stop(&self, hang: bool) {
        self.hang_on_stop.store(hang, Ordering::SeqCst);
    }

    /// Run `hook` whenever `stop` is called
    pub fn on_stop(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_stop.lock() = Some(Arc::new(hook));
    }

    /// Push an event into the coordinator queue. Returns `None` when the
    /// monitor is not running.
    pub fn emit(&self, event: MonitorEvent) -> Option<SendOutcome> {
        self.sink.lock().as_ref().map(|sink| sink.send(event))
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Monitor for ScriptedMonitor {
    fn kind(&self) -> MonitorKind {
        self.kind
    }

    fn is_running(&self) -> bool {
        self.sink.lock().is_some()
    }

    async fn start(&self, sink: EventSender<MonitorEvent>) -> Result<(), MonitorError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.start_failure.lock().clone();
        if let Some(reason) = failure {
            return Err(MonitorError::start_failed(self.kind, reason));
        }
        let mut slot = self.sink.lock();
        if slot.is_none() {
            *slot = Some(sink);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), MonitorError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.on_stop.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
        if self.hang_on_stop.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.sink.lock().take();
        Ok(())
    }
}
