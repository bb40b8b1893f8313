// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Polling monitor - turns a collaborator probe into a [`Monitor`]
//!
//! The poll task samples the probe on a fixed interval, or earlier when the
//! collaborator signals a change, and forwards a sub-state only when it
//! differs from the last one sent. Sampling failures become `Fault` events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{Monitor, MonitorEvent, MonitorKind};
use crate::core::EventSender;
use crate::error::MonitorError;

/// One sampling source behind a [`PollingMonitor`]
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    fn kind(&self) -> MonitorKind;

    /// Read the current sub-state
    async fn sample(&self) -> Result<MonitorEvent, MonitorError>;

    /// Change notification from the underlying collaborator, if any
    fn notifier(&self) -> Option<Arc<Notify>> {
        None
    }
}

struct PollTask {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct PollingMonitor<P: Probe> {
    probe: Arc<P>,
    period: Duration,
    task: Mutex<Option<PollTask>>,
}

impl<P: Probe> PollingMonitor<P> {
    pub fn new(probe: P, period: Duration) -> Self {
        Self {
            probe: Arc::new(probe),
            period,
            task: Mutex::new(None),
        }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }
}

#[async_trait]
impl<P: Probe> Monitor for PollingMonitor<P> {
    fn kind(&self) -> MonitorKind {
        self.probe.kind()
    }

    fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    async fn start(&self, sink: EventSender<MonitorEvent>) -> Result<(), MonitorError> {
        let kind = self.probe.kind();
        if self.is_running() {
            debug!(monitor = %kind, "Monitor already running");
            return Ok(());
        }

        // A probe that cannot be read at all is a failed start
        let first = match self.probe.sample().await {
            Ok(event) => event,
            Err(e) => return Err(MonitorError::start_failed(kind, e.to_string())),
        };

        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }

        sink.send(first.clone());
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.probe),
            self.period,
            sink,
            shutdown_rx,
            first,
        ));
        *task = Some(PollTask { shutdown, handle });

        info!(monitor = %kind, "Monitor started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), MonitorError> {
        let kind = self.probe.kind();
        let Some(task) = self.task.lock().take() else {
            return Ok(());
        };

        let _ = task.shutdown.send(());
        task.handle.await.map_err(|e| MonitorError::StopFailed {
            kind,
            reason: e.to_string(),
        })?;

        info!(monitor = %kind, "Monitor stopped");
        Ok(())
    }
}

async fn poll_loop<P: Probe>(
    probe: Arc<P>,
    period: Duration,
    sink: EventSender<MonitorEvent>,
    mut shutdown: broadcast::Receiver<()>,
    first: MonitorEvent,
) {
    let kind = probe.kind();
    let notifier = probe.notifier();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    let mut last = first;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
            _ = changed(notifier.as_deref()) => {}
        }

        let event = match probe.sample().await {
            Ok(event) => event,
            Err(e) => {
                if !matches!(last, MonitorEvent::Fault(_)) {
                    warn!(monitor = %kind, "Sampling failed: {}", e);
                }
                MonitorEvent::Fault(e)
            }
        };

        if event != last {
            sink.send(event.clone());
            last = event;
        }
    }

    debug!(monitor = %kind, "Poll loop exited");
}

async fn changed(notifier: Option<&Notify>) {
    match notifier {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}
