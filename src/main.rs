// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! DualCam - headless health coordinator driver
//!
//! Runs the system health coordinator over simulated collaborators and logs
//! every coordinator event. Useful to watch the health policy at work:
//! `--record --drain 0.05` starts a recording and drains the battery until
//! the coordinator forces the recording to stop.

use anyhow::Result;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dualcam::core::{Delivery, EventReceiver};
use dualcam::monitors::{
    Capability, PermissionStatus, SimulatedBattery, SimulatedCamera, SimulatedMemory,
    SimulatedPermissions, SimulatedThermal,
};
use dualcam::{
    Collaborators, Config, CoordinatorEvent, Envelope, HealthCoordinator, SimulationConfig,
    VERSION,
};

/// DualCam - System health coordinator for a dual-camera recorder
#[derive(Parser, Debug)]
#[command(name = "dualcam")]
#[command(author = "DualCam Project")]
#[command(version = VERSION)]
#[command(about = "Headless system health coordinator over simulated device monitors")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Print coordinator events as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Start a recording once the system allows it
    #[arg(long)]
    record: bool,

    /// Request a system optimization after startup
    #[arg(long)]
    optimize: bool,

    /// Battery drained per simulation tick (overrides the config)
    #[arg(long)]
    drain: Option<f64>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load or create configuration
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;
    if let Some(drain) = args.drain {
        config.simulation.battery_drain_per_tick = drain;
    }
    config.coordinator.validate()?;

    // Initialize logging
    let log_level = if args.trace {
        "trace".to_string()
    } else if args.debug {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(!args.json)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("📷 DualCam v{} - System Health Coordinator", VERSION);
    info!("Configuration loaded from {:?}", config_path);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_headless(config, args))
}

/// Run the coordinator over simulated collaborators until Ctrl+C
async fn run_headless(config: Config, args: Args) -> Result<()> {
    let sim = config.simulation.clone();

    let camera = Arc::new(SimulatedCamera::new());
    let permissions = Arc::new(SimulatedPermissions::new());
    let answer = if sim.grant_permissions {
        PermissionStatus::Authorized
    } else {
        PermissionStatus::Denied
    };
    for capability in Capability::ALL {
        permissions.grant_on_request(capability, answer);
    }
    let memory = Arc::new(SimulatedMemory::new(sim.memory_ratio));
    let battery = Arc::new(SimulatedBattery::new(sim.battery()));
    let thermal = Arc::new(SimulatedThermal::new(sim.thermal_state));

    let collaborators = Collaborators {
        camera,
        permissions,
        memory: memory.clone(),
        battery: battery.clone(),
        thermal,
    };
    let coordinator = HealthCoordinator::with_polling_monitors(config.coordinator.clone(), collaborators);

    let events = tokio::spawn(log_events(coordinator.subscribe(), args.json));

    if let Err(e) = coordinator.initialize_system().await {
        error!("Coordinator failed to initialize: {}", e);
        events.abort();
        return Err(e.into());
    }

    if args.record {
        start_when_ready(&coordinator).await;
    }
    if args.optimize {
        coordinator.request_system_optimization()?;
    }

    let ticker = tokio::spawn(simulate(sim, battery, memory));

    info!("🚀 DualCam running in headless mode");
    info!("   Press Ctrl+C to shutdown");

    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => signal?,
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!("Run duration of {}s elapsed", secs);
                }
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    info!("Shutdown signal received, cleaning up...");
    ticker.abort();
    coordinator.shutdown_system().await;

    if tokio::time::timeout(Duration::from_secs(1), events).await.is_err() {
        debug!("Event logger did not observe shutdown completion");
    }

    let status = coordinator.get_system_status();
    info!(
        "Final status: health={} battery={:?} memory={:.2}",
        status.system_health, status.battery.level, status.memory.usage_ratio
    );
    info!("DualCam shutdown complete");

    Ok(())
}

/// Wait for the recording gate to open, then start recording
async fn start_when_ready(coordinator: &HealthCoordinator) {
    for _ in 0..50 {
        if coordinator.can_record() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    match coordinator.start_recording().await {
        Ok(state) => info!("Recording requested, camera is {:?}", state),
        Err(e) => warn!("Could not start recording: {}", e),
    }
}

/// Log coordinator events until shutdown completes
async fn log_events(mut rx: EventReceiver<Envelope>, json: bool) {
    while let Some(delivery) = rx.recv().await {
        let envelope = match delivery {
            Delivery::Event(envelope) => envelope,
            Delivery::Overflow { dropped } => {
                warn!("Event logger lagging, {} event(s) dropped", dropped);
                continue;
            }
        };

        if json {
            match serde_json::to_string(&envelope) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to encode event #{}: {}", envelope.id, e),
            }
        } else {
            info!("[#{}] {:?}", envelope.id, envelope.event);
        }

        if envelope.event == CoordinatorEvent::ShutdownCompleted {
            break;
        }
    }
}

/// Drift the simulated device: drain the battery and jitter memory usage
async fn simulate(sim: SimulationConfig, battery: Arc<SimulatedBattery>, memory: Arc<SimulatedMemory>) {
    let mut rng = StdRng::from_entropy();
    let mut interval = tokio::time::interval(sim.tick_interval());

    loop {
        interval.tick().await;

        if sim.battery_drain_per_tick > 0.0 {
            let step = sim.battery_drain_per_tick * rng.gen_range(0.5..1.5);
            let level = battery.drain(step);
            debug!("Simulated battery at {:.2}", level);
        }

        let ratio = (memory.ratio() + rng.gen_range(-0.02..0.02)).clamp(0.0, 1.0);
        memory.set_ratio(ratio);
    }
}
