//! Bioreactor controller host entry point.
//!
//! Runs the process-control core against the simulated vessel, with the
//! operator console on stdin.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SimulatedPlant     LogEventSink   JsonFileConfig  SystemClock │
//! │  (Sensor+Actuator)  (EventSink)    (ConfigPort)    (Clock)     │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              AppService (pure logic)                   │    │
//! │  │  FSM · Programs · PID · Volume · Safety                │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Tasks: control · safety · telemetry · command                 │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `bioreactor [config.json]`. `RUST_LOG` selects the log level.

#![deny(unused_must_use)]

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use tracing_subscriber::EnvFilter;

use bioreactor::adapters::config_file::JsonFileConfig;
use bioreactor::adapters::log_sink::LogEventSink;
use bioreactor::adapters::sim::SimulatedPlant;
use bioreactor::adapters::time::SystemClock;
use bioreactor::app::intake::{self, CMD_CHANNEL, CommandIntake};
use bioreactor::app::ports::ConfigPort;
use bioreactor::app::service::AppService;
use bioreactor::config::SystemConfig;

const DEFAULT_CONFIG_PATH: &str = "bioreactor.json";

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

// ── Periodic tasks ────────────────────────────────────────────

fn spawn_periodic(name: &str, period_ms: u32, mut body: impl FnMut() + Send + 'static) -> Result<JoinHandle<()>> {
    let period = Duration::from_millis(u64::from(period_ms));
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            while !SHUTDOWN.load(Ordering::Relaxed) {
                body();
                thread::sleep(period);
            }
        })
        .with_context(|| format!("spawning {name} task"))
}

/// Console reader: stdin lines into the command channel.
fn spawn_console() -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console".to_owned())
        .spawn(|| {
            let mut intake = CommandIntake::new(&CMD_CHANNEL);
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if matches!(line.trim(), "quit" | "exit") {
                    break;
                }
                if let Err(e) = intake.submit(&line) {
                    warn!("console: {e}");
                }
            }
            SHUTDOWN.store(true, Ordering::Relaxed);
        })
        .context("spawning console task")
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. Logging ────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .map_err(|e| anyhow!("logger init failed: {e}"))?;

    info!("Bioreactor controller v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Config (file or defaults) ──────────────────────────
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned());
    let store = JsonFileConfig::new(path);
    let config = match store.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Config load failed ({e}), using defaults");
            SystemConfig::default()
        }
    };
    let timing = config.timing;

    // ── 3. Adapters + app service ─────────────────────────────
    let clock = Arc::new(SystemClock::new());
    let plant = Arc::new(SimulatedPlant::fermenter(clock.clone()));
    let app = Arc::new(AppService::new(
        config,
        plant.clone(),
        plant,
        clock,
        Arc::new(LogEventSink::new()),
    )?);
    app.start();

    // ── 4. Tasks ──────────────────────────────────────────────
    let mut tasks = Vec::new();
    let control = app.clone();
    tasks.push(spawn_periodic("control", timing.control_tick_ms, move || {
        control.control_tick();
    })?);
    let safety = app.clone();
    tasks.push(spawn_periodic("safety", timing.safety_tick_ms, move || {
        safety.safety_tick();
    })?);
    let telemetry = app.clone();
    tasks.push(spawn_periodic("telemetry", timing.telemetry_interval_ms, move || {
        telemetry.publish_telemetry();
    })?);
    let _console = spawn_console()?;

    info!("System ready. Type 'help' for commands, 'quit' to exit.");

    // ── 5. Command task ───────────────────────────────────────
    let poll = Duration::from_millis(u64::from(timing.command_poll_ms));
    while !SHUTDOWN.load(Ordering::Relaxed) {
        intake::drain(&CMD_CHANNEL, |line| {
            let _ = app.handle_command(line);
        });
        thread::sleep(poll);
    }

    // ── 6. Shutdown ───────────────────────────────────────────
    info!("Shutting down");
    for task in tasks {
        if task.join().is_err() {
            warn!("A task panicked during shutdown");
        }
    }
    app.shutdown();
    Ok(())
}
