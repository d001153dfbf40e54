//! Application service, the hexagonal core.
//!
//! [`AppService`] owns the process state machine, the safety supervisor
//! and the shared plant handles. Every method takes `&self`, so the
//! periodic tasks and the command intake share one `Arc<AppService>`.
//!
//! ```text
//!   SensorBus ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                 │          AppService           │
//! ActuatorBus ◀── │  FSM · Programs · PID · Vol   │
//!                 │          Safety               │
//!                 └──────────────────────────────┘
//! ```
//!
//! Tasks: [`control_tick`](AppService::control_tick),
//! [`safety_tick`](AppService::safety_tick),
//! [`publish_telemetry`](AppService::publish_telemetry) and
//! [`handle_command`](AppService::handle_command).

use std::sync::{Arc, Mutex};

use heapless::Vec;
use log::{info, warn};

use crate::config::SystemConfig;
use crate::control::manager::PidManager;
use crate::error::Error;
use crate::fsm::settle::SettlePolicy;
use crate::fsm::{ProcessState, ProcessStateMachine, TickOutcome};
use crate::names;
use crate::plant::{Plant, lock};
use crate::programs::{
    ActuatorTestProgram, CipProgram, DrainProgram, FermentationProgram, MixProgram, Program, SterilizationProgram,
};
use crate::safety::{SafetyReport, SafetySupervisor};
use crate::volume::VolumeLedger;

use super::commands::{AppCommand, HELP, program_names};
use super::events::{ActuatorValue, AppEvent, Reading, TelemetryData};
use super::ports::{ActuatorBus, Clock, EmergencyStop, EventSink, SensorBus};

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

/// The application service orchestrates all domain logic.
pub struct AppService {
    config: SystemConfig,
    plant: Plant,
    fsm: ProcessStateMachine,
    safety: Mutex<SafetySupervisor>,
    sink: Arc<dyn EventSink>,
}

impl AppService {
    /// Validate `config`, build the core and register every program.
    pub fn new(
        config: SystemConfig,
        sensors: Arc<dyn SensorBus>,
        actuators: Arc<dyn ActuatorBus>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, Error> {
        config.validate().map_err(Error::Config)?;

        let plant = Plant::new(
            sensors,
            actuators.clone(),
            clock.clone(),
            PidManager::new(&config),
            VolumeLedger::new(&config.volume),
        );
        let fsm = ProcessStateMachine::new(
            actuators,
            clock,
            sink.clone(),
            SettlePolicy::from_timing(&config.timing),
        );

        let programs: [Box<dyn Program>; 6] = [
            Box::new(FermentationProgram::new(plant.clone(), &config.fermentation)),
            Box::new(CipProgram::new(plant.clone())),
            Box::new(DrainProgram::new(plant.clone())),
            Box::new(MixProgram::new(plant.clone())),
            Box::new(SterilizationProgram::new(plant.clone())),
            Box::new(ActuatorTestProgram::new(plant.clone(), &config.actuator_tests)),
        ];
        for program in programs {
            fsm.add_program(program.name(), program)?;
        }

        Ok(Self {
            safety: Mutex::new(SafetySupervisor::new(&config.safety)),
            config,
            plant,
            fsm,
            sink,
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn start(&self) {
        let state = self.fsm.current_state();
        self.sink.emit(&AppEvent::Started(state));
        info!("AppService started in {state}");
    }

    /// Stop whatever is running; used on shutdown.
    pub fn shutdown(&self) {
        if let Some(outcome) = self.fsm.stop_all_programs() {
            info!("Shutdown: program stopped ({})", if outcome.is_clean() { "clean" } else { "not settled" });
        }
    }

    // ── Periodic tasks ────────────────────────────────────────

    /// Control task body.
    pub fn control_tick(&self) -> TickOutcome {
        self.fsm.update()
    }

    /// Safety task body. `None` when the check was not due.
    pub fn safety_tick(&self) -> Option<SafetyReport> {
        let mut safety = lock(&self.safety);
        let before = safety.faults();
        let report = safety.check_limits(
            self.plant.now_ms(),
            self.plant.sensors.as_ref(),
            self.plant.actuators.as_ref(),
            &self.plant.volume,
        )?;
        // Released before the stop: the settle wait may take seconds.
        drop(safety);

        if report.faults != before {
            self.sink.emit(&AppEvent::FaultsChanged(report.faults));
        }
        if report.stop_required {
            self.fsm.emergency_stop();
            self.sink.emit(&AppEvent::SafetyStop(report.faults));
        }
        Some(report)
    }

    /// Build a telemetry snapshot. Read-only.
    pub fn telemetry(&self) -> TelemetryData {
        let snapshot = self.fsm.snapshot();
        let sensors = names::ALL_SENSORS
            .iter()
            .map(|&name| Reading {
                name,
                value: self.plant.sensors.read_sensor(name).ok(),
            })
            .collect::<Vec<_, { names::ALL_SENSORS.len() }>>();
        let actuators = names::ALL_ACTUATORS
            .iter()
            .map(|&name| ActuatorValue {
                name,
                value: self.plant.actuators.current_value(name),
            })
            .collect::<Vec<_, { names::ALL_ACTUATORS.len() }>>();
        // One lock at a time; guards in the literal below would overlap.
        let volume = self.plant.volume().volume_info();
        let loops = self.plant.pid().status();
        let faults = self.faults();

        TelemetryData {
            uptime_ms: self.plant.now_ms(),
            state: snapshot.state,
            program: snapshot.program,
            parameters: snapshot.parameters,
            sensors,
            actuators,
            volume,
            loops,
            faults,
        }
    }

    /// Telemetry task body.
    pub fn publish_telemetry(&self) {
        self.sink.emit(&AppEvent::Telemetry(Box::new(self.telemetry())));
    }

    // ── Command handling ──────────────────────────────────────

    /// Parse and execute one operator command line.
    pub fn handle_command(&self, line: &str) -> Result<(), Error> {
        let command = AppCommand::parse(line).inspect_err(|e| warn!("Command '{line}' rejected: {e}"))?;
        let actuators = self.plant.actuators.as_ref();
        match command {
            AppCommand::StartProgram { program, line } => self.fsm.start_program(program, &line),
            AppCommand::Stop(None) => {
                if self.fsm.stop_all_programs().is_none() {
                    info!("Stop: nothing running");
                }
                Ok(())
            }
            AppCommand::Stop(Some(name)) => {
                if self.fsm.stop_program(&name).is_none() {
                    info!("Stop: '{name}' is not running");
                }
                Ok(())
            }
            AppCommand::Pause => self.fsm.pause_current(),
            AppCommand::Resume => self.fsm.resume_current(),
            AppCommand::Volume(line) => self.plant.volume().parse_command(&line, actuators),
            AppCommand::Safety(line) => lock(&self.safety).parse_command(&line),
            AppCommand::Pid(line) => self.plant.pid().parse_command(&line),
            AppCommand::SetPidEnabled(enabled) => self.fsm.apply_setting(
                program_names::FERMENTATION,
                "pid_enabled",
                if enabled { "true" } else { "false" },
            ),
            AppCommand::Status => {
                self.publish_telemetry();
                Ok(())
            }
            AppCommand::Help => {
                for usage in HELP {
                    info!("HELP | {usage}");
                }
                Ok(())
            }
        }
        .inspect_err(|e| warn!("Command '{line}' failed: {e}"))
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> ProcessState {
        self.fsm.current_state()
    }

    pub fn current_program(&self) -> Option<&'static str> {
        self.fsm.current_program()
    }

    /// Conditions present at the last safety check.
    pub fn faults(&self) -> u16 {
        lock(&self.safety).faults()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn plant(&self) -> &Plant {
        &self.plant
    }

    pub fn fsm(&self) -> &ProcessStateMachine {
        &self.fsm
    }
}
