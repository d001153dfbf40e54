//! Outbound application events.
//!
//! The state machine and the [`AppService`](super::service::AppService)
//! emit these through the [`EventSink`](super::ports::EventSink) port.
//! Adapters on the other side decide what to do with them: log to the
//! console, publish over MQTT, push to a web UI.

use heapless::Vec;
use serde::Serialize;

use crate::control::manager::{LoopStatus, Variable};
use crate::fsm::ProcessState;
use crate::fsm::settle::{MAX_SETTLE, SettleOutcome};
use crate::names;
use crate::programs::Parameters;
use crate::volume::VolumeInfo;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, Serialize)]
pub enum AppEvent {
    /// The application service has started (carries initial state).
    Started(ProcessState),

    /// The process state machine changed state.
    StateChanged {
        from: ProcessState,
        to: ProcessState,
        program: Option<&'static str>,
    },

    /// Actuators did not confirm off within the settle bound.
    SettleTimedOut {
        program: &'static str,
        still_running: Vec<&'static str, MAX_SETTLE>,
    },

    /// The safety supervisor forced a stop; carries the fault bits.
    SafetyStop(u16),

    /// The active fault set changed; `0` means all clear.
    FaultsChanged(u16),

    /// Periodic telemetry snapshot.
    Telemetry(Box<TelemetryData>),
}

impl AppEvent {
    pub fn settle(program: &'static str, outcome: &SettleOutcome) -> Option<Self> {
        match outcome {
            SettleOutcome::Clean => None,
            SettleOutcome::TimedOut { still_running } => Some(Self::SettleTimedOut {
                program,
                still_running: still_running.clone(),
            }),
        }
    }
}

/// One named reading; `None` when the sensor is absent or failed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub name: &'static str,
    pub value: Option<f32>,
}

/// One actuator's commanded value (0 when off).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActuatorValue {
    pub name: &'static str,
    pub value: i32,
}

/// A point-in-time telemetry snapshot suitable for logging or transmission.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryData {
    pub uptime_ms: u64,
    pub state: ProcessState,
    pub program: Option<&'static str>,
    pub parameters: Parameters,
    pub sensors: Vec<Reading, { names::ALL_SENSORS.len() }>,
    pub actuators: Vec<ActuatorValue, { names::ALL_ACTUATORS.len() }>,
    pub volume: VolumeInfo,
    pub loops: [LoopStatus; Variable::COUNT],
    pub faults: u16,
}

impl TelemetryData {
    pub fn reading(&self, name: &str) -> Option<f32> {
        self.sensors.iter().find(|r| r.name == name).and_then(|r| r.value)
    }

    pub fn actuator(&self, name: &str) -> Option<i32> {
        self.actuators.iter().find(|a| a.name == name).map(|a| a.value)
    }
}
