//! Mock hardware adapter for integration tests.
//!
//! Records every actuator call so tests can assert on the full command
//! history without a vessel model. Actuators can be marked stuck and
//! sensors failed to drive the error paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use bioreactor::adapters::time::ManualClock;
use bioreactor::app::events::AppEvent;
use bioreactor::app::ports::{ActuatorBus, EventSink, SensorBus};
use bioreactor::app::service::AppService;
use bioreactor::config::SystemConfig;
use bioreactor::error::{ActuatorError, SensorError};
use bioreactor::names;

// ── Actuator call record ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    Run { name: String, value: f32, duration_ms: u32 },
    Stop { name: String },
}

// ── MockBus ───────────────────────────────────────────────────

#[derive(Default)]
struct State {
    calls: Vec<ActuatorCall>,
    running: HashMap<String, f32>,
    stuck: HashSet<String>,
    sensors: HashMap<String, Result<f32, SensorError>>,
    added_ml: HashMap<String, f32>,
    removed_ml: HashMap<String, f32>,
}

pub struct MockBus {
    state: Mutex<State>,
}

#[allow(dead_code)]
impl MockBus {
    /// Every sensor present with a reading inside its normal band.
    pub fn new() -> Self {
        let mut state = State::default();
        for (name, value) in [
            (names::WATER_TEMP_SENSOR, 25.0),
            (names::AIR_TEMP_SENSOR, 22.0),
            (names::ELECTRONIC_TEMP_SENSOR, 35.0),
            (names::PH_SENSOR, 7.0),
            (names::OXYGEN_SENSOR, 60.0),
            (names::TURBIDITY_SENSOR, 50.0),
            (names::PRESSURE_SENSOR, 1.0),
        ] {
            state.sensors.insert(name.to_owned(), Ok(value));
        }
        Self { state: Mutex::new(state) }
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().unwrap().running.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn set_sensor(&self, name: &str, value: f32) {
        self.state.lock().unwrap().sensors.insert(name.to_owned(), Ok(value));
    }

    pub fn fail_sensor(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .sensors
            .insert(name.to_owned(), Err(SensorError::ReadFailed));
    }

    pub fn set_stuck(&self, name: &str) {
        self.state.lock().unwrap().stuck.insert(name.to_owned());
    }

    pub fn add_delivered(&self, name: &str, ml: f32) {
        *self.state.lock().unwrap().added_ml.entry(name.to_owned()).or_default() += ml;
    }

    pub fn add_removed(&self, name: &str, ml: f32) {
        *self.state.lock().unwrap().removed_ml.entry(name.to_owned()).or_default() += ml;
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

fn known(name: &str) -> Result<(), ActuatorError> {
    if names::ALL_ACTUATORS.contains(&name) {
        Ok(())
    } else {
        Err(ActuatorError::NotFound)
    }
}

impl SensorBus for MockBus {
    fn read_sensor(&self, name: &str) -> Result<f32, SensorError> {
        self.state
            .lock()
            .unwrap()
            .sensors
            .get(name)
            .copied()
            .unwrap_or(Err(SensorError::NotFound))
    }
}

impl ActuatorBus for MockBus {
    fn run_actuator(&self, name: &str, value: f32, duration_ms: u32) -> Result<(), ActuatorError> {
        known(name)?;
        let mut s = self.state.lock().unwrap();
        s.calls.push(ActuatorCall::Run { name: name.to_owned(), value, duration_ms });
        if value > 0.0 {
            s.running.insert(name.to_owned(), value);
        } else if !s.stuck.contains(name) {
            s.running.remove(name);
        }
        Ok(())
    }

    fn stop_actuator(&self, name: &str) -> Result<(), ActuatorError> {
        known(name)?;
        let mut s = self.state.lock().unwrap();
        s.calls.push(ActuatorCall::Stop { name: name.to_owned() });
        if !s.stuck.contains(name) {
            s.running.remove(name);
        }
        Ok(())
    }

    fn is_actuator_running(&self, name: &str) -> bool {
        self.state.lock().unwrap().running.contains_key(name)
    }

    fn current_value(&self, name: &str) -> i32 {
        self.state.lock().unwrap().running.get(name).map_or(0, |v| v.round() as i32)
    }

    fn volume_added(&self, name: &str) -> f32 {
        self.state.lock().unwrap().added_ml.get(name).copied().unwrap_or(0.0)
    }

    fn volume_removed(&self, name: &str) -> f32 {
        self.state.lock().unwrap().removed_ml.get(name).copied().unwrap_or(0.0)
    }

    fn reset_volume_added(&self, name: &str) {
        self.state.lock().unwrap().added_ml.remove(name);
    }

    fn reset_volume_removed(&self, name: &str) {
        self.state.lock().unwrap().removed_ml.remove(name);
    }

    fn min_flow_rate(&self, _name: &str) -> f32 {
        1.0
    }

    fn max_flow_rate(&self, _name: &str) -> f32 {
        200.0
    }

    fn min_rpm(&self) -> f32 {
        390.0
    }

    fn max_rpm(&self) -> f32 {
        1500.0
    }
}

// ── LogSink ───────────────────────────────────────────────────

/// Event sink that keeps every event for later assertions.
#[derive(Default)]
pub struct LogSink {
    events: Mutex<Vec<AppEvent>>,
}

#[allow(dead_code)]
impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for LogSink {
    fn emit(&self, event: &AppEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ── Fixture ───────────────────────────────────────────────────

pub struct Rig {
    pub app: AppService,
    pub bus: Arc<MockBus>,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<LogSink>,
}

pub fn rig() -> Rig {
    let bus = Arc::new(MockBus::new());
    let clock = Arc::new(ManualClock::new());
    let sink = Arc::new(LogSink::new());
    let app = AppService::new(
        SystemConfig::default(),
        bus.clone(),
        bus.clone(),
        clock.clone(),
        sink.clone(),
    )
    .unwrap();
    app.start();
    Rig { app, bus, clock, sink }
}
