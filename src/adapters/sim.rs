//! Simulated plant.
//!
//! Implements [`SensorBus`] and [`ActuatorBus`] in memory so the control
//! core runs on the host: the simulator binary drives it with a
//! [`SystemClock`](super::time::SystemClock), the tests with a
//! [`ManualClock`](super::time::ManualClock).
//!
//! Time is integrated lazily: every bus call first advances the model to
//! the clock's current time. Pumps accumulate delivered volume from their
//! flow and running time, timed runs expire on their own, and with physics
//! enabled the heater, base pump and air pump move the water temperature,
//! pH and dissolved oxygen.
//!
//! Fault injection: [`fail_sensor`](SimulatedPlant::fail_sensor) makes a
//! read return an error, [`set_stuck`](SimulatedPlant::set_stuck) makes an
//! actuator ignore stop commands.

use std::sync::{Arc, Mutex};

use heapless::Vec;

use crate::app::ports::{ActuatorBus, Clock, SensorBus};
use crate::error::{ActuatorError, SensorError};
use crate::names;
use crate::plant::lock;

const MAX_DEVICES: usize = 12;

/// Where a pump's flow goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Adds,
    Removes,
    None,
}

/// How the simulated actuator interprets `value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorKind {
    /// Percent power.
    Heater,
    /// `value` is mL/min within `[min, max]`.
    DosingPump { min_ml_per_min: f32, max_ml_per_min: f32 },
    /// `value` is percent of `max_ml_per_min`.
    PercentPump { max_ml_per_min: f32, flow: Flow },
    /// `value` is RPM within the plant's stirring range.
    Stirrer,
    /// Percent, no side effects.
    Switch,
}

#[derive(Debug, Clone, Copy)]
struct ActuatorState {
    name: &'static str,
    kind: ActuatorKind,
    running: bool,
    value: f32,
    run_until_ms: Option<u64>,
    added_ml: f32,
    removed_ml: f32,
    stuck: bool,
}

#[derive(Debug, Clone, Copy)]
struct SensorState {
    name: &'static str,
    value: f32,
    fault: Option<SensorError>,
}

struct State {
    actuators: Vec<ActuatorState, MAX_DEVICES>,
    sensors: Vec<SensorState, MAX_DEVICES>,
    last_sync_ms: u64,
    physics: bool,
}

/// In-memory bioreactor.
pub struct SimulatedPlant {
    clock: Arc<dyn Clock>,
    min_rpm: f32,
    max_rpm: f32,
    state: Mutex<State>,
}

// Model constants.
const AMBIENT_C: f32 = 22.0;
/// °C per second at full heater power.
const HEATER_GAIN: f32 = 0.01;
/// Fraction of the ambient gap lost per second.
const HEAT_LOSS: f32 = 0.000_2;
/// pH rise per mL of base.
const PH_PER_ML: f32 = 0.002;
/// Acidification by metabolism, pH per second.
const PH_DRIFT: f32 = 0.000_01;
/// DO percent per second at full aeration.
const AERATION_GAIN: f32 = 0.2;
/// DO consumption, percent per second.
const DO_UPTAKE: f32 = 0.01;

impl SimulatedPlant {
    /// All fermenter actuators, no sensors, no physics.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        let mut actuators = Vec::new();
        for (name, kind) in [
            (names::HEATING_PLATE, ActuatorKind::Heater),
            (names::BASE_PUMP, ActuatorKind::DosingPump { min_ml_per_min: 0.5, max_ml_per_min: 30.0 }),
            (names::NUTRIENT_PUMP, ActuatorKind::DosingPump { min_ml_per_min: 1.0, max_ml_per_min: 200.0 }),
            (names::AIR_PUMP, ActuatorKind::PercentPump { max_ml_per_min: 0.0, flow: Flow::None }),
            (names::DRAIN_PUMP, ActuatorKind::PercentPump { max_ml_per_min: 1_000.0, flow: Flow::Removes }),
            (names::SAMPLE_PUMP, ActuatorKind::PercentPump { max_ml_per_min: 50.0, flow: Flow::Removes }),
            (names::FILL_PUMP, ActuatorKind::PercentPump { max_ml_per_min: 1_000.0, flow: Flow::Adds }),
            (names::STIRRING_MOTOR, ActuatorKind::Stirrer),
            (names::LED_GROW_LIGHT, ActuatorKind::Switch),
        ] {
            // Capacity exceeds the fixed list above.
            let _ = actuators.push(ActuatorState {
                name,
                kind,
                running: false,
                value: 0.0,
                run_until_ms: None,
                added_ml: 0.0,
                removed_ml: 0.0,
                stuck: false,
            });
        }
        Self {
            clock,
            min_rpm: 390.0,
            max_rpm: 1_500.0,
            state: Mutex::new(State {
                actuators,
                sensors: Vec::new(),
                last_sync_ms: now,
                physics: false,
            }),
        }
    }

    /// Fully populated fermenter with plausible starting readings and the
    /// physical model enabled.
    pub fn fermenter(clock: Arc<dyn Clock>) -> Self {
        let plant = Self::new(clock);
        for (name, value) in [
            (names::WATER_TEMP_SENSOR, 25.0),
            (names::AIR_TEMP_SENSOR, AMBIENT_C),
            (names::ELECTRONIC_TEMP_SENSOR, 35.0),
            (names::PH_SENSOR, 7.0),
            (names::OXYGEN_SENSOR, 60.0),
            (names::TURBIDITY_SENSOR, 50.0),
            (names::PRESSURE_SENSOR, 1.0),
        ] {
            plant.set_sensor(name, value);
        }
        lock(&plant.state).physics = true;
        plant
    }

    // ── Test and fault-injection controls ─────────────────────

    /// Set (or register) a sensor reading and clear any injected fault.
    pub fn set_sensor(&self, name: &'static str, value: f32) {
        let mut s = lock(&self.state);
        if let Some(sensor) = s.sensors.iter_mut().find(|x| x.name == name) {
            sensor.value = value;
            sensor.fault = None;
        } else {
            let _ = s.sensors.push(SensorState { name, value, fault: None });
        }
    }

    pub fn fail_sensor(&self, name: &str, fault: SensorError) {
        let mut s = lock(&self.state);
        if let Some(sensor) = s.sensors.iter_mut().find(|x| x.name == name) {
            sensor.fault = Some(fault);
        }
    }

    /// A stuck actuator accepts stop commands but keeps running.
    pub fn set_stuck(&self, name: &str, stuck: bool) {
        let mut s = lock(&self.state);
        if let Some(a) = s.actuators.iter_mut().find(|a| a.name == name) {
            a.stuck = stuck;
        }
    }

    pub fn inject_volume_added(&self, name: &str, ml: f32) {
        let mut s = lock(&self.state);
        if let Some(a) = s.actuators.iter_mut().find(|a| a.name == name) {
            a.added_ml += ml;
        }
    }

    pub fn inject_volume_removed(&self, name: &str, ml: f32) {
        let mut s = lock(&self.state);
        if let Some(a) = s.actuators.iter_mut().find(|a| a.name == name) {
            a.removed_ml += ml;
        }
    }

    /// Names of actuators currently running.
    pub fn running_actuators(&self) -> Vec<&'static str, MAX_DEVICES> {
        let mut s = lock(&self.state);
        self.sync(&mut s);
        s.actuators.iter().filter(|a| a.running).map(|a| a.name).collect()
    }

    // ── Model ─────────────────────────────────────────────────

    fn sync(&self, s: &mut State) {
        let now = self.clock.now_ms();
        let from = s.last_sync_ms;
        if now <= from {
            return;
        }
        s.last_sync_ms = now;

        let mut heater_s = 0.0_f32;
        let mut base_ml = 0.0_f32;
        let mut air_pct_s = 0.0_f32;
        for a in s.actuators.iter_mut().filter(|a| a.running) {
            let until = a.run_until_ms.map_or(now, |u| u.min(now));
            let active_ms = until.saturating_sub(from) as f32;
            let minutes = active_ms / 60_000.0;
            match a.kind {
                ActuatorKind::Heater => heater_s += a.value / 100.0 * active_ms / 1000.0,
                ActuatorKind::DosingPump { .. } => {
                    let ml = a.value * minutes;
                    a.added_ml += ml;
                    if a.name == names::BASE_PUMP {
                        base_ml += ml;
                    }
                }
                ActuatorKind::PercentPump { max_ml_per_min, flow } => {
                    let ml = max_ml_per_min * a.value / 100.0 * minutes;
                    match flow {
                        Flow::Adds => a.added_ml += ml,
                        Flow::Removes => a.removed_ml += ml,
                        Flow::None => {}
                    }
                    if a.name == names::AIR_PUMP {
                        air_pct_s += a.value / 100.0 * active_ms / 1000.0;
                    }
                }
                ActuatorKind::Stirrer | ActuatorKind::Switch => {}
            }
            if a.run_until_ms.is_some_and(|u| u <= now) {
                a.running = false;
                a.value = 0.0;
                a.run_until_ms = None;
            }
        }

        if !s.physics {
            return;
        }
        let dt_s = (now - from) as f32 / 1000.0;
        for sensor in &mut s.sensors {
            match sensor.name {
                names::WATER_TEMP_SENSOR => {
                    sensor.value += HEATER_GAIN * heater_s - HEAT_LOSS * (sensor.value - AMBIENT_C) * dt_s;
                }
                names::PH_SENSOR => {
                    sensor.value = (sensor.value + PH_PER_ML * base_ml - PH_DRIFT * dt_s).clamp(0.0, 14.0);
                }
                names::OXYGEN_SENSOR => {
                    sensor.value = (sensor.value + AERATION_GAIN * air_pct_s - DO_UPTAKE * dt_s).clamp(0.0, 100.0);
                }
                _ => {}
            }
        }
    }

    fn with_actuator<R>(&self, name: &str, f: impl FnOnce(&mut ActuatorState) -> R) -> Option<R> {
        let mut s = lock(&self.state);
        self.sync(&mut s);
        s.actuators.iter_mut().find(|a| a.name == name).map(f)
    }

    fn clamp_value(&self, kind: ActuatorKind, value: f32) -> f32 {
        match kind {
            ActuatorKind::DosingPump { min_ml_per_min, max_ml_per_min } => value.max(min_ml_per_min).min(max_ml_per_min),
            ActuatorKind::Stirrer => value.max(self.min_rpm).min(self.max_rpm),
            ActuatorKind::Heater | ActuatorKind::PercentPump { .. } | ActuatorKind::Switch => value.clamp(0.0, 100.0),
        }
    }
}

// ── SensorBus implementation ──────────────────────────────────

impl SensorBus for SimulatedPlant {
    fn read_sensor(&self, name: &str) -> Result<f32, SensorError> {
        let mut s = lock(&self.state);
        self.sync(&mut s);
        let sensor = s
            .sensors
            .iter()
            .find(|x| x.name == name)
            .ok_or(SensorError::NotFound)?;
        match sensor.fault {
            Some(fault) => Err(fault),
            None => Ok(sensor.value),
        }
    }
}

// ── ActuatorBus implementation ────────────────────────────────

impl ActuatorBus for SimulatedPlant {
    fn run_actuator(&self, name: &str, value: f32, duration_ms: u32) -> Result<(), ActuatorError> {
        if !value.is_finite() {
            return Err(ActuatorError::CommandFailed);
        }
        let now = self.clock.now_ms();
        self.with_actuator(name, |a| {
            a.value = if value > 0.0 { self.clamp_value(a.kind, value) } else { 0.0 };
            a.running = a.value > 0.0 || (a.stuck && a.running);
            a.run_until_ms = (duration_ms > 0).then(|| now + u64::from(duration_ms));
        })
        .ok_or(ActuatorError::NotFound)
    }

    fn stop_actuator(&self, name: &str) -> Result<(), ActuatorError> {
        self.with_actuator(name, |a| {
            if !a.stuck {
                a.running = false;
                a.value = 0.0;
                a.run_until_ms = None;
            }
        })
        .ok_or(ActuatorError::NotFound)
    }

    fn is_actuator_running(&self, name: &str) -> bool {
        self.with_actuator(name, |a| a.running).unwrap_or(false)
    }

    fn current_value(&self, name: &str) -> i32 {
        self.with_actuator(name, |a| if a.running { a.value.round() as i32 } else { 0 })
            .unwrap_or(0)
    }

    fn volume_added(&self, name: &str) -> f32 {
        self.with_actuator(name, |a| a.added_ml).unwrap_or(0.0)
    }

    fn volume_removed(&self, name: &str) -> f32 {
        self.with_actuator(name, |a| a.removed_ml).unwrap_or(0.0)
    }

    fn reset_volume_added(&self, name: &str) {
        self.with_actuator(name, |a| a.added_ml = 0.0);
    }

    fn reset_volume_removed(&self, name: &str) {
        self.with_actuator(name, |a| a.removed_ml = 0.0);
    }

    fn min_flow_rate(&self, name: &str) -> f32 {
        self.with_actuator(name, |a| match a.kind {
            ActuatorKind::DosingPump { min_ml_per_min, .. } => min_ml_per_min,
            _ => 0.0,
        })
        .unwrap_or(0.0)
    }

    fn max_flow_rate(&self, name: &str) -> f32 {
        self.with_actuator(name, |a| match a.kind {
            ActuatorKind::DosingPump { max_ml_per_min, .. } | ActuatorKind::PercentPump { max_ml_per_min, .. } => {
                max_ml_per_min
            }
            _ => 0.0,
        })
        .unwrap_or(0.0)
    }

    fn min_rpm(&self) -> f32 {
        self.min_rpm
    }

    fn max_rpm(&self) -> f32 {
        self.max_rpm
    }
}
