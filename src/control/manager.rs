//! PID manager: one loop per regulated variable, routed to its actuator.
//!
//! ```text
//!   SensorBus ──▶ PidLoop (temperature) ──▶ heatingPlate
//!             ──▶ PidLoop (pH)          ──▶ basePump (flow-mapped pulses)
//!             ──▶ PidLoop (DO)          ──▶ airPump
//!             ──▶ PidLoop (pressure)    ──▶ heatingPlate
//!                        │
//!                        └── max |output| ──▶ stirringMotor
//! ```
//!
//! Each loop is throttled to its own interval. A sensor read that fails
//! skips that loop for one interval; the integrator never sees the value.

use log::{debug, info, warn};
use serde::Serialize;

use crate::app::commands::Args;
use crate::app::ports::{ActuatorBus, SensorBus};
use crate::config::{Gains, OutputMapping, SystemConfig};
use crate::error::{Error, ValidationError};
use crate::names;

use super::pid_loop::{LoopAction, PidLoop};

/// A physical variable under closed-loop control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum Variable {
    Temperature = 0,
    Ph = 1,
    DissolvedOxygen = 2,
    Pressure = 3,
}

impl Variable {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [Self::Temperature, Self::Ph, Self::DissolvedOxygen, Self::Pressure];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Ph => "ph",
            Self::DissolvedOxygen => "do",
            Self::Pressure => "pressure",
        }
    }

    pub const fn sensor(self) -> &'static str {
        match self {
            Self::Temperature => names::WATER_TEMP_SENSOR,
            Self::Ph => names::PH_SENSOR,
            Self::DissolvedOxygen => names::OXYGEN_SENSOR,
            Self::Pressure => names::PRESSURE_SENSOR,
        }
    }

    pub const fn actuator(self) -> &'static str {
        match self {
            Self::Temperature | Self::Pressure => names::HEATING_PLATE,
            Self::Ph => names::BASE_PUMP,
            Self::DissolvedOxygen => names::AIR_PUMP,
        }
    }

    pub fn parse(word: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.label().eq_ignore_ascii_case(word))
            .or_else(|| match word.to_ascii_lowercase().as_str() {
                "temp" => Some(Self::Temperature),
                "oxygen" | "dissolved_oxygen" => Some(Self::DissolvedOxygen),
                _ => None,
            })
    }
}

/// Per-loop summary for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoopStatus {
    pub variable: Variable,
    pub running: bool,
    pub paused: bool,
    pub setpoint: f32,
    pub input: f32,
    pub output: f32,
}

pub struct PidManager {
    loops: [PidLoop; Variable::COUNT],
    /// Stirring is only managed while a program sets a floor.
    stirring_floor: Option<f32>,
    last_stirring_rpm: Option<f32>,
}

impl PidManager {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            loops: [
                PidLoop::new(Variable::Temperature.label(), config.temperature),
                PidLoop::new(Variable::Ph.label(), config.ph),
                PidLoop::new(Variable::DissolvedOxygen.label(), config.dissolved_oxygen),
                PidLoop::new(Variable::Pressure.label(), config.pressure),
            ],
            stirring_floor: None,
            last_stirring_rpm: None,
        }
    }

    fn slot(&self, variable: Variable) -> &PidLoop {
        &self.loops[variable as usize]
    }

    fn slot_mut(&mut self, variable: Variable) -> &mut PidLoop {
        &mut self.loops[variable as usize]
    }

    // ── Loop lifecycle ────────────────────────────────────────

    /// Start regulating `variable`. A running loop that shares the same
    /// actuator is stopped first.
    pub fn start_loop(&mut self, variable: Variable, setpoint: f32) {
        for other in Variable::ALL {
            if other != variable && other.actuator() == variable.actuator() && self.slot(other).is_running() {
                warn!(
                    "PID {} shares {} with {}; stopping it",
                    other.label(),
                    variable.actuator(),
                    variable.label()
                );
                self.slot_mut(other).stop();
            }
        }
        self.slot_mut(variable).start(setpoint);
    }

    pub fn stop_loop(&mut self, variable: Variable, actuators: &dyn ActuatorBus) {
        self.slot_mut(variable).stop();
        stop_quietly(actuators, variable.actuator());
    }

    pub fn set_setpoint(&mut self, variable: Variable, setpoint: f32) {
        self.slot_mut(variable).set_setpoint(setpoint);
    }

    pub fn set_hysteresis(&mut self, variable: Variable, band: f32) {
        self.slot_mut(variable).set_hysteresis(band);
    }

    pub fn set_gains(&mut self, variable: Variable, gains: Gains) {
        self.slot_mut(variable).set_gains(gains);
        info!(
            "PID {} gains set to kp={} ki={} kd={}",
            variable.label(),
            gains.kp,
            gains.ki,
            gains.kd
        );
    }

    /// Enable stirring management with a minimum speed, or disable it.
    pub fn set_stirring_floor(&mut self, floor_rpm: Option<f32>) {
        self.stirring_floor = floor_rpm;
        self.last_stirring_rpm = None;
    }

    pub fn stirring_floor(&self) -> Option<f32> {
        self.stirring_floor
    }

    /// Suspend one loop and force its actuator off. The integrator and gain
    /// phase are kept.
    pub fn pause_loop(&mut self, variable: Variable, actuators: &dyn ActuatorBus) {
        self.slot_mut(variable).pause();
        stop_quietly(actuators, variable.actuator());
    }

    pub fn resume_loop(&mut self, variable: Variable) {
        self.slot_mut(variable).resume();
    }

    /// Suspend every loop. Integrators are kept.
    pub fn pause_all(&mut self) {
        for l in &mut self.loops {
            l.pause();
        }
    }

    /// Resume every paused loop; each evaluates on the next update.
    pub fn resume_all(&mut self) {
        for l in &mut self.loops {
            l.resume();
        }
        self.last_stirring_rpm = None;
    }

    /// Tear down every loop and force the associated actuators off.
    pub fn stop(&mut self, actuators: &dyn ActuatorBus) {
        for variable in Variable::ALL {
            self.slot_mut(variable).stop();
            stop_quietly(actuators, variable.actuator());
        }
        if self.stirring_floor.take().is_some() {
            stop_quietly(actuators, names::STIRRING_MOTOR);
        }
        self.last_stirring_rpm = None;
    }

    // ── Periodic update ───────────────────────────────────────

    /// Evaluate every due loop and apply its action. Returns `true` when at
    /// least one loop was evaluated.
    pub fn update_all(&mut self, sensors: &dyn SensorBus, actuators: &dyn ActuatorBus, now_ms: u64) -> bool {
        let mut evaluated = false;
        for variable in Variable::ALL {
            let l = self.slot_mut(variable);
            if !l.is_due(now_ms) {
                continue;
            }
            let reading = match sensors.read_sensor(variable.sensor()) {
                Ok(v) if v.is_finite() => v,
                Ok(_) => {
                    warn!("PID {}: non-finite reading, skipping cycle", variable.label());
                    l.skip_cycle(now_ms);
                    continue;
                }
                Err(e) => {
                    warn!("PID {}: {} ({e}), skipping cycle", variable.label(), variable.sensor());
                    l.skip_cycle(now_ms);
                    continue;
                }
            };
            let mapping = l.tuning().mapping;
            let action = l.evaluate(reading, now_ms);
            evaluated = true;
            apply_action(actuators, variable, mapping, action);
        }
        if evaluated {
            self.adjust_stirring(actuators);
        }
        evaluated
    }

    /// Stirring speed for the current aggregate demand, or `None` when
    /// stirring is not managed.
    pub fn stirring_speed(&self, min_rpm: f32, max_rpm: f32) -> Option<f32> {
        let floor = self.stirring_floor?;
        let demand = self
            .loops
            .iter()
            .filter(|l| l.is_running() && !l.is_paused())
            .map(|l| l.output().abs())
            .fold(0.0_f32, f32::max)
            .min(100.0);
        let mapped = min_rpm + (max_rpm - min_rpm) * demand / 100.0;
        Some(mapped.max(floor).max(min_rpm).min(max_rpm))
    }

    fn adjust_stirring(&mut self, actuators: &dyn ActuatorBus) {
        let Some(rpm) = self.stirring_speed(actuators.min_rpm(), actuators.max_rpm()) else {
            return;
        };
        let unchanged = self
            .last_stirring_rpm
            .is_some_and(|last| (last - rpm).abs() < 1.0)
            && actuators.is_actuator_running(names::STIRRING_MOTOR);
        if unchanged {
            return;
        }
        match actuators.run_actuator(names::STIRRING_MOTOR, rpm, 0) {
            Ok(()) => {
                debug!("stirring set to {rpm:.0} rpm");
                self.last_stirring_rpm = Some(rpm);
            }
            Err(e) => warn!("stirring: {e}"),
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn is_running(&self, variable: Variable) -> bool {
        self.slot(variable).is_running()
    }

    pub fn output(&self, variable: Variable) -> f32 {
        self.slot(variable).output()
    }

    pub fn pid_loop(&self, variable: Variable) -> &PidLoop {
        self.slot(variable)
    }

    pub fn status(&self) -> [LoopStatus; Variable::COUNT] {
        Variable::ALL.map(|variable| {
            let l = self.slot(variable);
            LoopStatus {
                variable,
                running: l.is_running(),
                paused: l.is_paused(),
                setpoint: l.setpoint(),
                input: l.input(),
                output: l.output(),
            }
        })
    }

    // ── Command parser ────────────────────────────────────────

    /// `set_pid <variable> <kp> <ki> <kd>` or `set_hysteresis <variable> <band>`.
    pub fn parse_command(&mut self, command: &str) -> Result<(), Error> {
        let args = Args::parse(command)?;
        let variable = args
            .text(1, "variable")
            .and_then(|w| Variable::parse(w).ok_or(ValidationError::OutOfRange("variable")))?;
        match args.command() {
            c if c.eq_ignore_ascii_case("set_pid") => {
                let gains = Gains::new(
                    args.non_negative(2, "kp")?,
                    args.non_negative(3, "ki")?,
                    args.non_negative(4, "kd")?,
                );
                self.set_gains(variable, gains);
                Ok(())
            }
            c if c.eq_ignore_ascii_case("set_hysteresis") => {
                let band = args.non_negative(2, "band")?;
                self.set_hysteresis(variable, band);
                info!("PID {} hysteresis set to {band}", variable.label());
                Ok(())
            }
            _ => Err(ValidationError::UnknownCommand.into()),
        }
    }
}

// ── Output routing ────────────────────────────────────────────

fn apply_action(actuators: &dyn ActuatorBus, variable: Variable, mapping: OutputMapping, action: LoopAction) {
    let name = variable.actuator();
    match action {
        LoopAction::Idle | LoopAction::Wait => {}
        LoopAction::Hold => {
            if actuators.is_actuator_running(name) {
                debug!("PID {} inside band, {name} off", variable.label());
                stop_quietly(actuators, name);
            }
        }
        LoopAction::Drive { demand, duration_ms } => {
            if demand <= 0.0 {
                if actuators.is_actuator_running(name) {
                    stop_quietly(actuators, name);
                }
                return;
            }
            let value = match mapping {
                OutputMapping::Percent => demand.min(100.0),
                OutputMapping::FlowRate { cap_ml_per_min } => {
                    let min = actuators.min_flow_rate(name);
                    let max = actuators.max_flow_rate(name).min(cap_ml_per_min).max(min);
                    min + (max - min) * demand.min(100.0) / 100.0
                }
            };
            if let Err(e) = actuators.run_actuator(name, value, duration_ms) {
                warn!("PID {}: run {name}: {e}", variable.label());
            }
        }
    }
}

fn stop_quietly(actuators: &dyn ActuatorBus, name: &str) {
    if let Err(e) = actuators.stop_actuator(name) {
        debug!("stop {name}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim::SimulatedPlant;
    use crate::adapters::time::ManualClock;
    use crate::error::SensorError;
    use std::sync::Arc;

    fn setup() -> (PidManager, SimulatedPlant) {
        let clock = Arc::new(ManualClock::new());
        (PidManager::new(&SystemConfig::default()), SimulatedPlant::new(clock))
    }

    #[test]
    fn nothing_commanded_while_loops_stopped() {
        let (mut pid, plant) = setup();
        plant.set_sensor(names::WATER_TEMP_SENSOR, 20.0);
        assert!(!pid.update_all(&plant, &plant, 0));
        assert!(!plant.is_actuator_running(names::HEATING_PLATE));
    }

    #[test]
    fn temperature_loop_heats_then_holds_inside_band() {
        let (mut pid, plant) = setup();
        pid.start_loop(Variable::Temperature, 37.0);
        plant.set_sensor(names::WATER_TEMP_SENSOR, 30.0);
        pid.update_all(&plant, &plant, 0);
        assert!(plant.is_actuator_running(names::HEATING_PLATE));
        assert!(pid.output(Variable::Temperature) > 0.0);

        plant.set_sensor(names::WATER_TEMP_SENSOR, 37.3);
        pid.update_all(&plant, &plant, 5_000);
        assert!(!plant.is_actuator_running(names::HEATING_PLATE));
        assert!(pid.output(Variable::Temperature) > 0.0, "computed output kept");
        assert!(pid.is_running(Variable::Temperature));
    }

    #[test]
    fn sensor_fault_skips_cycle_without_touching_integrator() {
        let (mut pid, plant) = setup();
        pid.start_loop(Variable::Temperature, 37.0);
        plant.set_sensor(names::WATER_TEMP_SENSOR, 36.0);
        pid.update_all(&plant, &plant, 0);
        let integral = pid.pid_loop(Variable::Temperature).integral();
        let value = plant.current_value(names::HEATING_PLATE);

        plant.fail_sensor(names::WATER_TEMP_SENSOR, SensorError::ReadFailed);
        pid.update_all(&plant, &plant, 5_000);
        assert_eq!(pid.pid_loop(Variable::Temperature).integral(), integral);
        assert_eq!(plant.current_value(names::HEATING_PLATE), value);
    }

    #[test]
    fn ph_output_is_flow_mapped_and_capped() {
        let (mut pid, plant) = setup();
        pid.start_loop(Variable::Ph, 7.0);
        plant.set_sensor(names::PH_SENSOR, 4.0);
        pid.update_all(&plant, &plant, 0);
        assert!(plant.is_actuator_running(names::BASE_PUMP));
        assert!(plant.current_value(names::BASE_PUMP) <= 10);
    }

    #[test]
    fn stirring_follows_demand_with_floor() {
        let (mut pid, plant) = setup();
        pid.set_stirring_floor(Some(500.0));
        assert_eq!(pid.stirring_speed(200.0, 1500.0), Some(500.0));
        pid.start_loop(Variable::Temperature, 37.0);
        plant.set_sensor(names::WATER_TEMP_SENSOR, 36.0);
        pid.update_all(&plant, &plant, 0);
        let rpm = pid.stirring_speed(200.0, 1500.0).unwrap();
        assert!(rpm >= 500.0 && rpm <= 1500.0);
        assert!(plant.is_actuator_running(names::STIRRING_MOTOR));
    }

    #[test]
    fn stirring_unmanaged_without_floor() {
        let (pid, _) = setup();
        assert_eq!(pid.stirring_speed(200.0, 1500.0), None);
    }

    #[test]
    fn stop_forces_all_actuators_off() {
        let (mut pid, plant) = setup();
        pid.set_stirring_floor(Some(500.0));
        pid.start_loop(Variable::Temperature, 37.0);
        pid.start_loop(Variable::DissolvedOxygen, 40.0);
        plant.set_sensor(names::WATER_TEMP_SENSOR, 30.0);
        plant.set_sensor(names::OXYGEN_SENSOR, 10.0);
        pid.update_all(&plant, &plant, 0);
        assert!(plant.is_actuator_running(names::AIR_PUMP));

        pid.stop(&plant);
        for name in [names::HEATING_PLATE, names::AIR_PUMP, names::STIRRING_MOTOR] {
            assert!(!plant.is_actuator_running(name), "{name} still running");
        }
        assert!(!pid.is_running(Variable::Temperature));
    }

    #[test]
    fn pause_loop_turns_actuator_off_and_keeps_integrator() {
        let (mut pid, plant) = setup();
        pid.start_loop(Variable::Temperature, 37.0);
        plant.set_sensor(names::WATER_TEMP_SENSOR, 36.0);
        pid.update_all(&plant, &plant, 0);
        let integral = pid.pid_loop(Variable::Temperature).integral();
        assert!(integral > 0.0);

        pid.pause_loop(Variable::Temperature, &plant);
        assert!(!plant.is_actuator_running(names::HEATING_PLATE));
        assert!(pid.pid_loop(Variable::Temperature).is_paused());
        assert!(!pid.update_all(&plant, &plant, 60_000));

        pid.resume_loop(Variable::Temperature);
        assert_eq!(pid.pid_loop(Variable::Temperature).integral(), integral);
        assert!(pid.update_all(&plant, &plant, 60_000));
    }

    #[test]
    fn pressure_loop_displaces_temperature_loop() {
        let (mut pid, _) = setup();
        pid.start_loop(Variable::Temperature, 37.0);
        pid.start_loop(Variable::Pressure, 1.0);
        assert!(!pid.is_running(Variable::Temperature));
        assert!(pid.is_running(Variable::Pressure));
    }

    #[test]
    fn parse_set_pid_updates_active_gains() {
        let (mut pid, _) = setup();
        pid.parse_command("set_pid temperature 4 0.5 0.1").unwrap();
        let g = pid.pid_loop(Variable::Temperature).tuning().startup;
        assert_eq!(g, Gains::new(4.0, 0.5, 0.1));
        assert!(pid.parse_command("set_pid humidity 1 1 1").is_err());
        assert!(pid.parse_command("set_pid ph -1 0 0").is_err());
    }
}
