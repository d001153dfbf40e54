//! Actuator self-test.
//!
//! `tests` walks every fitted actuator in turn, running each at the test
//! value for one step; `test <actuator> <value> <duration_s>` runs a single
//! actuator. Steps advance on `update`, nothing here blocks.

use log::{info, warn};

use crate::app::commands::{Args, program_names};
use crate::config::ActuatorTestConfig;
use crate::error::{ActuatorError, Error, ValidationError};
use crate::names;
use crate::plant::Plant;

use super::{MS_PER_SECOND, Parameters, Program, RunTimer, to_ms};

const OWNED: &[&str] = &names::ALL_ACTUATORS;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Plan {
    Sequence,
    Single {
        actuator: &'static str,
        value: f32,
        duration_ms: u64,
    },
}

pub struct ActuatorTestProgram {
    plant: Plant,
    config: ActuatorTestConfig,
    plan: Option<Plan>,
    running: bool,
    paused: bool,
    step: usize,
    step_timer: RunTimer,
    passed: u8,
    failed: u8,
}

impl ActuatorTestProgram {
    pub fn new(plant: Plant, config: &ActuatorTestConfig) -> Self {
        Self {
            plant,
            config: *config,
            plan: None,
            running: false,
            paused: false,
            step: 0,
            step_timer: RunTimer::default(),
            passed: 0,
            failed: 0,
        }
    }

    fn step_count(&self) -> usize {
        match self.plan {
            Some(Plan::Sequence) => OWNED.len(),
            Some(Plan::Single { .. }) => 1,
            None => 0,
        }
    }

    /// Actuator, command value and length of step `index`.
    fn step_at(&self, index: usize) -> Option<(&'static str, f32, u64)> {
        match self.plan? {
            Plan::Sequence => {
                let actuator = *OWNED.get(index)?;
                Some((actuator, self.sequence_value(actuator), u64::from(self.config.step_ms)))
            }
            Plan::Single { actuator, value, duration_ms } => (index == 0).then_some((actuator, value, duration_ms)),
        }
    }

    /// Percent for most actuators; the stirrer takes the same share of its
    /// RPM range.
    fn sequence_value(&self, actuator: &str) -> f32 {
        let pct = self.config.test_value;
        if actuator == names::STIRRING_MOTOR {
            let (lo, hi) = (self.plant.actuators.min_rpm(), self.plant.actuators.max_rpm());
            lo + (hi - lo) * pct / 100.0
        } else {
            pct
        }
    }

    fn run_step(&mut self) {
        let Some((actuator, value, _)) = self.step_at(self.step) else {
            return;
        };
        match self.plant.actuators.run_actuator(actuator, value, 0) {
            Ok(()) => {
                info!("Tests: {actuator} at {value}");
                self.passed = self.passed.saturating_add(1);
            }
            Err(ActuatorError::NotFound) => info!("Tests: {actuator} not fitted, skipped"),
            Err(e) => {
                warn!("Tests: {actuator} failed: {e}");
                self.failed = self.failed.saturating_add(1);
            }
        }
    }

    fn stop_step(&self) {
        if let Some((actuator, _, _)) = self.step_at(self.step) {
            self.plant.stop_actuators(&[actuator]);
        }
    }
}

impl Program for ActuatorTestProgram {
    fn name(&self) -> &'static str {
        program_names::TESTS
    }

    fn parse_command(&mut self, command: &str) -> Result<(), Error> {
        let args = Args::parse(command)?;
        let plan = match args.command().to_ascii_lowercase().as_str() {
            "tests" => Plan::Sequence,
            "test" => {
                let requested = args.text(1, "actuator")?;
                let actuator = OWNED
                    .iter()
                    .copied()
                    .find(|n| n.eq_ignore_ascii_case(requested))
                    .ok_or(ValidationError::UnknownDevice)?;
                Plan::Single {
                    actuator,
                    value: args.non_negative(2, "value")?,
                    duration_ms: to_ms(args.positive(3, "duration")?, MS_PER_SECOND),
                }
            }
            _ => return Err(ValidationError::UnknownCommand.into()),
        };
        self.plan = Some(plan);
        Ok(())
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.plan.is_none() {
            return Err(Error::Precondition("no parameters"));
        }
        self.running = true;
        self.paused = false;
        self.step = 0;
        self.passed = 0;
        self.failed = 0;
        self.step_timer = RunTimer::start(self.plant.now_ms());
        info!("Tests started, {} step(s)", self.step_count());
        self.run_step();
        Ok(())
    }

    fn update(&mut self) {
        if !self.running || self.paused {
            return;
        }
        let Some((_, _, length)) = self.step_at(self.step) else {
            self.stop();
            return;
        };
        let now = self.plant.now_ms();
        if self.step_timer.elapsed_ms(now) < length {
            return;
        }
        self.stop_step();
        self.step += 1;
        if self.step >= self.step_count() {
            info!("Tests completed: {} ok, {} failed", self.passed, self.failed);
            self.stop();
            return;
        }
        self.step_timer = RunTimer::start(now);
        self.run_step();
    }

    fn pause(&mut self) {
        if !self.running || self.paused {
            return;
        }
        self.paused = true;
        self.step_timer.pause(self.plant.now_ms());
        self.stop_step();
        info!("Tests paused at step {}", self.step + 1);
    }

    fn resume(&mut self) {
        if !self.running || !self.paused {
            return;
        }
        self.paused = false;
        self.step_timer.resume(self.plant.now_ms());
        if let Some((actuator, value, _)) = self.step_at(self.step) {
            if let Err(e) = self.plant.actuators.run_actuator(actuator, value, 0) {
                warn!("Tests: {actuator} resume failed: {e}");
            }
        }
        info!("Tests resumed");
    }

    fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.plant.stop_actuators(OWNED);
        self.plant.reconcile_volume();
        info!("Tests stopped");
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn parameters(&self) -> Parameters {
        let params = Parameters::new()
            .number("step", (self.step + 1).min(self.step_count()) as f32)
            .number("steps", self.step_count() as f32)
            .number("passed", f32::from(self.passed))
            .number("failed", f32::from(self.failed));
        match self.step_at(self.step) {
            Some((actuator, value, _)) if self.running => params.text("actuator", actuator).number("value", value),
            _ => params,
        }
    }

    fn owned_actuators(&self) -> &'static [&'static str] {
        OWNED
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::sim::SimulatedPlant;
    use crate::adapters::time::ManualClock;
    use crate::app::ports::ActuatorBus;
    use crate::config::SystemConfig;
    use crate::plant::test_plant;

    fn program() -> (ActuatorTestProgram, Arc<SimulatedPlant>, Arc<ManualClock>) {
        let (plant, sim, clock) = test_plant();
        (ActuatorTestProgram::new(plant, &SystemConfig::default().actuator_tests), sim, clock)
    }

    #[test]
    fn sequence_runs_one_actuator_at_a_time() {
        let (mut p, sim, clock) = program();
        p.parse_command("tests").unwrap();
        p.start().unwrap();
        assert_eq!(sim.running_actuators().as_slice(), &[names::HEATING_PLATE]);

        clock.advance(5_000);
        p.update();
        assert_eq!(sim.running_actuators().as_slice(), &[names::BASE_PUMP]);

        for _ in 0..OWNED.len() {
            clock.advance(5_000);
            p.update();
        }
        assert!(!p.is_running());
        assert!(sim.running_actuators().is_empty());
        assert_eq!(p.parameters().get_number("passed"), Some(9.0));
    }

    #[test]
    fn stirrer_value_is_scaled_into_rpm_range() {
        let (mut p, sim, clock) = program();
        p.parse_command("tests").unwrap();
        p.start().unwrap();
        let stirrer = OWNED.iter().position(|n| *n == names::STIRRING_MOTOR).unwrap();
        for _ in 0..stirrer {
            clock.advance(5_000);
            p.update();
        }
        // 50% of 390..1500.
        assert_eq!(sim.current_value(names::STIRRING_MOTOR), 945);
    }

    #[test]
    fn single_actuator_test() {
        let (mut p, sim, clock) = program();
        p.parse_command("test airpump 40 10").unwrap();
        p.start().unwrap();
        assert_eq!(sim.current_value(names::AIR_PUMP), 40);
        clock.advance(9_999);
        p.update();
        assert!(p.is_running());
        clock.advance(1);
        p.update();
        assert!(!p.is_running());
        assert!(!sim.is_actuator_running(names::AIR_PUMP));
    }

    #[test]
    fn unknown_actuator_is_rejected() {
        let (mut p, _, _) = program();
        assert_eq!(
            p.parse_command("test flux_capacitor 1 1"),
            Err(Error::Validation(ValidationError::UnknownDevice))
        );
        assert!(p.start().is_err());
    }

    #[test]
    fn pause_holds_the_step() {
        let (mut p, sim, clock) = program();
        p.parse_command("test ledGrowLight 100 10").unwrap();
        p.start().unwrap();
        clock.advance(4_000);
        p.pause();
        assert!(!sim.is_actuator_running(names::LED_GROW_LIGHT));
        clock.advance(60_000);
        p.resume();
        assert!(sim.is_actuator_running(names::LED_GROW_LIGHT));
        clock.advance(5_000);
        p.update();
        assert!(p.is_running());
    }
}
