//! Drain the vessel at a fixed pump rate.
//!
//! Stops after the requested time, or earlier once the volume ledger
//! reports the minimum volume so the pump never runs the vessel dry.

use log::{info, warn};

use crate::app::commands::{Args, program_names};
use crate::error::{Error, ValidationError};
use crate::names;
use crate::plant::Plant;

use super::{MS_PER_SECOND, Parameters, Program, RunTimer, to_ms};

const OWNED: &[&str] = &[names::DRAIN_PUMP];

pub struct DrainProgram {
    plant: Plant,
    rate_percent: f32,
    duration_ms: u64,
    running: bool,
    paused: bool,
    timer: RunTimer,
}

impl DrainProgram {
    pub fn new(plant: Plant) -> Self {
        Self {
            plant,
            rate_percent: 0.0,
            duration_ms: 0,
            running: false,
            paused: false,
            timer: RunTimer::default(),
        }
    }

    fn run_pump(&self) -> Result<(), Error> {
        self.plant
            .actuators
            .run_actuator(names::DRAIN_PUMP, self.rate_percent, 0)
            .map_err(Error::from)
    }
}

impl Program for DrainProgram {
    fn name(&self) -> &'static str {
        program_names::DRAIN
    }

    /// `drain <rate_percent> <duration_s>`
    fn parse_command(&mut self, command: &str) -> Result<(), Error> {
        let args = Args::parse(command)?;
        if !args.command().eq_ignore_ascii_case("drain") {
            return Err(ValidationError::UnknownCommand.into());
        }
        let rate = args.positive(1, "rate")?;
        if rate > 100.0 {
            return Err(ValidationError::OutOfRange("rate").into());
        }
        let duration_ms = to_ms(args.positive(2, "duration")?, MS_PER_SECOND);
        self.rate_percent = rate;
        self.duration_ms = duration_ms;
        Ok(())
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.duration_ms == 0 {
            return Err(Error::Precondition("no parameters"));
        }
        if self.plant.volume().is_at_floor() {
            warn!("Drain: volume already at minimum, refusing to start");
            return Err(Error::Precondition("volume at minimum"));
        }
        self.run_pump()?;
        self.timer = RunTimer::start(self.plant.now_ms());
        self.running = true;
        self.paused = false;
        info!(
            "Drain started: {}% for {} s",
            self.rate_percent,
            self.duration_ms as f32 / MS_PER_SECOND
        );
        Ok(())
    }

    fn update(&mut self) {
        if !self.running || self.paused {
            return;
        }
        self.plant.reconcile_volume();
        if self.plant.volume().is_at_floor() {
            info!("Drain: minimum volume reached");
            self.stop();
            return;
        }
        if self.timer.elapsed_ms(self.plant.now_ms()) >= self.duration_ms {
            info!("Drain completed");
            self.stop();
        }
    }

    fn pause(&mut self) {
        if !self.running || self.paused {
            return;
        }
        self.paused = true;
        self.timer.pause(self.plant.now_ms());
        self.plant.stop_actuators(OWNED);
        self.plant.reconcile_volume();
        info!("Drain paused");
    }

    fn resume(&mut self) {
        if !self.running || !self.paused {
            return;
        }
        if let Err(e) = self.run_pump() {
            warn!("Drain: resume failed: {e}");
            return;
        }
        self.paused = false;
        self.timer.resume(self.plant.now_ms());
        info!("Drain resumed");
    }

    fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.plant.stop_actuators(OWNED);
        self.plant.reconcile_volume();
        info!("Drain stopped");
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn parameters(&self) -> Parameters {
        Parameters::new()
            .number("rate_percent", self.rate_percent)
            .number("duration_s", self.duration_ms as f32 / MS_PER_SECOND)
            .number("volume_l", self.plant.volume().current_volume())
    }

    fn owned_actuators(&self) -> &'static [&'static str] {
        OWNED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::ActuatorBus;
    use crate::plant::test_plant;

    #[test]
    fn drains_for_duration_and_updates_ledger() {
        let (plant, sim, clock) = test_plant();
        plant.volume().set_initial_volume(5.0).unwrap();
        let mut p = DrainProgram::new(plant.clone());
        p.parse_command("drain 10 30").unwrap();
        p.start().unwrap();
        assert_eq!(sim.current_value(names::DRAIN_PUMP), 10);

        clock.advance(30_000);
        p.update();
        assert!(!p.is_running());
        assert!(!sim.is_actuator_running(names::DRAIN_PUMP));
        // 10% of 1000 mL/min for 30 s.
        assert!((plant.volume().current_volume() - 4.95).abs() < 1e-3);
    }

    #[test]
    fn stops_at_minimum_volume() {
        let (plant, sim, clock) = test_plant();
        plant.volume().set_initial_volume(1.0).unwrap();
        let mut p = DrainProgram::new(plant.clone());
        p.parse_command("drain 100 600").unwrap();
        p.start().unwrap();
        clock.advance(60_000);
        p.update();
        assert!(!p.is_running());
        assert!(!sim.is_actuator_running(names::DRAIN_PUMP));
        assert!(plant.volume().is_at_floor());
        assert!(p.start().is_err());
    }

    #[test]
    fn rejects_bad_rate() {
        let (plant, _, _) = test_plant();
        let mut p = DrainProgram::new(plant);
        assert!(p.parse_command("drain 150 10").is_err());
        assert!(p.parse_command("drain 0 10").is_err());
        assert!(p.parse_command("drain 50").is_err());
    }

    #[test]
    fn pause_halts_the_pump() {
        let (plant, sim, clock) = test_plant();
        plant.volume().set_initial_volume(5.0).unwrap();
        let mut p = DrainProgram::new(plant);
        p.parse_command("drain 10 30").unwrap();
        p.start().unwrap();
        clock.advance(10_000);
        p.pause();
        assert!(!sim.is_actuator_running(names::DRAIN_PUMP));
        clock.advance(60_000);
        p.resume();
        assert!(sim.is_actuator_running(names::DRAIN_PUMP));
        clock.advance(19_000);
        p.update();
        assert!(p.is_running());
    }
}
