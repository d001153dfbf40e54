//! Pressure sterilization test.
//!
//! The heating plate builds pressure through the pressure loop. Hold time
//! only accumulates while the vessel is at pressure (within the loop's
//! hysteresis below the setpoint); dropping out of band pauses the count
//! rather than restarting it. If pressure is never reached within the
//! heat-up timeout the run is aborted.

use log::{error, info, warn};

use crate::app::commands::{Args, program_names};
use crate::control::manager::Variable;
use crate::error::{Error, ValidationError};
use crate::names;
use crate::plant::Plant;

use super::{MS_PER_MINUTE, Parameters, Program, RunTimer, to_ms};

const OWNED: &[&str] = &[names::HEATING_PLATE];

const DEFAULT_HEATUP_TIMEOUT_MIN: f32 = 60.0;
const MAX_PRESSURE_BAR: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    HeatingUp,
    Holding,
    Failed,
}

pub struct SterilizationProgram {
    plant: Plant,
    pressure_bar: f32,
    hold_ms: u64,
    heatup_timeout_ms: u64,
    running: bool,
    paused: bool,
    timer: RunTimer,
    phase: Phase,
    held_ms: u64,
    last_tick_ms: u64,
}

impl SterilizationProgram {
    pub fn new(plant: Plant) -> Self {
        Self {
            plant,
            pressure_bar: 0.0,
            hold_ms: 0,
            heatup_timeout_ms: to_ms(DEFAULT_HEATUP_TIMEOUT_MIN, MS_PER_MINUTE),
            running: false,
            paused: false,
            timer: RunTimer::default(),
            phase: Phase::HeatingUp,
            held_ms: 0,
            last_tick_ms: 0,
        }
    }

    fn at_pressure(&self) -> Option<bool> {
        let hysteresis = self.plant.pid().pid_loop(Variable::Pressure).tuning().hysteresis;
        match self.plant.sensors.read_sensor(names::PRESSURE_SENSOR) {
            Ok(bar) if bar.is_finite() => Some(bar >= self.pressure_bar - hysteresis),
            Ok(_) => None,
            Err(e) => {
                warn!("Sterilization: pressure read failed: {e}");
                None
            }
        }
    }

    fn phase_label(&self) -> &'static str {
        match self.phase {
            Phase::HeatingUp => "heating_up",
            Phase::Holding => "holding",
            Phase::Failed => "failed",
        }
    }
}

impl Program for SterilizationProgram {
    fn name(&self) -> &'static str {
        program_names::STERILIZATION
    }

    /// `sterilization <pressure_bar> <hold_min> [heatup_timeout_min]`
    fn parse_command(&mut self, command: &str) -> Result<(), Error> {
        let args = Args::parse(command)?;
        let word = args.command();
        if !(word.eq_ignore_ascii_case("sterilization") || word.eq_ignore_ascii_case("pressure_sterilization")) {
            return Err(ValidationError::UnknownCommand.into());
        }
        let pressure = args.positive(1, "pressure")?;
        if pressure > MAX_PRESSURE_BAR {
            return Err(ValidationError::OutOfRange("pressure").into());
        }
        let hold_ms = to_ms(args.positive(2, "hold time")?, MS_PER_MINUTE);
        let timeout = args
            .optional_positive(3, "heat-up timeout")?
            .unwrap_or(DEFAULT_HEATUP_TIMEOUT_MIN);

        self.pressure_bar = pressure;
        self.hold_ms = hold_ms;
        self.heatup_timeout_ms = to_ms(timeout, MS_PER_MINUTE);
        Ok(())
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.hold_ms == 0 {
            return Err(Error::Precondition("no parameters"));
        }
        let now = self.plant.now_ms();
        self.timer = RunTimer::start(now);
        self.last_tick_ms = now;
        self.held_ms = 0;
        self.phase = Phase::HeatingUp;
        self.running = true;
        self.paused = false;
        self.plant.pid().start_loop(Variable::Pressure, self.pressure_bar);
        info!(
            "Sterilization started: {} bar, hold {} min",
            self.pressure_bar,
            self.hold_ms as f32 / MS_PER_MINUTE
        );
        Ok(())
    }

    fn update(&mut self) {
        if !self.running || self.paused {
            return;
        }
        self.plant.update_loops();

        let now = self.plant.now_ms();
        let step = now.saturating_sub(self.last_tick_ms);
        self.last_tick_ms = now;

        if self.at_pressure() == Some(true) {
            if self.phase == Phase::HeatingUp {
                info!(
                    "Sterilization: {} bar reached after {} s",
                    self.pressure_bar,
                    self.timer.elapsed_ms(now) / 1000
                );
                self.phase = Phase::Holding;
            } else {
                self.held_ms += step;
            }
        }

        if self.held_ms >= self.hold_ms {
            info!("Sterilization completed");
            self.stop();
            return;
        }
        if self.phase == Phase::HeatingUp && self.timer.elapsed_ms(now) >= self.heatup_timeout_ms {
            error!(
                "Sterilization: {} bar not reached within {} min, aborting",
                self.pressure_bar,
                self.heatup_timeout_ms as f32 / MS_PER_MINUTE
            );
            self.stop();
            self.phase = Phase::Failed;
        }
    }

    fn pause(&mut self) {
        if !self.running || self.paused {
            return;
        }
        self.paused = true;
        self.timer.pause(self.plant.now_ms());
        self.plant
            .pid()
            .pause_loop(Variable::Pressure, self.plant.actuators.as_ref());
        info!("Sterilization paused, {} s held", self.held_ms / 1000);
    }

    fn resume(&mut self) {
        if !self.running || !self.paused {
            return;
        }
        let now = self.plant.now_ms();
        self.paused = false;
        self.timer.resume(now);
        self.last_tick_ms = now;
        self.plant.pid().resume_loop(Variable::Pressure);
        info!("Sterilization resumed");
    }

    fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.plant
            .pid()
            .stop_loop(Variable::Pressure, self.plant.actuators.as_ref());
        self.plant.stop_actuators(OWNED);
        info!("Sterilization stopped");
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn parameters(&self) -> Parameters {
        Parameters::new()
            .number("pressure_setpoint", self.pressure_bar)
            .number("hold_min", self.hold_ms as f32 / MS_PER_MINUTE)
            .number("held_min", self.held_ms as f32 / MS_PER_MINUTE)
            .number("heatup_timeout_min", self.heatup_timeout_ms as f32 / MS_PER_MINUTE)
            .text("phase", self.phase_label())
    }

    fn owned_actuators(&self) -> &'static [&'static str] {
        OWNED
    }
}
