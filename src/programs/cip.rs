//! Clean-in-place: hold the vessel water at a cleaning temperature for a
//! fixed time.

use log::info;

use crate::app::commands::{Args, program_names};
use crate::control::manager::Variable;
use crate::error::{Error, ValidationError};
use crate::names;
use crate::plant::Plant;

use super::{MS_PER_MINUTE, Parameters, Program, RunTimer, to_ms};

const OWNED: &[&str] = &[names::HEATING_PLATE];

const MAX_CIP_TEMP_C: f32 = 95.0;

pub struct CipProgram {
    plant: Plant,
    target_c: f32,
    duration_ms: u64,
    running: bool,
    paused: bool,
    timer: RunTimer,
}

impl CipProgram {
    pub fn new(plant: Plant) -> Self {
        Self {
            plant,
            target_c: 0.0,
            duration_ms: 0,
            running: false,
            paused: false,
            timer: RunTimer::default(),
        }
    }
}

impl Program for CipProgram {
    fn name(&self) -> &'static str {
        program_names::CIP
    }

    /// `cip <target_temp_c> <duration_min>`
    fn parse_command(&mut self, command: &str) -> Result<(), Error> {
        let args = Args::parse(command)?;
        if !args.command().eq_ignore_ascii_case("cip") {
            return Err(ValidationError::UnknownCommand.into());
        }
        let target_c = args.positive(1, "target temperature")?;
        if target_c > MAX_CIP_TEMP_C {
            return Err(ValidationError::OutOfRange("target temperature").into());
        }
        let duration_ms = to_ms(args.positive(2, "duration")?, MS_PER_MINUTE);
        self.target_c = target_c;
        self.duration_ms = duration_ms;
        Ok(())
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.duration_ms == 0 {
            return Err(Error::Precondition("no parameters"));
        }
        self.timer = RunTimer::start(self.plant.now_ms());
        self.running = true;
        self.paused = false;
        self.plant.pid().start_loop(Variable::Temperature, self.target_c);
        info!(
            "CIP started: {} °C for {} min",
            self.target_c,
            self.duration_ms as f32 / MS_PER_MINUTE
        );
        Ok(())
    }

    fn update(&mut self) {
        if !self.running || self.paused {
            return;
        }
        self.plant.update_loops();
        if self.timer.elapsed_ms(self.plant.now_ms()) >= self.duration_ms {
            info!("CIP completed");
            self.stop();
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
            .pause_loop(Variable::Temperature, self.plant.actuators.as_ref());
        info!("CIP paused");
    }

    fn resume(&mut self) {
        if !self.running || !self.paused {
            return;
        }
        self.paused = false;
        self.timer.resume(self.plant.now_ms());
        self.plant.pid().resume_loop(Variable::Temperature);
        info!("CIP resumed");
    }

    fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.plant
            .pid()
            .stop_loop(Variable::Temperature, self.plant.actuators.as_ref());
        self.plant.stop_actuators(OWNED);
        info!("CIP stopped");
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn parameters(&self) -> Parameters {
        let elapsed_min = if self.running {
            self.timer.elapsed_ms(self.plant.now_ms()) as f32 / MS_PER_MINUTE
        } else {
            0.0
        };
        Parameters::new()
            .number("target_temp", self.target_c)
            .number("duration_min", self.duration_ms as f32 / MS_PER_MINUTE)
            .number("elapsed_min", elapsed_min)
    }

    fn owned_actuators(&self) -> &'static [&'static str] {
        OWNED
    }
}
