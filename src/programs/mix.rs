//! Stir at a fixed speed, indefinitely or for a set time.

use log::{info, warn};

use crate::app::commands::{Args, program_names};
use crate::error::{Error, ValidationError};
use crate::names;
use crate::plant::Plant;

use super::{MS_PER_MINUTE, Parameters, Program, RunTimer, to_ms};

const OWNED: &[&str] = &[names::STIRRING_MOTOR];

pub struct MixProgram {
    plant: Plant,
    speed_rpm: f32,
    duration_ms: Option<u64>,
    configured: bool,
    running: bool,
    paused: bool,
    timer: RunTimer,
}

impl MixProgram {
    pub fn new(plant: Plant) -> Self {
        Self {
            plant,
            speed_rpm: 0.0,
            duration_ms: None,
            configured: false,
            running: false,
            paused: false,
            timer: RunTimer::default(),
        }
    }

    fn run_motor(&self) -> Result<(), Error> {
        self.plant
            .actuators
            .run_actuator(names::STIRRING_MOTOR, self.speed_rpm, 0)
            .map_err(Error::from)
    }
}

impl Program for MixProgram {
    fn name(&self) -> &'static str {
        program_names::MIX
    }

    /// `mix <speed_rpm> [duration_min]`; speed is clamped to the motor range.
    fn parse_command(&mut self, command: &str) -> Result<(), Error> {
        let args = Args::parse(command)?;
        if !args.command().eq_ignore_ascii_case("mix") {
            return Err(ValidationError::UnknownCommand.into());
        }
        let requested = args.positive(1, "speed")?;
        let duration = args.optional_positive(2, "duration")?;

        let actuators = &self.plant.actuators;
        let speed = requested.max(actuators.min_rpm()).min(actuators.max_rpm());
        if speed != requested {
            warn!("Mix: {requested} rpm clamped to {speed} rpm");
        }
        self.speed_rpm = speed;
        self.duration_ms = duration.map(|d| to_ms(d, MS_PER_MINUTE));
        self.configured = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), Error> {
        if !self.configured {
            return Err(Error::Precondition("no parameters"));
        }
        self.run_motor()?;
        self.timer = RunTimer::start(self.plant.now_ms());
        self.running = true;
        self.paused = false;
        info!("Mix started at {} rpm", self.speed_rpm);
        Ok(())
    }

    fn update(&mut self) {
        if !self.running || self.paused {
            return;
        }
        if let Some(duration) = self.duration_ms {
            if self.timer.elapsed_ms(self.plant.now_ms()) >= duration {
                info!("Mix completed");
                self.stop();
            }
        }
    }

    fn pause(&mut self) {
        if !self.running || self.paused {
            return;
        }
        self.paused = true;
        self.timer.pause(self.plant.now_ms());
        self.plant.stop_actuators(OWNED);
        info!("Mix paused");
    }

    fn resume(&mut self) {
        if !self.running || !self.paused {
            return;
        }
        if let Err(e) = self.run_motor() {
            warn!("Mix: resume failed: {e}");
            return;
        }
        self.paused = false;
        self.timer.resume(self.plant.now_ms());
        info!("Mix resumed");
    }

    fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.plant.stop_actuators(OWNED);
        info!("Mix stopped");
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn parameters(&self) -> Parameters {
        let params = Parameters::new().number("speed_rpm", self.speed_rpm);
        match self.duration_ms {
            Some(ms) => params.number("duration_min", ms as f32 / MS_PER_MINUTE),
            None => params.flag("continuous", true),
        }
    }

    fn owned_actuators(&self) -> &'static [&'static str] {
        OWNED
    }
}
