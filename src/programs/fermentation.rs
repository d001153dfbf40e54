//! Fermentation batch.
//!
//! Holds temperature, pH and dissolved oxygen at their setpoints (through
//! the PID manager), keeps the culture stirred, and feeds nutrient in
//! bounded pulses:
//!
//! ```text
//!   Waiting ──(nutrient delay elapsed)──▶ Dosing ──(planned ON time)──▶ Resting
//!                                           ▲                              │
//!                                           └────────(OFF time)────────────┘
//! ```
//!
//! The ON time is the full pulse when the vessel has room for it and
//! shrinks in proportion when it does not. The batch completes when the
//! configured duration (excluding pauses) has elapsed or the vessel is full.

use log::{error, info, warn};

use crate::app::commands::{Args, bounded, parse_flag, program_names};
use crate::config::FermentationConfig;
use crate::control::manager::Variable;
use crate::error::{Error, ValidationError};
use crate::names;
use crate::plant::Plant;

use super::{MS_PER_HOUR, Parameters, Program, RunTimer, to_ms};

const OWNED: &[&str] = &[
    names::AIR_PUMP,
    names::DRAIN_PUMP,
    names::SAMPLE_PUMP,
    names::NUTRIENT_PUMP,
    names::BASE_PUMP,
    names::STIRRING_MOTOR,
    names::HEATING_PLATE,
    names::LED_GROW_LIGHT,
];

/// Parsed `fermentation` command.
#[derive(Debug, Clone, PartialEq)]
struct Recipe {
    temperature_c: f32,
    ph: f32,
    dissolved_oxygen: f32,
    nutrient_concentration: f32,
    base_concentration: f32,
    duration_ms: u64,
    nutrient_delay_ms: u64,
    experiment: heapless::String<32>,
    comment: heapless::String<64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dosing {
    Waiting,
    Dosing { since_ms: u64, planned_ms: u64 },
    Resting { since_ms: u64 },
}

impl Dosing {
    const fn label(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Dosing { .. } => "dosing",
            Self::Resting { .. } => "resting",
        }
    }
}

pub struct FermentationProgram {
    plant: Plant,
    config: FermentationConfig,
    recipe: Option<Recipe>,
    running: bool,
    paused: bool,
    pid_enabled: bool,
    timer: RunTimer,
    dosing: Dosing,
    stirring_floor_rpm: f32,
}

impl FermentationProgram {
    pub fn new(plant: Plant, config: &FermentationConfig) -> Self {
        Self {
            plant,
            config: *config,
            recipe: None,
            running: false,
            paused: false,
            pid_enabled: true,
            timer: RunTimer::default(),
            dosing: Dosing::Waiting,
            stirring_floor_rpm: config.min_stirring_rpm,
        }
    }

    fn start_loops(&self, recipe: &Recipe) {
        let mut pid = self.plant.pid();
        pid.start_loop(Variable::Temperature, recipe.temperature_c);
        pid.start_loop(Variable::Ph, recipe.ph);
        pid.start_loop(Variable::DissolvedOxygen, recipe.dissolved_oxygen);
    }

    fn stop_loops(&self) {
        let mut pid = self.plant.pid();
        for variable in [Variable::Temperature, Variable::Ph, Variable::DissolvedOxygen] {
            pid.stop_loop(variable, self.plant.actuators.as_ref());
        }
    }

    fn run_stirring_at_floor(&self) {
        if let Err(e) = self
            .plant
            .actuators
            .run_actuator(names::STIRRING_MOTOR, self.stirring_floor_rpm, 0)
        {
            warn!("Fermentation: stirring: {e}");
        }
    }

    // ── Nutrient dosing ───────────────────────────────────────

    fn update_dosing(&mut self, now_ms: u64, remaining_ms: u64, nutrient_delay_ms: u64) {
        match self.dosing {
            Dosing::Waiting => {
                if self.timer.elapsed_ms(now_ms) >= nutrient_delay_ms {
                    info!("Fermentation: nutrient delay over, dosing begins");
                    self.begin_dose(now_ms, remaining_ms);
                }
            }
            Dosing::Dosing { since_ms, planned_ms } => {
                if now_ms.saturating_sub(since_ms) >= planned_ms {
                    self.plant.stop_actuators(&[names::NUTRIENT_PUMP]);
                    self.dosing = Dosing::Resting { since_ms: now_ms };
                }
            }
            Dosing::Resting { since_ms } => {
                if now_ms.saturating_sub(since_ms) >= u64::from(self.config.nutrient_off_ms) {
                    self.begin_dose(now_ms, remaining_ms);
                }
            }
        }
    }

    /// Start one nutrient pulse sized to the remaining headroom and run time.
    fn begin_dose(&mut self, now_ms: u64, remaining_ms: u64) {
        let flow = self.config.nutrient_flow_ml_per_min;
        let on_ms = self.config.nutrient_on_ms;
        let max_possible_ml = flow / 60.0 * (on_ms as f32 / 1000.0);
        let available_ml = self.plant.volume().available_volume() * 1000.0;
        let to_add_ml = max_possible_ml.min(available_ml);

        if to_add_ml <= 0.0 {
            info!("Fermentation: no headroom for nutrient");
            self.dosing = Dosing::Resting { since_ms: now_ms };
            return;
        }

        let planned_ms = ((to_add_ml / max_possible_ml * on_ms as f32) as u64).min(remaining_ms);
        if planned_ms == 0 {
            self.dosing = Dosing::Resting { since_ms: now_ms };
            return;
        }
        match self
            .plant
            .actuators
            .run_actuator(names::NUTRIENT_PUMP, flow, planned_ms as u32)
        {
            Ok(()) => {
                info!("Fermentation: nutrient pulse {planned_ms} ms at {flow} mL/min");
                self.dosing = Dosing::Dosing { since_ms: now_ms, planned_ms };
            }
            Err(e) => {
                warn!("Fermentation: nutrient pump: {e}");
                self.dosing = Dosing::Resting { since_ms: now_ms };
            }
        }
    }
}

impl Program for FermentationProgram {
    fn name(&self) -> &'static str {
        program_names::FERMENTATION
    }

    /// `fermentation <temp> <ph> <do> <nutrient_conc> <base_conc> <duration_h>
    /// <nutrient_delay_h> <name> ["comment"]`
    fn parse_command(&mut self, command: &str) -> Result<(), Error> {
        let args = Args::parse(command)?;
        if !args.command().eq_ignore_ascii_case("fermentation") {
            return Err(ValidationError::UnknownCommand.into());
        }
        let temperature_c = args.f32(1, "temperature")?;
        let ph = args.f32(2, "pH")?;
        let dissolved_oxygen = args.f32(3, "dissolved oxygen")?;
        let recipe = Recipe {
            temperature_c,
            ph,
            dissolved_oxygen,
            nutrient_concentration: args.non_negative(4, "nutrient concentration")?,
            base_concentration: args.non_negative(5, "base concentration")?,
            duration_ms: to_ms(args.positive(6, "duration")?, MS_PER_HOUR),
            nutrient_delay_ms: to_ms(args.non_negative(7, "nutrient delay")?, MS_PER_HOUR),
            experiment: bounded(args.text(8, "experiment name")?, "experiment name")?,
            comment: bounded(args.get(9).unwrap_or_default(), "comment")?,
        };
        if !(0.0..=100.0).contains(&temperature_c) {
            return Err(ValidationError::OutOfRange("temperature").into());
        }
        if !(0.0..=14.0).contains(&ph) {
            return Err(ValidationError::OutOfRange("pH").into());
        }
        if !(0.0..=100.0).contains(&dissolved_oxygen) {
            return Err(ValidationError::OutOfRange("dissolved oxygen").into());
        }
        info!(
            "Fermentation parsed: T={temperature_c} pH={ph} DO={dissolved_oxygen} duration={} h '{}'",
            recipe.duration_ms as f32 / MS_PER_HOUR,
            recipe.experiment
        );
        self.recipe = Some(recipe);
        Ok(())
    }

    fn start(&mut self) -> Result<(), Error> {
        let Some(recipe) = self.recipe.clone() else {
            error!("Fermentation: no parameters, refusing to start");
            return Err(Error::Precondition("no parameters"));
        };
        if self.plant.volume().current_volume() <= 0.0 {
            error!("Fermentation: initial volume not set, refusing to start");
            return Err(Error::Precondition("initial volume not set"));
        }

        let actuators = &self.plant.actuators;
        self.stirring_floor_rpm = self
            .config
            .min_stirring_rpm
            .max(actuators.min_rpm())
            .min(actuators.max_rpm());
        self.timer = RunTimer::start(self.plant.now_ms());
        self.dosing = Dosing::Waiting;
        self.paused = false;
        self.running = true;

        self.plant.pid().set_stirring_floor(Some(self.stirring_floor_rpm));
        if self.pid_enabled {
            self.start_loops(&recipe);
        }
        self.run_stirring_at_floor();
        info!("Fermentation '{}' started", recipe.experiment);
        Ok(())
    }

    fn update(&mut self) {
        if !self.running || self.paused {
            return;
        }
        let Some((duration_ms, nutrient_delay_ms)) =
            self.recipe.as_ref().map(|r| (r.duration_ms, r.nutrient_delay_ms))
        else {
            return;
        };

        if self.pid_enabled {
            self.plant.update_loops();
        }
        self.plant.reconcile_volume();

        let now = self.plant.now_ms();
        let elapsed = self.timer.elapsed_ms(now);
        if self.plant.volume().is_at_ceiling() {
            info!("Fermentation: volume ceiling reached, completing");
            self.stop();
            return;
        }
        if elapsed >= duration_ms {
            info!("Fermentation: duration reached, completing");
            self.stop();
            return;
        }
        self.update_dosing(now, duration_ms - elapsed, nutrient_delay_ms);
    }

    fn pause(&mut self) {
        if !self.running || self.paused {
            return;
        }
        let now = self.plant.now_ms();
        self.paused = true;
        self.timer.pause(now);
        self.plant.pid().pause_all();
        self.plant.stop_actuators(&[
            names::AIR_PUMP,
            names::NUTRIENT_PUMP,
            names::BASE_PUMP,
            names::HEATING_PLATE,
        ]);
        self.run_stirring_at_floor();
        if matches!(self.dosing, Dosing::Dosing { .. }) {
            self.dosing = Dosing::Resting { since_ms: now };
        }
        info!("Fermentation paused");
    }

    fn resume(&mut self) {
        if !self.running || !self.paused {
            return;
        }
        self.timer.resume(self.plant.now_ms());
        self.paused = false;
        self.plant.pid().resume_all();
        info!(
            "Fermentation resumed, {} s paused in total",
            self.timer.paused_total_ms() / 1000
        );
    }

    fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.dosing = Dosing::Waiting;
        self.plant.pid().stop(self.plant.actuators.as_ref());
        self.plant.stop_actuators(OWNED);
        self.plant.reconcile_volume();
        info!("Fermentation stopped");
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn parameters(&self) -> Parameters {
        let Some(r) = &self.recipe else {
            return Parameters::new();
        };
        let elapsed_h = if self.running {
            self.timer.elapsed_ms(self.plant.now_ms()) as f32 / MS_PER_HOUR
        } else {
            0.0
        };
        Parameters::new()
            .number("temperature_setpoint", r.temperature_c)
            .number("ph_setpoint", r.ph)
            .number("do_setpoint", r.dissolved_oxygen)
            .number("nutrient_concentration", r.nutrient_concentration)
            .number("base_concentration", r.base_concentration)
            .number("duration_h", r.duration_ms as f32 / MS_PER_HOUR)
            .number("nutrient_delay_h", r.nutrient_delay_ms as f32 / MS_PER_HOUR)
            .number("elapsed_h", elapsed_h)
            .text("experiment", &r.experiment)
            .text("comment", &r.comment)
            .text("dosing", self.dosing.label())
            .flag("pid_enabled", self.pid_enabled)
    }

    fn owned_actuators(&self) -> &'static [&'static str] {
        OWNED
    }

    fn apply_setting(&mut self, key: &str, value: &str) -> Result<(), Error> {
        if !key.eq_ignore_ascii_case("pid_enabled") {
            return Err(ValidationError::UnknownCommand.into());
        }
        let enabled = parse_flag(value).ok_or(ValidationError::OutOfRange("pid_enabled"))?;
        if enabled == self.pid_enabled {
            return Ok(());
        }
        self.pid_enabled = enabled;
        if self.running {
            match (&self.recipe, enabled) {
                (Some(recipe), true) => self.start_loops(recipe),
                _ => self.stop_loops(),
            }
        }
        info!("Fermentation: PID control {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }
}
