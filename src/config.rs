//! System configuration parameters
//!
//! All tunable parameters for the process-control core: vessel geometry,
//! per-loop PID tuning, safety thresholds, nutrient dosing and task timing.
//! Values can be overridden through a [`ConfigPort`](crate::app::ports::ConfigPort)
//! adapter, which must call [`SystemConfig::validate`] before persisting.

use serde::{Deserialize, Serialize};

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Gains {
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }

    fn is_valid(self) -> bool {
        [self.kp, self.ki, self.kd]
            .iter()
            .all(|g| g.is_finite() && *g >= 0.0)
    }
}

/// How a loop's 0–100 output becomes an actuator command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OutputMapping {
    /// Output is sent as a duty percentage.
    Percent,
    /// Output is mapped onto the pump's `[min, max]` flow range (mL/min),
    /// never exceeding the cap.
    FlowRate { cap_ml_per_min: f32 },
}

/// Tuning for one regulated variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopTuning {
    /// Gains used until the error first falls inside `maintain_band`.
    pub startup: Gains,
    /// Gentler gains used for the rest of the run.
    pub maintain: Gains,
    /// Dead band around setpoint; inside it the actuator is commanded off.
    pub hysteresis: f32,
    /// |error| below which the loop switches to maintain gains (one-way).
    pub maintain_band: f32,
    /// While `input < setpoint - margin` the startup phase drives full output.
    pub boost_margin: Option<f32>,
    pub output_min: f32,
    pub output_max: f32,
    /// Minimum time between two evaluations of this loop.
    pub update_interval_ms: u32,
    /// Run duration per command; `0` means continuous.
    pub pulse_ms: u32,
    /// Minimum time between two pulses; `0` disables the gap.
    pub min_pulse_gap_ms: u32,
    pub mapping: OutputMapping,
}

impl LoopTuning {
    fn validate(&self) -> Result<(), &'static str> {
        if !self.startup.is_valid() || !self.maintain.is_valid() {
            return Err("PID gains must be finite and non-negative");
        }
        if !(self.hysteresis >= 0.0 && self.maintain_band >= 0.0) {
            return Err("hysteresis and maintain band must be non-negative");
        }
        if !(0.0..=100.0).contains(&self.output_min)
            || !(0.0..=100.0).contains(&self.output_max)
            || self.output_min >= self.output_max
        {
            return Err("loop output limits must satisfy 0 <= min < max <= 100");
        }
        if self.update_interval_ms == 0 {
            return Err("loop update interval must be > 0");
        }
        if let OutputMapping::FlowRate { cap_ml_per_min } = self.mapping {
            if !(cap_ml_per_min > 0.0) {
                return Err("flow-rate cap must be > 0");
            }
        }
        Ok(())
    }
}

/// Vessel geometry and volume bounds (litres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub total_l: f32,
    /// Fraction of `total_l` that may be filled (0–1].
    pub max_fill_fraction: f32,
    pub min_l: f32,
}

impl VolumeConfig {
    pub fn max_allowed_l(&self) -> f32 {
        self.total_l * self.max_fill_fraction
    }
}

/// Safety supervisor thresholds and cadence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyThresholds {
    pub check_interval_ms: u32,
    pub water_temp_min_c: f32,
    pub water_temp_max_c: f32,
    pub water_temp_critical_c: f32,
    pub air_temp_min_c: f32,
    pub air_temp_max_c: f32,
    /// Error-level log above this; warning from 10 °C below.
    pub electronics_temp_max_c: f32,
    pub ph_min: f32,
    pub ph_max: f32,
    pub ph_critical: f32,
    pub dissolved_oxygen_min: f32,
    pub turbidity_max: f32,
    pub pressure_max_bar: f32,
    /// Heating-effectiveness window length.
    pub heating_window_ms: u32,
    /// Minimum rise expected over one window while heating.
    pub heating_min_rise_c: f32,
}

/// Nutrient dosing and stirring parameters for fermentation runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FermentationConfig {
    pub nutrient_flow_ml_per_min: f32,
    /// Full-length dosing pulse; shorter when little volume remains.
    pub nutrient_on_ms: u32,
    pub nutrient_off_ms: u32,
    pub min_stirring_rpm: f32,
}

/// Actuator self-test sequence parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorTestConfig {
    pub step_ms: u32,
    /// Percent for pumps/heater; scaled into the RPM range for the stirrer.
    pub test_value: f32,
}

/// Task cadence and stop-settle policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    pub control_tick_ms: u32,
    pub safety_tick_ms: u32,
    pub telemetry_interval_ms: u32,
    pub command_poll_ms: u32,
    /// Upper bound on waiting for actuators to confirm off after a stop.
    pub settle_timeout_ms: u32,
    /// First poll delay; doubles up to `settle_max_poll_ms`.
    pub settle_poll_ms: u32,
    pub settle_max_poll_ms: u32,
}

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub volume: VolumeConfig,
    pub temperature: LoopTuning,
    pub ph: LoopTuning,
    pub dissolved_oxygen: LoopTuning,
    pub pressure: LoopTuning,
    pub safety: SafetyThresholds,
    pub fermentation: FermentationConfig,
    pub actuator_tests: ActuatorTestConfig,
    pub timing: TimingConfig,
}

impl SystemConfig {
    /// Reject values that would make the controller unsafe or meaningless.
    pub fn validate(&self) -> Result<(), &'static str> {
        let v = &self.volume;
        if !(v.total_l > 0.0) {
            return Err("total volume must be > 0");
        }
        if !(v.max_fill_fraction > 0.0 && v.max_fill_fraction <= 1.0) {
            return Err("max fill fraction must be in (0, 1]");
        }
        if !(v.min_l >= 0.0 && v.min_l < v.max_allowed_l()) {
            return Err("minimum volume must be below the maximum allowed volume");
        }

        self.temperature.validate()?;
        self.ph.validate()?;
        self.dissolved_oxygen.validate()?;
        self.pressure.validate()?;

        let s = &self.safety;
        if s.check_interval_ms == 0 {
            return Err("safety check interval must be > 0");
        }
        if !(s.water_temp_min_c < s.water_temp_max_c && s.water_temp_max_c <= s.water_temp_critical_c) {
            return Err("water temperature thresholds must be ordered min < max <= critical");
        }
        if !(s.ph_min < s.ph_max) {
            return Err("pH band must satisfy min < max");
        }
        if s.heating_window_ms == 0 || !(s.heating_min_rise_c > 0.0) {
            return Err("heating monitor needs a window and a positive rise");
        }

        let f = &self.fermentation;
        if !(f.nutrient_flow_ml_per_min > 0.0) || f.nutrient_on_ms == 0 {
            return Err("nutrient dosing needs a flow rate and an ON duration");
        }

        let t = &self.timing;
        if t.control_tick_ms == 0 || t.safety_tick_ms == 0 || t.settle_poll_ms == 0 {
            return Err("task periods must be > 0");
        }
        if t.settle_max_poll_ms < t.settle_poll_ms {
            return Err("settle max poll must be >= settle poll");
        }
        Ok(())
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            volume: VolumeConfig {
                total_l: 10.0,
                max_fill_fraction: 0.9,
                min_l: 0.5,
            },

            temperature: LoopTuning {
                startup: Gains::new(3.0, 0.25, 0.2),
                maintain: Gains::new(1.5, 0.025, 0.4),
                hysteresis: 0.5,
                maintain_band: 1.0,
                boost_margin: Some(2.0),
                output_min: 0.0,
                output_max: 100.0,
                update_interval_ms: 5_000,
                pulse_ms: 0,
                min_pulse_gap_ms: 0,
                mapping: OutputMapping::Percent,
            },

            // Base dosing: short pulses, never faster than once a minute.
            ph: LoopTuning {
                startup: Gains::new(15.0, 0.5, 1.0),
                maintain: Gains::new(7.5, 0.05, 2.0),
                hysteresis: 0.05,
                maintain_band: 0.2,
                boost_margin: None,
                output_min: 0.0,
                output_max: 100.0,
                update_interval_ms: 5_000,
                pulse_ms: 1_000,
                min_pulse_gap_ms: 60_000,
                mapping: OutputMapping::FlowRate { cap_ml_per_min: 10.0 },
            },

            // Air pump keeps a 20% floor for minimum aeration.
            dissolved_oxygen: LoopTuning {
                startup: Gains::new(1.5, 0.05, 0.2),
                maintain: Gains::new(0.75, 0.005, 0.4),
                hysteresis: 1.0,
                maintain_band: 2.0,
                boost_margin: None,
                output_min: 20.0,
                output_max: 100.0,
                update_interval_ms: 15_000,
                pulse_ms: 0,
                min_pulse_gap_ms: 0,
                mapping: OutputMapping::Percent,
            },

            pressure: LoopTuning {
                startup: Gains::new(60.0, 2.0, 5.0),
                maintain: Gains::new(30.0, 0.2, 10.0),
                hysteresis: 0.05,
                maintain_band: 0.1,
                boost_margin: Some(0.3),
                output_min: 0.0,
                output_max: 100.0,
                update_interval_ms: 5_000,
                pulse_ms: 0,
                min_pulse_gap_ms: 0,
                mapping: OutputMapping::Percent,
            },

            safety: SafetyThresholds {
                check_interval_ms: 1_000,
                water_temp_min_c: 15.0,
                water_temp_max_c: 40.0,
                water_temp_critical_c: 45.0,
                air_temp_min_c: 10.0,
                air_temp_max_c: 45.0,
                electronics_temp_max_c: 60.0,
                ph_min: 2.0,
                ph_max: 12.0,
                ph_critical: 10.0,
                dissolved_oxygen_min: 0.0,
                turbidity_max: 1_000.0,
                pressure_max_bar: 2.5,
                heating_window_ms: 300_000, // 5 min
                heating_min_rise_c: 0.5,
            },

            fermentation: FermentationConfig {
                nutrient_flow_ml_per_min: 100.0,
                nutrient_on_ms: 30_000,
                nutrient_off_ms: 15_000,
                min_stirring_rpm: 500.0,
            },

            actuator_tests: ActuatorTestConfig {
                step_ms: 5_000,
                test_value: 50.0,
            },

            timing: TimingConfig {
                control_tick_ms: 100,
                safety_tick_ms: 250,
                telemetry_interval_ms: 30_000,
                command_poll_ms: 100,
                settle_timeout_ms: 5_000,
                settle_poll_ms: 100,
                settle_max_poll_ms: 800,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(SystemConfig::default().validate(), Ok(()));
    }

    #[test]
    fn default_volume_bounds() {
        let c = SystemConfig::default();
        assert!((c.volume.max_allowed_l() - 9.0).abs() < 1e-5);
        assert!(c.volume.min_l < c.volume.max_allowed_l());
    }

    #[test]
    fn serde_roundtrip() {
        let c = SystemConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: SystemConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn rejects_inverted_output_limits() {
        let mut c = SystemConfig::default();
        c.dissolved_oxygen.output_min = 100.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_unordered_water_thresholds() {
        let mut c = SystemConfig::default();
        c.safety.water_temp_critical_c = 30.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_nan_gains() {
        let mut c = SystemConfig::default();
        c.temperature.startup.kp = f32::NAN;
        assert!(c.validate().is_err());
    }

    #[test]
    fn control_tick_faster_than_every_loop_interval() {
        let c = SystemConfig::default();
        for tuning in [&c.temperature, &c.ph, &c.dissolved_oxygen, &c.pressure] {
            assert!(c.timing.control_tick_ms < tuning.update_interval_ms);
        }
    }
}
