//! Safety supervisor.
//!
//! Runs on its own cadence, independent of the control tick, and
//! accumulates a fault bitmask from fixed thresholds. Most conditions are
//! notification only. Four are critical and always stop every program:
//! water temperature, pH, volume at ceiling and ineffective heating.
//!
//! ## Toggles
//!
//! `alarms` and `warnings` gate **logging only**. A critical condition
//! stops the programs whether or not its alarm line is printed.
//!
//! ## Heating effectiveness
//!
//! While the heating plate is on, the supervisor opens a window recording
//! the water temperature. When the window has lasted its full length and
//! the temperature has not risen by the minimum delta, the heater or its
//! sensor is assumed faulty and everything is stopped. Switching the
//! heater off abandons the window.

use std::sync::Mutex;

use log::{debug, error, info, warn};

use crate::app::commands::Args;
use crate::app::ports::{ActuatorBus, SensorBus};
use crate::config::SafetyThresholds;
use crate::error::{Error, SafetyFault, SensorError, ValidationError};
use crate::names;
use crate::plant::lock;
use crate::volume::VolumeLedger;

#[derive(Debug, Clone, Copy, Default)]
struct HeatingMonitor {
    active: bool,
    started_ms: u64,
    initial_temp_c: f32,
}

/// Outcome of one completed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyReport {
    /// Every condition present during this check.
    pub faults: u16,
    /// A critical condition is present; the caller must stop every program.
    pub stop_required: bool,
}

impl SafetyReport {
    pub fn has(&self, fault: SafetyFault) -> bool {
        self.faults & fault.mask() != 0
    }
}

/// Safety supervisor.
pub struct SafetySupervisor {
    thresholds: SafetyThresholds,
    alarms_enabled: bool,
    warnings_enabled: bool,
    check_interval_ms: u32,
    last_check_ms: Option<u64>,
    /// Conditions present at the last check.
    faults: u16,
    heating: HeatingMonitor,
}

impl SafetySupervisor {
    pub fn new(thresholds: &SafetyThresholds) -> Self {
        Self {
            thresholds: *thresholds,
            alarms_enabled: true,
            warnings_enabled: true,
            check_interval_ms: thresholds.check_interval_ms,
            last_check_ms: None,
            faults: 0,
            heating: HeatingMonitor::default(),
        }
    }

    /// Run every check if the interval has elapsed. Returns `None` when the
    /// check was not due.
    ///
    /// The stop itself is left to the caller so the supervisor is not
    /// borrowed through the settle wait.
    pub fn check_limits(
        &mut self,
        now_ms: u64,
        sensors: &dyn SensorBus,
        actuators: &dyn ActuatorBus,
        volume: &Mutex<VolumeLedger>,
    ) -> Option<SafetyReport> {
        if let Some(last) = self.last_check_ms {
            if now_ms.saturating_sub(last) < u64::from(self.check_interval_ms) {
                return None;
            }
        }
        self.last_check_ms = Some(now_ms);

        let mut found = 0u16;
        let t = self.thresholds;

        // ── Water temperature ─────────────────────────────────────
        let water = read(sensors, names::WATER_TEMP_SENSOR, &mut found);
        if let Some(temp) = water {
            if temp < t.water_temp_min_c || temp > t.water_temp_max_c {
                found |= SafetyFault::WaterTempOutOfBand.mask();
            }
            if temp > t.water_temp_critical_c {
                found |= SafetyFault::WaterTempCritical.mask();
            }
        }

        // ── Air temperature ───────────────────────────────────────
        if let Some(temp) = read(sensors, names::AIR_TEMP_SENSOR, &mut found) {
            if temp < t.air_temp_min_c || temp > t.air_temp_max_c {
                found |= SafetyFault::AirTempOutOfBand.mask();
            }
        }

        // ── Electronics temperature ───────────────────────────────
        if let Some(temp) = read(sensors, names::ELECTRONIC_TEMP_SENSOR, &mut found) {
            if temp > t.electronics_temp_max_c {
                found |= SafetyFault::ElectronicsTempCritical.mask();
            } else if temp > t.electronics_temp_max_c - 10.0 {
                found |= SafetyFault::ElectronicsTempHigh.mask();
            }
        }

        // ── pH ────────────────────────────────────────────────────
        if let Some(ph) = read(sensors, names::PH_SENSOR, &mut found) {
            if ph < t.ph_min || ph > t.ph_max {
                found |= SafetyFault::PhOutOfBand.mask();
            }
            if ph > t.ph_critical {
                found |= SafetyFault::PhCritical.mask();
            }
        }

        // ── Dissolved oxygen ──────────────────────────────────────
        if let Some(dissolved) = read(sensors, names::OXYGEN_SENSOR, &mut found) {
            if dissolved < t.dissolved_oxygen_min {
                found |= SafetyFault::DissolvedOxygenLow.mask();
            }
        }

        // ── Turbidity ─────────────────────────────────────────────
        if let Some(turbidity) = read(sensors, names::TURBIDITY_SENSOR, &mut found) {
            if turbidity > t.turbidity_max {
                found |= SafetyFault::TurbidityHigh.mask();
            }
        }

        // ── Pressure ──────────────────────────────────────────────
        if let Some(bar) = read(sensors, names::PRESSURE_SENSOR, &mut found) {
            if bar > t.pressure_max_bar {
                found |= SafetyFault::PressureHigh.mask();
            }
        }

        // ── Volume ────────────────────────────────────────────────
        {
            let ledger = lock(volume);
            if ledger.has_baseline() {
                if ledger.current_volume() <= ledger.min_volume() {
                    found |= SafetyFault::VolumeLow.mask();
                }
                if ledger.is_at_ceiling() {
                    found |= SafetyFault::VolumeCritical.mask();
                }
            }
        }

        // ── Heating effectiveness ─────────────────────────────────
        if self.heating_ineffective(now_ms, water, actuators) {
            found |= SafetyFault::HeatingIneffective.mask();
        }

        self.publish(found);

        let stop_required = found & SafetyFault::CRITICAL_MASK != 0;
        if stop_required {
            error!("SAFETY | critical condition, stopping all programs (faults=0x{found:04x})");
        }
        Some(SafetyReport { faults: found, stop_required })
    }

    fn heating_ineffective(&mut self, now_ms: u64, water: Option<f32>, actuators: &dyn ActuatorBus) -> bool {
        if !actuators.is_actuator_running(names::HEATING_PLATE) {
            self.heating.active = false;
            return false;
        }
        let Some(temp) = water else {
            return false;
        };
        if !self.heating.active {
            self.heating = HeatingMonitor {
                active: true,
                started_ms: now_ms,
                initial_temp_c: temp,
            };
            info!("SAFETY | heating monitor started at {temp:.2} C");
            return false;
        }
        if now_ms.saturating_sub(self.heating.started_ms) < u64::from(self.thresholds.heating_window_ms) {
            return false;
        }
        self.heating.active = false;
        let rise = temp - self.heating.initial_temp_c;
        if rise < self.thresholds.heating_min_rise_c {
            if self.alarms_enabled {
                error!(
                    "SAFETY | heating ineffective: {:.2} -> {temp:.2} C (rise {rise:.2} C)",
                    self.heating.initial_temp_c
                );
            }
            return true;
        }
        false
    }

    /// Log newly raised and cleared conditions, honouring the toggles.
    fn publish(&mut self, found: u16) {
        const ALL: [SafetyFault; 14] = [
            SafetyFault::WaterTempOutOfBand,
            SafetyFault::WaterTempCritical,
            SafetyFault::AirTempOutOfBand,
            SafetyFault::ElectronicsTempHigh,
            SafetyFault::ElectronicsTempCritical,
            SafetyFault::PhOutOfBand,
            SafetyFault::PhCritical,
            SafetyFault::DissolvedOxygenLow,
            SafetyFault::TurbidityHigh,
            SafetyFault::PressureHigh,
            SafetyFault::VolumeLow,
            SafetyFault::VolumeCritical,
            SafetyFault::HeatingIneffective,
            SafetyFault::SensorFault,
        ];
        for fault in ALL {
            let now = found & fault.mask() != 0;
            let before = self.faults & fault.mask() != 0;
            match (before, now) {
                (false, true) if fault.is_alarm() && self.alarms_enabled => error!("SAFETY ALARM: {fault}"),
                (false, true) if !fault.is_alarm() && self.warnings_enabled => warn!("SAFETY WARNING: {fault}"),
                (true, false) => info!("SAFETY CLEARED: {fault}"),
                _ => {}
            }
        }
        self.faults = found;
    }

    // ── Runtime settings ──────────────────────────────────────────

    pub fn set_check_interval(&mut self, interval_ms: u32) -> Result<(), Error> {
        if interval_ms == 0 {
            warn!("SAFETY | check interval must be > 0");
            return Err(ValidationError::OutOfRange("check interval").into());
        }
        self.check_interval_ms = interval_ms;
        info!("SAFETY | check interval set to {interval_ms} ms");
        Ok(())
    }

    pub fn set_alarms_enabled(&mut self, enabled: bool) {
        self.alarms_enabled = enabled;
        info!("SAFETY | alarms {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn set_warnings_enabled(&mut self, enabled: bool) {
        self.warnings_enabled = enabled;
        info!("SAFETY | warnings {}", if enabled { "enabled" } else { "disabled" });
    }

    /// `alarms true|false`, `warnings true|false`, `set_check_interval <seconds>`.
    pub fn parse_command(&mut self, command: &str) -> Result<(), Error> {
        let args = Args::parse(command)?;
        match args.command().to_ascii_lowercase().as_str() {
            "alarms" => self.set_alarms_enabled(args.flag(1, "alarms")?),
            "warnings" => self.set_warnings_enabled(args.flag(1, "warnings")?),
            "set_check_interval" => {
                let secs = args.positive(1, "seconds")?;
                return self.set_check_interval((secs * 1000.0) as u32);
            }
            _ => return Err(ValidationError::UnknownCommand.into()),
        }
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Conditions present at the last check.
    pub fn faults(&self) -> u16 {
        self.faults
    }

    pub fn has_fault(&self, fault: SafetyFault) -> bool {
        self.faults & fault.mask() != 0
    }

    pub fn alarms_enabled(&self) -> bool {
        self.alarms_enabled
    }

    pub fn warnings_enabled(&self) -> bool {
        self.warnings_enabled
    }

    pub fn check_interval_ms(&self) -> u32 {
        self.check_interval_ms
    }
}

/// Read a sensor. A sensor the board does not carry is skipped quietly;
/// a faulted one raises [`SafetyFault::SensorFault`].
fn read(sensors: &dyn SensorBus, name: &str, found: &mut u16) -> Option<f32> {
    match sensors.read_sensor(name) {
        Ok(v) if v.is_finite() => Some(v),
        Err(SensorError::NotFound) => None,
        Ok(_) | Err(_) => {
            debug!("SAFETY | {name} unreadable");
            *found |= SafetyFault::SensorFault.mask();
            None
        }
    }
}
