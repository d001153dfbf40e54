//! Single-variable regulator: staged gains, hysteresis band, throttling.
//!
//! A [`PidLoop`] is pure logic. [`PidLoop::evaluate`] takes a reading and
//! the current time and returns a [`LoopAction`]; the
//! [`PidManager`](super::manager::PidManager) turns actions into actuator
//! commands.

use log::info;

use crate::config::LoopTuning;

/// Gain schedule phase. Startup → Maintain is one-way for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainPhase {
    Startup,
    Maintain,
}

/// What the loop wants done with its actuator this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopAction {
    /// Not running, paused, or not yet due. Leave the actuator alone.
    Idle,
    /// Inside the hysteresis band: actuator off, integrator untouched.
    Hold,
    /// Drive the actuator with `demand` (0–100) for `duration_ms` (0 = continuous).
    Drive { demand: f32, duration_ms: u32 },
    /// Pulse gap not yet elapsed; keep whatever the actuator is doing.
    Wait,
}

#[derive(Debug, Clone)]
pub struct PidLoop {
    label: &'static str,
    pid: super::pid::PidController,
    tuning: LoopTuning,
    phase: GainPhase,
    input: f32,
    output: f32,
    running: bool,
    paused: bool,
    last_update_ms: Option<u64>,
    last_pulse_ms: Option<u64>,
}

impl PidLoop {
    pub fn new(label: &'static str, tuning: LoopTuning) -> Self {
        let mut pid = super::pid::PidController::new(tuning.startup, 0.0);
        pid.set_limits(tuning.output_min, tuning.output_max);
        Self {
            label,
            pid,
            tuning,
            phase: GainPhase::Startup,
            input: 0.0,
            output: 0.0,
            running: false,
            paused: false,
            last_update_ms: None,
            last_pulse_ms: None,
        }
    }

    /// Begin regulating toward `setpoint` from a clean state.
    pub fn start(&mut self, setpoint: f32) {
        self.pid.reset();
        self.pid.set_gains(self.tuning.startup);
        self.pid.set_target(setpoint);
        self.phase = GainPhase::Startup;
        self.output = 0.0;
        self.running = true;
        self.paused = false;
        self.last_update_ms = None;
        self.last_pulse_ms = None;
        info!("PID {} started, setpoint {:.2}", self.label, setpoint);
    }

    pub fn stop(&mut self) {
        if self.running {
            info!("PID {} stopped", self.label);
        }
        self.running = false;
        self.paused = false;
        self.output = 0.0;
        self.pid.reset();
    }

    /// Suspend computation; the integrator is kept.
    pub fn pause(&mut self) {
        if self.running {
            self.paused = true;
        }
    }

    /// Resume computation and evaluate on the next call.
    pub fn resume(&mut self) {
        if self.running && self.paused {
            self.paused = false;
            self.last_update_ms = None;
            self.pid.resume();
        }
    }

    pub fn set_setpoint(&mut self, setpoint: f32) {
        self.pid.set_target(setpoint);
    }

    pub fn set_hysteresis(&mut self, band: f32) {
        self.tuning.hysteresis = band.max(0.0);
    }

    /// Replace the gains of the active phase.
    pub fn set_gains(&mut self, gains: crate::config::Gains) {
        match self.phase {
            GainPhase::Startup => self.tuning.startup = gains,
            GainPhase::Maintain => self.tuning.maintain = gains,
        }
        self.pid.set_gains(gains);
    }

    pub fn evaluate(&mut self, input: f32, now_ms: u64) -> LoopAction {
        if !self.running || self.paused {
            return LoopAction::Idle;
        }
        let dt_s = match self.last_update_ms {
            Some(last) => {
                let elapsed = now_ms.saturating_sub(last);
                if elapsed < u64::from(self.tuning.update_interval_ms) {
                    return LoopAction::Idle;
                }
                elapsed as f32 / 1000.0
            }
            None => self.tuning.update_interval_ms as f32 / 1000.0,
        };
        self.last_update_ms = Some(now_ms);
        self.input = input;

        let setpoint = self.pid.target();
        let error = setpoint - input;
        if error.abs() <= self.tuning.hysteresis {
            return LoopAction::Hold;
        }

        self.output = self.pid.compute(input, dt_s);
        let mut demand = self.output;

        if self.phase == GainPhase::Startup {
            if let Some(margin) = self.tuning.boost_margin {
                if input < setpoint - margin {
                    demand = self.tuning.output_max;
                }
            }
            if error.abs() < self.tuning.maintain_band {
                self.phase = GainPhase::Maintain;
                self.pid.set_gains(self.tuning.maintain);
                info!("PID {} switched to maintain gains", self.label);
            }
        }

        if self.tuning.min_pulse_gap_ms > 0 {
            if let Some(last) = self.last_pulse_ms {
                if now_ms.saturating_sub(last) < u64::from(self.tuning.min_pulse_gap_ms) {
                    return LoopAction::Wait;
                }
            }
            if demand > 0.0 {
                self.last_pulse_ms = Some(now_ms);
            }
        }

        LoopAction::Drive {
            demand,
            duration_ms: self.tuning.pulse_ms,
        }
    }

    /// Mark the loop as evaluated without a reading (sensor fault).
    pub fn skip_cycle(&mut self, now_ms: u64) {
        self.last_update_ms = Some(now_ms);
    }

    /// True when a call to [`evaluate`](Self::evaluate) would do work.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.running
            && !self.paused
            && self
                .last_update_ms
                .is_none_or(|last| now_ms.saturating_sub(last) >= u64::from(self.tuning.update_interval_ms))
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn setpoint(&self) -> f32 {
        self.pid.target()
    }

    pub fn input(&self) -> f32 {
        self.input
    }

    /// Last computed PID output (kept while holding inside the band).
    pub fn output(&self) -> f32 {
        self.output
    }

    pub fn phase(&self) -> GainPhase {
        self.phase
    }

    pub fn integral(&self) -> f32 {
        self.pid.integral()
    }

    pub fn tuning(&self) -> &LoopTuning {
        &self.tuning
    }
}
