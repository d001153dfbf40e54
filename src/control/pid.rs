//! PID controller core
//!
//! Positional proportional-integral-derivative controller. The integral is
//! accumulated already multiplied by `ki` and clamped to the output limits,
//! so changing gains mid-run does not bump the output and a saturated
//! actuator cannot wind the integrator up. The derivative acts on the
//! measurement, not the error, so setpoint changes do not kick the output.

use crate::config::Gains;

/// PID controller
#[derive(Debug, Clone)]
pub struct PidController {
    gains: Gains,
    setpoint: f32,
    integral: f32,
    prev_measurement: Option<f32>,
    output_min: f32,
    output_max: f32,
}

impl PidController {
    pub fn new(gains: Gains, setpoint: f32) -> Self {
        Self {
            gains,
            setpoint,
            integral: 0.0,
            prev_measurement: None,
            output_min: 0.0,
            output_max: 100.0,
        }
    }

    /// Set output limits and pull the integrator inside them.
    pub fn set_limits(&mut self, min: f32, max: f32) {
        self.output_min = min;
        self.output_max = max;
        self.integral = self.integral.clamp(min, max);
    }

    /// Update setpoint
    pub fn set_target(&mut self, setpoint: f32) {
        self.setpoint = setpoint;
    }

    pub fn target(&self) -> f32 {
        self.setpoint
    }

    pub fn set_gains(&mut self, gains: Gains) {
        self.gains = gains;
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    /// Accumulated integral contribution (already scaled by `ki`).
    pub fn integral(&self) -> f32 {
        self.integral
    }

    /// Compute PID output given current measurement and seconds since the
    /// previous call.
    pub fn compute(&mut self, measurement: f32, dt: f32) -> f32 {
        let error = self.setpoint - measurement;

        // Proportional
        let p = self.gains.kp * error;

        // Integral (clamped: anti-windup)
        self.integral = (self.integral + self.gains.ki * error * dt).clamp(self.output_min, self.output_max);

        // Derivative on measurement
        let d = match self.prev_measurement {
            Some(prev) if dt > 0.0 => -self.gains.kd * (measurement - prev) / dt,
            _ => 0.0,
        };
        self.prev_measurement = Some(measurement);

        (p + self.integral + d).clamp(self.output_min, self.output_max)
    }

    /// Forget the previous measurement so the next derivative term is zero.
    /// The integrator is kept.
    pub fn resume(&mut self) {
        self.prev_measurement = None;
    }

    /// Reset controller state
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_measurement = None;
    }
}
