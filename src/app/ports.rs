//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ProcessStateMachine / PidManager / SafetySupervisor
//! ```
//!
//! Driven adapters (actuator and sensor registries, clocks, event sinks,
//! config storage) implement these traits. The control core holds them as
//! `Arc<dyn …>` handles built once at startup and shared by every task, so
//! each port is `Send + Sync` and takes `&self`.
//!
//! ## Contract notes
//!
//! - Bus calls are non-blocking or bounded-latency; the core calls them
//!   while holding its locks.
//! - Sensor faults are explicit `Err` values, never sentinel floats.
//! - **ConfigPort** implementations MUST validate before persisting.

use crate::config::SystemConfig;
use crate::error::{ActuatorError, SensorError};

// ───────────────────────────────────────────────────────────────
// Sensor bus (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Name-indexed sensor registry.
pub trait SensorBus: Send + Sync {
    /// Latest reading in the sensor's native unit (°C, pH, % DO, bar, NTU).
    ///
    /// Returns [`SensorError::NotFound`] for a sensor this board does not
    /// carry, and a fault variant when the reading cannot be trusted.
    fn read_sensor(&self, name: &str) -> Result<f32, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Actuator bus (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Name-indexed actuator registry.
///
/// `value` units depend on the actuator: percent for the heater, air and
/// drain pumps, mL/min for dosing pumps, RPM for the stirring motor.
pub trait ActuatorBus: Send + Sync {
    /// Run an actuator. `duration_ms == 0` means run until stopped.
    fn run_actuator(&self, name: &str, value: f32, duration_ms: u32) -> Result<(), ActuatorError>;

    fn stop_actuator(&self, name: &str) -> Result<(), ActuatorError>;

    /// `false` for unknown names.
    fn is_actuator_running(&self, name: &str) -> bool;

    /// Last commanded value, `0` when stopped or unknown.
    fn current_value(&self, name: &str) -> i32;

    /// Millilitres delivered since the last reset (dosing and fill pumps).
    fn volume_added(&self, name: &str) -> f32;

    /// Millilitres removed since the last reset (drain pump).
    fn volume_removed(&self, name: &str) -> f32;

    fn reset_volume_added(&self, name: &str);

    fn reset_volume_removed(&self, name: &str);

    fn min_flow_rate(&self, name: &str) -> f32;

    fn max_flow_rate(&self, name: &str) -> f32;

    /// Stirring motor speed range.
    fn min_rpm(&self) -> f32;

    fn max_rpm(&self) -> f32;
}

// ───────────────────────────────────────────────────────────────
// Clock (driven adapter: monotonic time source)
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary, fixed origin.
    fn now_ms(&self) -> u64;

    /// Block the calling task for `ms`. Only used by bounded waits outside
    /// the state-machine lock.
    fn sleep_ms(&self, ms: u64);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port. Adapters decide where they go (serial log, MQTT,
/// web socket, etc.). Implementations must not block: events are emitted
/// while the state-machine lock is held.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Emergency stop (domain → domain)
// ───────────────────────────────────────────────────────────────

/// The one cross-component signal: the safety tick forcing every
/// program to stop.
pub trait EmergencyStop: Send + Sync {
    fn emergency_stop(&self);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// # Security
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped, so a remote operator cannot disable the
/// critical-temperature stop by raising it to `f32::MAX`.
pub trait ConfigPort {
    /// Load configuration. Returns [`SystemConfig::default()`] if no stored
    /// config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}
