//! Unified error types for the process-control core.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! command path and the periodic tasks uniform. All variants are `Copy` so
//! they pass through the state machine and supervisor without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed command or out-of-range parameter. No state was changed.
    Validation(ValidationError),
    /// A sensor could not be read or returned implausible data.
    Sensor(SensorError),
    /// An actuator command failed or the actuator did not settle.
    Actuator(ActuatorError),
    /// A program is already current; the request was rejected.
    Conflict(&'static str),
    /// No program is registered under the requested name.
    NotFound,
    /// A program refused to start because a precondition is unmet.
    Precondition(&'static str),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "validation: {e}"),
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::NotFound => write!(f, "program not found"),
            Self::Precondition(msg) => write!(f, "precondition: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Fewer arguments than the command requires.
    MissingArgument(&'static str),
    /// An argument could not be parsed as a number.
    NotANumber(&'static str),
    /// A numeric argument is outside its permitted range.
    OutOfRange(&'static str),
    /// First word of the command is not understood.
    UnknownCommand,
    /// Volume source is not one of NaOH, Nutrient, Microalgae, Removed.
    UnknownSource,
    /// Actuator or sensor name is not known to the bus.
    UnknownDevice,
    /// A quoted argument was opened but never closed.
    UnterminatedQuote,
    /// A text argument exceeds its fixed capacity.
    TooLong(&'static str),
    /// A program with this name is already registered.
    DuplicateProgram,
    /// The program table is full.
    TableFull,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingArgument(what) => write!(f, "missing argument: {what}"),
            Self::NotANumber(what) => write!(f, "not a number: {what}"),
            Self::OutOfRange(what) => write!(f, "out of range: {what}"),
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::UnknownSource => write!(f, "unknown volume source"),
            Self::UnknownDevice => write!(f, "unknown device"),
            Self::UnterminatedQuote => write!(f, "unterminated quote"),
            Self::TooLong(what) => write!(f, "too long: {what}"),
            Self::DuplicateProgram => write!(f, "duplicate program name"),
            Self::TableFull => write!(f, "program table full"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// No sensor with that name is registered on this board.
    NotFound,
    /// The driver reported a read failure.
    ReadFailed,
    /// Reading is outside the physically plausible range.
    OutOfRange,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "sensor not found"),
            Self::ReadFailed => write!(f, "read failed"),
            Self::OutOfRange => write!(f, "reading out of range"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// No actuator with that name is registered on this board.
    NotFound,
    /// The driver rejected the command.
    CommandFailed,
    /// Actuator still reports running after the settle timeout.
    SettleTimeout,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "actuator not found"),
            Self::CommandFailed => write!(f, "command failed"),
            Self::SettleTimeout => write!(f, "did not settle before timeout"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Safety faults
// ---------------------------------------------------------------------------

/// Conditions evaluated by the safety supervisor.
///
/// Each maps to one bit so several simultaneous conditions can be reported
/// in a single mask. The critical ones always stop every program; the rest
/// are notification only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SafetyFault {
    WaterTempOutOfBand = 0x0001,
    WaterTempCritical = 0x0002,
    AirTempOutOfBand = 0x0004,
    ElectronicsTempHigh = 0x0008,
    ElectronicsTempCritical = 0x0010,
    PhOutOfBand = 0x0020,
    PhCritical = 0x0040,
    DissolvedOxygenLow = 0x0080,
    TurbidityHigh = 0x0100,
    PressureHigh = 0x0200,
    VolumeLow = 0x0400,
    VolumeCritical = 0x0800,
    HeatingIneffective = 0x1000,
    SensorFault = 0x2000,
}

impl SafetyFault {
    /// Bits that force a stop of all programs regardless of toggles.
    pub const CRITICAL_MASK: u16 = Self::WaterTempCritical.mask()
        | Self::PhCritical.mask()
        | Self::VolumeCritical.mask()
        | Self::HeatingIneffective.mask();

    /// Return the bitmask for this fault.
    pub const fn mask(self) -> u16 {
        self as u16
    }

    pub const fn is_critical(self) -> bool {
        Self::CRITICAL_MASK & self.mask() != 0
    }

    /// Alarm-tier conditions are logged at error level; the rest are warnings.
    pub const fn is_alarm(self) -> bool {
        self.is_critical() || matches!(self, Self::ElectronicsTempCritical | Self::SensorFault)
    }
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaterTempOutOfBand => write!(f, "water temperature out of band"),
            Self::WaterTempCritical => write!(f, "water temperature critical"),
            Self::AirTempOutOfBand => write!(f, "air temperature out of band"),
            Self::ElectronicsTempHigh => write!(f, "electronics temperature high"),
            Self::ElectronicsTempCritical => write!(f, "electronics temperature critical"),
            Self::PhOutOfBand => write!(f, "pH out of band"),
            Self::PhCritical => write!(f, "pH critical"),
            Self::DissolvedOxygenLow => write!(f, "dissolved oxygen low"),
            Self::TurbidityHigh => write!(f, "turbidity high"),
            Self::PressureHigh => write!(f, "pressure high"),
            Self::VolumeLow => write!(f, "volume at or below minimum"),
            Self::VolumeCritical => write!(f, "volume at maximum"),
            Self::HeatingIneffective => write!(f, "temperature not rising while heating"),
            Self::SensorFault => write!(f, "sensor fault"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_mask_covers_stop_conditions() {
        assert!(SafetyFault::WaterTempCritical.is_critical());
        assert!(SafetyFault::PhCritical.is_critical());
        assert!(SafetyFault::VolumeCritical.is_critical());
        assert!(SafetyFault::HeatingIneffective.is_critical());
        assert!(!SafetyFault::ElectronicsTempCritical.is_critical());
        assert!(!SafetyFault::TurbidityHigh.is_critical());
    }

    #[test]
    fn display_is_prefixed_by_category() {
        let e: Error = ValidationError::UnknownSource.into();
        assert_eq!(e.to_string(), "validation: unknown volume source");
        let e: Error = SensorError::ReadFailed.into();
        assert_eq!(e.to_string(), "sensor: read failed");
    }
}
