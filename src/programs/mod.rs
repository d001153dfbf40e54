//! Process programs.
//!
//! Each program is one runnable procedure with its own parameters and
//! completion rule. Programs are built once at startup, registered in the
//! [`ProcessStateMachine`](crate::fsm::ProcessStateMachine) table and
//! re-initialized on every start without allocating.
//!
//! | Program                 | Command word    | Completes when                          |
//! |-------------------------|-----------------|-----------------------------------------|
//! | Fermentation            | `fermentation`  | duration elapsed or volume at ceiling   |
//! | CIP                     | `cip`           | duration elapsed                        |
//! | Drain                   | `drain`         | duration elapsed or volume at minimum   |
//! | Mix                     | `mix`           | optional duration elapsed               |
//! | PressureSterilization   | `sterilization` | hold time at pressure accumulated       |
//! | Tests                   | `tests`/`test`  | every step run                          |
//!
//! `update` never blocks and only touches actuators on state changes.
//! `stop` commands the owned actuators off and returns; the state machine
//! confirms they settled with its lock released.

pub mod actuator_test;
pub mod cip;
pub mod drain;
pub mod fermentation;
pub mod mix;
pub mod sterilization;

use heapless::{String, Vec};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{Error, ValidationError};

pub use actuator_test::ActuatorTestProgram;
pub use cip::CipProgram;
pub use drain::DrainProgram;
pub use fermentation::FermentationProgram;
pub use mix::MixProgram;
pub use sterilization::SterilizationProgram;

/// Capability set every program provides.
pub trait Program: Send {
    /// Registered name, e.g. `"Fermentation"`.
    fn name(&self) -> &'static str;

    /// Parse a full command line. On error nothing is changed.
    fn parse_command(&mut self, command: &str) -> Result<(), Error>;

    /// Begin a run with the last parsed parameters. Refuses (and stays not
    /// running) when a precondition is unmet.
    fn start(&mut self) -> Result<(), Error>;

    /// One control tick. May end the run by calling `stop` internally.
    fn update(&mut self);

    /// Drive actuators to a minimum-safe state, keeping accumulated state.
    fn pause(&mut self);

    fn resume(&mut self);

    /// Command every owned actuator off. Never waits.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    fn is_paused(&self) -> bool;

    fn parameters(&self) -> Parameters;

    /// Actuators this program may switch on; all of them are confirmed off
    /// after a stop.
    fn owned_actuators(&self) -> &'static [&'static str];

    /// Runtime setting such as `pid_enabled`.
    fn apply_setting(&mut self, key: &str, _value: &str) -> Result<(), Error> {
        log::warn!("{}: unknown setting '{key}'", self.name());
        Err(ValidationError::UnknownCommand.into())
    }
}

// ── Parameter snapshot ────────────────────────────────────────

pub const MAX_PARAMETERS: usize = 16;
pub const MAX_TEXT: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(f32),
    Flag(bool),
    Text(String<MAX_TEXT>),
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(v) => serializer.serialize_f32(*v),
            Self::Flag(v) => serializer.serialize_bool(*v),
            Self::Text(v) => serializer.serialize_str(v),
        }
    }
}

/// Bounded name→value snapshot of a program's parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    entries: Vec<(&'static str, ParamValue), MAX_PARAMETERS>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: &'static str, value: ParamValue) {
        if self.entries.push((name, value)).is_err() {
            log::debug!("parameter '{name}' dropped, snapshot full");
        }
    }

    pub fn number(mut self, name: &'static str, value: f32) -> Self {
        self.push(name, ParamValue::Number(value));
        self
    }

    pub fn flag(mut self, name: &'static str, value: bool) -> Self {
        self.push(name, ParamValue::Flag(value));
        self
    }

    /// Text longer than the snapshot capacity is truncated.
    pub fn text(mut self, name: &'static str, value: &str) -> Self {
        let mut s = String::new();
        for c in value.chars() {
            if s.push(c).is_err() {
                break;
            }
        }
        self.push(name, ParamValue::Text(s));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn get_number(&self, name: &str) -> Option<f32> {
        match self.get(name)? {
            ParamValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ParamValue)> {
        self.entries.iter().map(|(n, v)| (*n, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Parameters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// ── Run timer ─────────────────────────────────────────────────

/// Elapsed run time excluding paused intervals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTimer {
    started_ms: u64,
    paused_total_ms: u64,
    paused_since_ms: Option<u64>,
}

impl RunTimer {
    pub fn start(now_ms: u64) -> Self {
        Self {
            started_ms: now_ms,
            paused_total_ms: 0,
            paused_since_ms: None,
        }
    }

    pub fn pause(&mut self, now_ms: u64) {
        if self.paused_since_ms.is_none() {
            self.paused_since_ms = Some(now_ms);
        }
    }

    pub fn resume(&mut self, now_ms: u64) {
        if let Some(since) = self.paused_since_ms.take() {
            self.paused_total_ms += now_ms.saturating_sub(since);
        }
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        let paused_now = self.paused_since_ms.map_or(0, |since| now_ms.saturating_sub(since));
        now_ms
            .saturating_sub(self.started_ms)
            .saturating_sub(self.paused_total_ms + paused_now)
    }

    pub fn paused_total_ms(&self) -> u64 {
        self.paused_total_ms
    }
}

/// Minutes/hours/seconds given as `f32` to whole milliseconds.
pub(crate) fn to_ms(value: f32, unit_ms: f32) -> u64 {
    (value * unit_ms).round() as u64
}

pub(crate) const MS_PER_SECOND: f32 = 1_000.0;
pub(crate) const MS_PER_MINUTE: f32 = 60_000.0;
pub(crate) const MS_PER_HOUR: f32 = 3_600_000.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_timer_excludes_pauses() {
        let mut t = RunTimer::start(1_000);
        t.pause(2_000);
        assert_eq!(t.elapsed_ms(5_000), 1_000);
        t.resume(5_000);
        assert_eq!(t.elapsed_ms(6_000), 2_000);
        assert_eq!(t.paused_total_ms(), 3_000);
    }

    #[test]
    fn parameters_are_bounded() {
        let mut p = Parameters::new();
        for _ in 0..MAX_PARAMETERS + 4 {
            p = p.number("x", 1.0);
        }
        assert_eq!(p.len(), MAX_PARAMETERS);
    }

    #[test]
    fn long_text_is_truncated() {
        let p = Parameters::new().text("comment", &"c".repeat(200));
        match p.get("comment") {
            Some(ParamValue::Text(s)) => assert_eq!(s.len(), MAX_TEXT),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parameters_serialize_as_map() {
        let p = Parameters::new().number("temp", 37.0).flag("pid", true).text("name", "run");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"temp":37.0,"pid":true,"name":"run"}"#);
    }
}
