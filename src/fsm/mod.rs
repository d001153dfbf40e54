//! Process state machine.
//!
//! Owns the registered programs and at most one current program:
//!
//! ```text
//!            start                finish
//!   Idle ───────────▶ Running ─────────────▶ Completed
//!    ▲                 │  ▲ │                    │
//!    │           pause │  │ │ stop               │ start
//!    │                 ▼  │ ▼                    ▼
//!    │              Paused  Stopped ──start──▶ Running
//!    │                 │
//!    │                 └─stop─▶ Stopped
//!    │
//!    └─ Error: actuators still running after the settle bound;
//!       left by the next successful start.
//! ```
//!
//! Start, stop and update are serialized under one mutex. The settle wait
//! that follows every stop runs with that mutex released, so the safety
//! task can always get in. [`current_state`](ProcessStateMachine::current_state)
//! reads an atomic mirror and never takes the lock.
//!
//! Lock order: this machine's lock, then the PID manager or the volume
//! ledger (programs take those inside their own calls).

pub mod settle;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use heapless::{String, Vec};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::app::events::AppEvent;
use crate::app::ports::{ActuatorBus, Clock, EmergencyStop, EventSink};
use crate::error::{Error, ValidationError};
use crate::names;
use crate::plant::lock;
use crate::programs::{Parameters, Program};

use settle::{SettleOutcome, SettlePolicy, wait_for_settle};

/// Registration table capacity.
pub const MAX_PROGRAMS: usize = 8;

/// Longest registered program name.
pub const MAX_PROGRAM_NAME: usize = 24;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ProcessState {
    Idle = 0,
    Running = 1,
    Paused = 2,
    Completed = 3,
    Stopped = 4,
    Error = 5,
}

impl ProcessState {
    /// Convert the atomic mirror back. Out-of-range values map to `Error`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Completed,
            4 => Self::Stopped,
            5 => Self::Error,
            _ => {
                debug_assert!(false, "invalid process state: {raw}");
                Self::Error
            }
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Completed => "Completed",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        }
    }

    /// A program is current in these states.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl core::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What one call to [`ProcessStateMachine::update`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing running.
    Idle,
    /// The current program ran one tick.
    Ran,
    /// The current program finished this tick.
    Completed { program: &'static str, settle: SettleOutcome },
}

/// Parameters of the current (or last) program, for telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct ProgramSnapshot {
    pub state: ProcessState,
    pub program: Option<&'static str>,
    pub parameters: Parameters,
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

struct ProgramSlot {
    name: String<MAX_PROGRAM_NAME>,
    program: Box<dyn Program>,
}

struct Inner {
    state: ProcessState,
    current: Option<usize>,
    programs: Vec<ProgramSlot, MAX_PROGRAMS>,
}

impl Inner {
    fn find(&self, name: &str) -> Option<usize> {
        self.programs
            .iter()
            .position(|slot| slot.name.as_str().eq_ignore_ascii_case(name))
    }
}

/// A stop that happened under the lock, waiting for its settle check.
struct PendingSettle {
    program: &'static str,
    owned: &'static [&'static str],
    from: ProcessState,
    to: ProcessState,
}

pub struct ProcessStateMachine {
    inner: Mutex<Inner>,
    state: AtomicU8,
    actuators: Arc<dyn ActuatorBus>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    settle: SettlePolicy,
}

impl ProcessStateMachine {
    pub fn new(
        actuators: Arc<dyn ActuatorBus>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
        settle: SettlePolicy,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ProcessState::Idle,
                current: None,
                programs: Vec::new(),
            }),
            state: AtomicU8::new(ProcessState::Idle as u8),
            actuators,
            clock,
            sink,
            settle,
        }
    }

    fn set_state(&self, inner: &mut Inner, to: ProcessState) -> ProcessState {
        let from = inner.state;
        inner.state = to;
        self.state.store(to as u8, Ordering::SeqCst);
        if from != to {
            info!("Process state: {from} -> {to}");
        }
        from
    }

    fn announce(&self, from: ProcessState, to: ProcessState, program: Option<&'static str>) {
        if from != to {
            self.sink.emit(&AppEvent::StateChanged { from, to, program });
        }
    }

    // ── Registration ──────────────────────────────────────────

    /// Register `program` under `name` (matched case-insensitively).
    pub fn add_program(&self, name: &str, program: Box<dyn Program>) -> Result<(), Error> {
        let mut inner = lock(&self.inner);
        if inner.find(name).is_some() {
            error!("Program '{name}' already registered");
            return Err(ValidationError::DuplicateProgram.into());
        }
        let name: String<MAX_PROGRAM_NAME> = String::try_from(name).map_err(|_| {
            error!("Program name '{name}' too long");
            ValidationError::TooLong("program name")
        })?;
        inner
            .programs
            .push(ProgramSlot { name, program })
            .map_err(|slot| {
                error!("Program table full, '{}' rejected", slot.name);
                ValidationError::TableFull
            })?;
        Ok(())
    }

    /// Registered names in registration order.
    pub fn program_names(&self) -> Vec<String<MAX_PROGRAM_NAME>, MAX_PROGRAMS> {
        lock(&self.inner).programs.iter().map(|s| s.name.clone()).collect()
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Parse `command` with the named program and start it.
    ///
    /// Nothing changes unless the program parses, starts and reports
    /// running.
    pub fn start_program(&self, name: &str, command: &str) -> Result<(), Error> {
        let (from, program) = {
            let mut inner = lock(&self.inner);
            let Some(index) = inner.find(name) else {
                warn!("Start: no program named '{name}'");
                return Err(Error::NotFound);
            };
            if let Some(current) = inner.current {
                let running = inner.programs[current].program.name();
                warn!("Start of '{name}' rejected: '{running}' is {}", inner.state);
                return Err(Error::Conflict("a program is already running"));
            }

            let program = &mut inner.programs[index].program;
            if let Err(e) = program.parse_command(command) {
                warn!("{}: rejected command '{command}': {e}", program.name());
                return Err(e);
            }
            if let Err(e) = program.start() {
                warn!("{}: refused to start: {e}", program.name());
                return Err(e);
            }
            if !program.is_running() {
                warn!("{}: did not start", program.name());
                return Err(Error::Precondition("program did not start"));
            }
            let program = program.name();
            inner.current = Some(index);
            (self.set_state(&mut inner, ProcessState::Running), program)
        };
        self.announce(from, ProcessState::Running, Some(program));
        Ok(())
    }

    /// One control tick of the current program. On completion the program's
    /// actuators are confirmed off before returning.
    pub fn update(&self) -> TickOutcome {
        let pending = {
            let mut inner = lock(&self.inner);
            if inner.state != ProcessState::Running {
                return TickOutcome::Idle;
            }
            let Some(index) = inner.current else {
                return TickOutcome::Idle;
            };
            let program = &mut inner.programs[index].program;
            program.update();
            if program.is_running() {
                return TickOutcome::Ran;
            }
            let (name, owned) = (program.name(), program.owned_actuators());
            info!("{name} completed");
            inner.current = None;
            let from = self.set_state(&mut inner, ProcessState::Completed);
            PendingSettle { program: name, owned, from, to: ProcessState::Completed }
        };
        let program = pending.program;
        let settle = self.finish_stop(pending);
        TickOutcome::Completed { program, settle }
    }

    /// Stop `name` if it is the current program.
    pub fn stop_program(&self, name: &str) -> Option<SettleOutcome> {
        let pending = {
            let mut inner = lock(&self.inner);
            let index = inner.current?;
            if !inner.programs[index].name.as_str().eq_ignore_ascii_case(name) {
                debug!("Stop '{name}': not the current program");
                return None;
            }
            self.stop_current(&mut inner, index)
        };
        Some(self.finish_stop(pending))
    }

    /// Stop whatever is current. `None` when nothing was.
    pub fn stop_all_programs(&self) -> Option<SettleOutcome> {
        let pending = {
            let mut inner = lock(&self.inner);
            let index = inner.current?;
            self.stop_current(&mut inner, index)
        };
        Some(self.finish_stop(pending))
    }

    fn stop_current(&self, inner: &mut Inner, index: usize) -> PendingSettle {
        let program = &mut inner.programs[index].program;
        program.stop();
        let (name, owned) = (program.name(), program.owned_actuators());
        inner.current = None;
        let from = self.set_state(inner, ProcessState::Stopped);
        PendingSettle { program: name, owned, from, to: ProcessState::Stopped }
    }

    /// Runs without the lock: announce, wait for the actuators, and fall
    /// into `Error` if they would not stop.
    fn finish_stop(&self, pending: PendingSettle) -> SettleOutcome {
        self.announce(pending.from, pending.to, Some(pending.program));
        let outcome = wait_for_settle(
            self.actuators.as_ref(),
            self.clock.as_ref(),
            pending.owned,
            &self.settle,
        );
        if let Some(event) = AppEvent::settle(pending.program, &outcome) {
            warn!("{}: actuators did not settle", pending.program);
            let moved = {
                let mut inner = lock(&self.inner);
                // A new start may have slipped in while we waited.
                (inner.current.is_none() && inner.state == pending.to)
                    .then(|| self.set_state(&mut inner, ProcessState::Error))
            };
            self.sink.emit(&event);
            if let Some(from) = moved {
                self.announce(from, ProcessState::Error, Some(pending.program));
            }
        }
        outcome
    }

    pub fn pause_current(&self) -> Result<(), Error> {
        let (from, program) = {
            let mut inner = lock(&self.inner);
            let Some(index) = inner.current.filter(|_| inner.state == ProcessState::Running) else {
                return Err(Error::Precondition("no running program"));
            };
            let program = &mut inner.programs[index].program;
            program.pause();
            let program = program.name();
            (self.set_state(&mut inner, ProcessState::Paused), program)
        };
        self.announce(from, ProcessState::Paused, Some(program));
        Ok(())
    }

    pub fn resume_current(&self) -> Result<(), Error> {
        let (from, program) = {
            let mut inner = lock(&self.inner);
            let Some(index) = inner.current.filter(|_| inner.state == ProcessState::Paused) else {
                return Err(Error::Precondition("no paused program"));
            };
            let program = &mut inner.programs[index].program;
            program.resume();
            let program = program.name();
            (self.set_state(&mut inner, ProcessState::Running), program)
        };
        self.announce(from, ProcessState::Running, Some(program));
        Ok(())
    }

    // ── Queries and settings ──────────────────────────────────

    pub fn current_program(&self) -> Option<&'static str> {
        let inner = lock(&self.inner);
        inner.current.map(|i| inner.programs[i].program.name())
    }

    /// Lock-free.
    pub fn current_state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn snapshot(&self) -> ProgramSnapshot {
        let inner = lock(&self.inner);
        match inner.current {
            Some(i) => ProgramSnapshot {
                state: inner.state,
                program: Some(inner.programs[i].program.name()),
                parameters: inner.programs[i].program.parameters(),
            },
            None => ProgramSnapshot {
                state: inner.state,
                program: None,
                parameters: Parameters::new(),
            },
        }
    }

    /// Forward a runtime setting to a registered program.
    pub fn apply_setting(&self, program: &str, key: &str, value: &str) -> Result<(), Error> {
        let mut inner = lock(&self.inner);
        let Some(index) = inner.find(program) else {
            warn!("Setting '{key}': no program named '{program}'");
            return Err(Error::NotFound);
        };
        inner.programs[index].program.apply_setting(key, value)
    }
}

impl EmergencyStop for ProcessStateMachine {
    /// Stop the current program, then command every actuator off whether or
    /// not a program owned it.
    fn emergency_stop(&self) {
        error!("EMERGENCY STOP");
        if self.stop_all_programs().is_none() {
            debug!("Emergency stop with no program current");
        }
        for name in names::ALL_ACTUATORS {
            match self.actuators.stop_actuator(name) {
                Ok(()) | Err(crate::error::ActuatorError::NotFound) => {}
                Err(e) => error!("Emergency stop {name}: {e}"),
            }
        }
    }
}
