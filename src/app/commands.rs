//! Inbound operator commands.
//!
//! Operator input arrives as whitespace-delimited text from the serial
//! console, web UI or MQTT bridge. [`AppCommand::parse`] only routes on the
//! first word; each component (program, volume ledger, safety supervisor,
//! PID manager) parses its own arguments with [`Args`].

use heapless::{String, Vec};

use crate::error::ValidationError;

/// Maximum tokens in one command line.
pub const MAX_ARGS: usize = 16;

/// Maximum length of a command line kept for deferred parsing.
pub const MAX_COMMAND_LEN: usize = 160;

// ── Tokenizer ─────────────────────────────────────────────────

/// Tokenized command line. Double-quoted runs form one token (quotes removed).
#[derive(Debug, Clone)]
pub struct Args<'a> {
    tokens: Vec<&'a str, MAX_ARGS>,
}

impl<'a> Args<'a> {
    pub fn parse(line: &'a str) -> Result<Self, ValidationError> {
        let mut tokens = Vec::new();
        let mut rest = line.trim_start();
        while !rest.is_empty() {
            let (token, tail) = if let Some(quoted) = rest.strip_prefix('"') {
                let end = quoted.find('"').ok_or(ValidationError::UnterminatedQuote)?;
                (&quoted[..end], &quoted[end + 1..])
            } else {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                (&rest[..end], &rest[end..])
            };
            tokens
                .push(token)
                .map_err(|_| ValidationError::TooLong("arguments"))?;
            rest = tail.trim_start();
        }
        if tokens.is_empty() {
            return Err(ValidationError::MissingArgument("command"));
        }
        Ok(Self { tokens })
    }

    /// First word.
    pub fn command(&self) -> &'a str {
        self.tokens.first().copied().unwrap_or_default()
    }

    /// Number of tokens including the command word.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'a str> {
        self.tokens.get(index).copied()
    }

    pub fn text(&self, index: usize, what: &'static str) -> Result<&'a str, ValidationError> {
        self.get(index).ok_or(ValidationError::MissingArgument(what))
    }

    /// A finite number.
    pub fn f32(&self, index: usize, what: &'static str) -> Result<f32, ValidationError> {
        let raw = self.text(index, what)?;
        match raw.parse::<f32>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(ValidationError::NotANumber(what)),
        }
    }

    pub fn positive(&self, index: usize, what: &'static str) -> Result<f32, ValidationError> {
        let v = self.f32(index, what)?;
        if v > 0.0 { Ok(v) } else { Err(ValidationError::OutOfRange(what)) }
    }

    pub fn non_negative(&self, index: usize, what: &'static str) -> Result<f32, ValidationError> {
        let v = self.f32(index, what)?;
        if v >= 0.0 { Ok(v) } else { Err(ValidationError::OutOfRange(what)) }
    }

    /// `None` when the argument is absent; an error when present but malformed.
    pub fn optional_positive(&self, index: usize, what: &'static str) -> Result<Option<f32>, ValidationError> {
        if self.get(index).is_none() {
            return Ok(None);
        }
        self.positive(index, what).map(Some)
    }

    pub fn flag(&self, index: usize, what: &'static str) -> Result<bool, ValidationError> {
        parse_flag(self.text(index, what)?).ok_or(ValidationError::OutOfRange(what))
    }
}

/// `true`/`false`, `on`/`off`, `1`/`0`.
pub fn parse_flag(word: &str) -> Option<bool> {
    match word.to_ascii_lowercase().as_str() {
        "true" | "on" | "1" => Some(true),
        "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Copy text into a fixed-capacity string, rejecting overflow.
pub fn bounded<const N: usize>(text: &str, what: &'static str) -> Result<String<N>, ValidationError> {
    String::try_from(text).map_err(|_| ValidationError::TooLong(what))
}

// ── Routed command ────────────────────────────────────────────

/// Registered program names, matching the words operators type.
pub mod program_names {
    pub const FERMENTATION: &str = "Fermentation";
    pub const CIP: &str = "CIP";
    pub const DRAIN: &str = "Drain";
    pub const MIX: &str = "Mix";
    pub const STERILIZATION: &str = "PressureSterilization";
    pub const TESTS: &str = "Tests";
}

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    /// Start a program; `line` is handed to its own parser.
    StartProgram { program: &'static str, line: String<MAX_COMMAND_LEN> },
    /// `stop` (everything) or `stop <program>`.
    Stop(Option<String<32>>),
    Pause,
    Resume,
    /// Routed to the volume ledger's parser.
    Volume(String<MAX_COMMAND_LEN>),
    /// Routed to the safety supervisor's parser.
    Safety(String<MAX_COMMAND_LEN>),
    /// Routed to the PID manager's parser.
    Pid(String<MAX_COMMAND_LEN>),
    /// `set_pid_enabled true|false` for the fermentation program.
    SetPidEnabled(bool),
    /// Emit a telemetry snapshot.
    Status,
    Help,
}

impl AppCommand {
    pub fn parse(line: &str) -> Result<Self, ValidationError> {
        use program_names as p;

        let args = Args::parse(line)?;
        let keep = || bounded::<MAX_COMMAND_LEN>(line.trim(), "command");
        let start = |program: &'static str| -> Result<Self, ValidationError> {
            Ok(Self::StartProgram { program, line: keep()? })
        };

        match args.command().to_ascii_lowercase().as_str() {
            "fermentation" => start(p::FERMENTATION),
            "cip" => start(p::CIP),
            "drain" => start(p::DRAIN),
            "mix" => start(p::MIX),
            "sterilization" | "pressure_sterilization" => start(p::STERILIZATION),
            "tests" | "test" => start(p::TESTS),
            "stop" => Ok(Self::Stop(match args.get(1) {
                Some(name) => Some(bounded(name, "program name")?),
                None => None,
            })),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "adjust_volume" | "set_initial_volume" | "volume" => Ok(Self::Volume(keep()?)),
            "alarms" | "warnings" | "set_check_interval" => Ok(Self::Safety(keep()?)),
            "set_pid" | "set_hysteresis" => Ok(Self::Pid(keep()?)),
            "set_pid_enabled" => Ok(Self::SetPidEnabled(args.flag(1, "enabled")?)),
            "status" => Ok(Self::Status),
            "help" => Ok(Self::Help),
            _ => Err(ValidationError::UnknownCommand),
        }
    }
}

/// One line per command, for the `help` command.
pub const HELP: &[&str] = &[
    "fermentation <temp> <ph> <do> <nutrient_conc> <base_conc> <duration_h> <nutrient_delay_h> <name> [\"comment\"]",
    "cip <target_temp_c> <duration_min>",
    "drain <rate_percent> <duration_s>",
    "mix <speed_rpm> [duration_min]",
    "sterilization <pressure_bar> <hold_min> [heatup_timeout_min]",
    "tests | test <actuator> <value> <duration_s>",
    "stop [program] | pause | resume | status",
    "adjust_volume <NaOH|Nutrient|Microalgae|Removed> <litres>",
    "set_initial_volume <litres> | volume info | volume reset",
    "alarms <true|false> | warnings <true|false> | set_check_interval <seconds>",
    "set_pid <temperature|ph|do|pressure> <kp> <ki> <kd> | set_hysteresis <variable> <band>",
    "set_pid_enabled <true|false>",
];
