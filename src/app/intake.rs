//! Operator command intake.
//!
//! Console, web UI and MQTT readers run on their own threads and hand
//! complete lines to the command task through a bounded `embassy-sync`
//! channel. The command task is the only caller of
//! [`AppService::handle_command`](super::service::AppService::handle_command).
//!
//! ```text
//! ┌──────────────┐  CommandLine  ┌──────────────┐
//! │ stdin / MQTT │──────────────▶│ command task │
//! └──────────────┘               └──────────────┘
//! ```

use core::time::Duration;

use burster::Limiter;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use super::commands::{MAX_COMMAND_LEN, bounded};
use crate::error::ValidationError;

/// One raw operator line.
pub type CommandLine = heapless::String<MAX_COMMAND_LEN>;

/// Channel depth for queued operator lines.
pub const CMD_DEPTH: usize = 8;

pub type CommandChannel = Channel<CriticalSectionRawMutex, CommandLine, CMD_DEPTH>;

/// Inbound command channel: intake threads → command task.
pub static CMD_CHANNEL: CommandChannel = Channel::new();

/// Why a line was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeError {
    Empty,
    TooLong,
    RateLimited,
    QueueFull,
}

impl core::fmt::Display for IntakeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty line"),
            Self::TooLong => write!(f, "line too long"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::QueueFull => write!(f, "command queue full"),
        }
    }
}

/// Per-source producer: trims, bounds and rate-limits lines before queueing.
pub struct CommandIntake {
    channel: &'static CommandChannel,
    rate_limiter: burster::TokenBucket<fn() -> Duration>,
}

impl CommandIntake {
    pub fn new(channel: &'static CommandChannel) -> Self {
        Self::with_time_provider(channel, platform_now)
    }

    /// Rate-limit against `now` instead of the monotonic platform clock.
    pub fn with_time_provider(channel: &'static CommandChannel, now: fn() -> Duration) -> Self {
        Self {
            channel,
            rate_limiter: burster::TokenBucket::new_with_time_provider(
                10,
                10, // 10 lines per second, 10 burst capacity
                now,
            ),
        }
    }

    pub fn submit(&mut self, raw: &str) -> Result<(), IntakeError> {
        let line = raw.trim();
        if line.is_empty() {
            return Err(IntakeError::Empty);
        }
        let line: CommandLine = bounded(line, "command").map_err(|_: ValidationError| IntakeError::TooLong)?;
        if self.rate_limiter.try_consume(1).is_err() {
            warn!("intake: rate limited, dropping '{line}'");
            return Err(IntakeError::RateLimited);
        }
        self.channel.try_send(line).map_err(|_| {
            warn!("intake: queue full");
            IntakeError::QueueFull
        })
    }
}

/// Drain every queued line into `handle`. Returns how many were handled.
pub fn drain(channel: &CommandChannel, mut handle: impl FnMut(&str)) -> usize {
    let mut handled = 0;
    while let Ok(line) = channel.try_receive() {
        handle(line.as_str());
        handled += 1;
    }
    handled
}

fn platform_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}
