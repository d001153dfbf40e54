//! Volume ledger.
//!
//! Nets fluid added and removed by actuators and by the operator into a
//! single current-volume figure bounded by the vessel limits.
//!
//! ```text
//!   nutrientPump ─┐
//!   basePump ─────┼─▶ pending deltas ─▶ update_volume() ─▶ current (clamped)
//!   drainPump ────┤                                    └─▶ cumulative totals
//!   operator ─────┘
//! ```
//!
//! Volumes are litres; actuators report millilitres.

use core::fmt;
use core::str::FromStr;

use log::{error, info, warn};
use serde::Serialize;

use crate::app::commands::Args;
use crate::app::ports::ActuatorBus;
use crate::config::VolumeConfig;
use crate::error::{Error, ValidationError};
use crate::names;

/// Net changes at or below this magnitude are ignored.
const MIN_CHANGE_L: f32 = 0.0001;

/// Fraction of the available headroom a single addition should use.
const SAFE_ADDITION_FRACTION: f32 = 0.05;

/// Where a volume change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolumeSource {
    NaOH,
    Nutrient,
    Microalgae,
    /// Volume taken out of the vessel; positive amounts reduce the volume.
    Removed,
}

impl FromStr for VolumeSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::NaOH, Self::Nutrient, Self::Microalgae, Self::Removed]
            .into_iter()
            .find(|src| src.as_str().eq_ignore_ascii_case(s))
            .ok_or(ValidationError::UnknownSource)
    }
}

impl VolumeSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NaOH => "NaOH",
            Self::Nutrient => "Nutrient",
            Self::Microalgae => "Microalgae",
            Self::Removed => "Removed",
        }
    }
}

impl fmt::Display for VolumeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-source amounts in litres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SourceTotals {
    pub naoh: f32,
    pub nutrient: f32,
    pub microalgae: f32,
    pub removed: f32,
}

impl SourceTotals {
    fn slot(&mut self, source: VolumeSource) -> &mut f32 {
        match source {
            VolumeSource::NaOH => &mut self.naoh,
            VolumeSource::Nutrient => &mut self.nutrient,
            VolumeSource::Microalgae => &mut self.microalgae,
            VolumeSource::Removed => &mut self.removed,
        }
    }

    /// Added minus removed.
    pub fn net(&self) -> f32 {
        self.naoh + self.nutrient + self.microalgae - self.removed
    }

    fn accumulate(&mut self, other: &Self) {
        self.naoh += other.naoh;
        self.nutrient += other.nutrient;
        self.microalgae += other.microalgae;
        self.removed += other.removed;
    }
}

/// Serializable ledger snapshot for telemetry and the `volume info` command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeInfo {
    pub current_l: f32,
    pub max_allowed_l: f32,
    pub min_l: f32,
    pub available_l: f32,
    pub baseline_set: bool,
    pub cumulative: SourceTotals,
}

pub struct VolumeLedger {
    total_l: f32,
    max_fill_fraction: f32,
    min_l: f32,
    current_l: f32,
    initial_l: f32,
    baseline_set: bool,
    pending: SourceTotals,
    cumulative: SourceTotals,
}

impl VolumeLedger {
    pub fn new(config: &VolumeConfig) -> Self {
        Self {
            total_l: config.total_l,
            max_fill_fraction: config.max_fill_fraction,
            min_l: config.min_l,
            current_l: 0.0,
            initial_l: 0.0,
            baseline_set: false,
            pending: SourceTotals::default(),
            cumulative: SourceTotals::default(),
        }
    }

    // ── Recording ─────────────────────────────────────────────

    /// Record a change by source name (case-insensitive). Unknown sources
    /// and non-finite amounts are rejected and nothing is recorded.
    pub fn record_volume_change(&mut self, amount_l: f32, source: &str) -> Result<(), Error> {
        let source = source.parse::<VolumeSource>().inspect_err(|_| {
            error!("VOLUME | unknown source '{source}', {amount_l} L dropped");
        })?;
        self.record(amount_l, source)
    }

    pub fn record(&mut self, amount_l: f32, source: VolumeSource) -> Result<(), Error> {
        if !amount_l.is_finite() {
            error!("VOLUME | non-finite amount for {source} dropped");
            return Err(ValidationError::NotANumber("amount").into());
        }
        *self.pending.slot(source) += amount_l;
        Ok(())
    }

    /// Record and reconcile immediately.
    pub fn manually_adjust_volume(&mut self, amount_l: f32, source: &str, actuators: &dyn ActuatorBus) -> Result<(), Error> {
        self.record_volume_change(amount_l, source)?;
        self.update_volume(actuators);
        info!("VOLUME | manual {source} {amount_l:+.3} L, now {:.3} L", self.current_l);
        Ok(())
    }

    // ── Reconciliation ────────────────────────────────────────

    /// Pull actuator-reported volumes, apply the net change within bounds,
    /// roll pending deltas into the cumulative totals.
    pub fn update_volume(&mut self, actuators: &dyn ActuatorBus) {
        self.pending.nutrient += take_added(actuators, names::NUTRIENT_PUMP);
        self.pending.naoh += take_added(actuators, names::BASE_PUMP);
        self.pending.removed += take_removed(actuators, names::DRAIN_PUMP);

        let change = self.pending.net();
        if change.abs() > MIN_CHANGE_L {
            if self.baseline_set {
                let before = self.current_l;
                self.current_l = self.clamp(self.current_l + change);
                if (before + change - self.current_l).abs() > MIN_CHANGE_L {
                    warn!(
                        "VOLUME | change {change:+.3} L clamped, {before:.3} -> {:.3} L",
                        self.current_l
                    );
                }
            } else {
                warn!("VOLUME | no initial volume set, {change:+.3} L counted in totals only");
            }
        }

        self.cumulative.accumulate(&self.pending);
        self.pending = SourceTotals::default();
    }

    fn clamp(&self, volume: f32) -> f32 {
        volume.max(self.min_l).min(self.max_allowed())
    }

    // ── Baseline ──────────────────────────────────────────────

    /// Accepted only for `0 < volume <= max allowed`. Starts a fresh ledger:
    /// pending deltas and cumulative totals are zeroed.
    pub fn set_initial_volume(&mut self, volume_l: f32) -> Result<(), Error> {
        if !(volume_l > 0.0 && volume_l <= self.max_allowed()) {
            warn!(
                "VOLUME | initial volume {volume_l} rejected, must be in (0, {:.3}]",
                self.max_allowed()
            );
            return Err(ValidationError::OutOfRange("initial volume").into());
        }
        self.initial_l = volume_l;
        self.current_l = volume_l;
        self.baseline_set = true;
        self.pending = SourceTotals::default();
        self.cumulative = SourceTotals::default();
        info!("VOLUME | initial volume set to {volume_l:.3} L");
        Ok(())
    }

    /// Return to the last baseline and zero the pending deltas and totals.
    pub fn reset_volume(&mut self) {
        self.current_l = self.initial_l;
        self.pending = SourceTotals::default();
        self.cumulative = SourceTotals::default();
        info!("VOLUME | ledger reset to {:.3} L", self.initial_l);
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn max_allowed(&self) -> f32 {
        self.total_l * self.max_fill_fraction
    }

    pub fn min_volume(&self) -> f32 {
        self.min_l
    }

    pub fn current_volume(&self) -> f32 {
        self.current_l
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline_set
    }

    pub fn available_volume(&self) -> f32 {
        (self.max_allowed() - self.current_l).max(0.0)
    }

    pub fn is_safe_to_add_volume(&self, amount_l: f32) -> bool {
        amount_l.is_finite() && self.current_l + amount_l <= self.max_allowed()
    }

    /// Suggested single addition: a small share of the remaining headroom.
    pub fn max_safe_addition(&self) -> f32 {
        self.available_volume() * SAFE_ADDITION_FRACTION
    }

    pub fn is_at_ceiling(&self) -> bool {
        self.baseline_set && self.current_l >= self.max_allowed() - MIN_CHANGE_L
    }

    pub fn is_at_floor(&self) -> bool {
        self.baseline_set && self.current_l <= self.min_l + MIN_CHANGE_L
    }

    pub fn cumulative(&self) -> SourceTotals {
        self.cumulative
    }

    pub fn volume_info(&self) -> VolumeInfo {
        VolumeInfo {
            current_l: self.current_l,
            max_allowed_l: self.max_allowed(),
            min_l: self.min_l,
            available_l: self.available_volume(),
            baseline_set: self.baseline_set,
            cumulative: self.cumulative,
        }
    }

    // ── Command parser ────────────────────────────────────────

    /// `adjust_volume <source> <litres>`, `set_initial_volume <litres>`,
    /// `volume info` / `volume reset`.
    pub fn parse_command(&mut self, command: &str, actuators: &dyn ActuatorBus) -> Result<(), Error> {
        let args = Args::parse(command)?;
        match args.command().to_ascii_lowercase().as_str() {
            "adjust_volume" => {
                let source = args.text(1, "source")?;
                let amount = args.f32(2, "amount")?;
                self.manually_adjust_volume(amount, source, actuators)
            }
            "set_initial_volume" => self.set_initial_volume(args.f32(1, "volume")?),
            "volume" => match args.text(1, "subcommand")?.to_ascii_lowercase().as_str() {
                "info" => {
                    let i = self.volume_info();
                    info!(
                        "VOLUME | current={:.3} L max={:.3} L min={:.3} L available={:.3} L | \
                         NaOH={:.3} Nutrient={:.3} Microalgae={:.3} Removed={:.3}",
                        i.current_l,
                        i.max_allowed_l,
                        i.min_l,
                        i.available_l,
                        i.cumulative.naoh,
                        i.cumulative.nutrient,
                        i.cumulative.microalgae,
                        i.cumulative.removed,
                    );
                    Ok(())
                }
                "reset" => {
                    self.reset_volume();
                    Ok(())
                }
                _ => Err(ValidationError::UnknownCommand.into()),
            },
            _ => Err(ValidationError::UnknownCommand.into()),
        }
    }
}

fn take_added(actuators: &dyn ActuatorBus, name: &str) -> f32 {
    let ml = actuators.volume_added(name);
    if ml != 0.0 {
        actuators.reset_volume_added(name);
    }
    ml / 1000.0
}

fn take_removed(actuators: &dyn ActuatorBus, name: &str) -> f32 {
    let ml = actuators.volume_removed(name);
    if ml != 0.0 {
        actuators.reset_volume_removed(name);
    }
    ml / 1000.0
}
