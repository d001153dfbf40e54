//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to the
//! `log` facade (the console in the simulator, UART on a controller board).
//! An MQTT or web-UI bridge would implement the same trait.

use log::{error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::names;

/// Adapter that logs every [`AppEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

fn fmt_reading(value: Option<f32>) -> String {
    value.map_or_else(|| "--".to_owned(), |v| format!("{v:.2}"))
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &AppEvent) {
        match event {
            AppEvent::Telemetry(t) => {
                info!(
                    "TELEM | state={} program={} | T={}\u{00b0}C pH={} DO={}% P={}bar | \
                     vol={:.3}/{:.3}L | heater={}% base={} air={}% stir={}rpm | faults=0x{:04x}",
                    t.state,
                    t.program.unwrap_or("-"),
                    fmt_reading(t.reading(names::WATER_TEMP_SENSOR)),
                    fmt_reading(t.reading(names::PH_SENSOR)),
                    fmt_reading(t.reading(names::OXYGEN_SENSOR)),
                    fmt_reading(t.reading(names::PRESSURE_SENSOR)),
                    t.volume.current_l,
                    t.volume.max_allowed_l,
                    t.actuator(names::HEATING_PLATE).unwrap_or(0),
                    t.actuator(names::BASE_PUMP).unwrap_or(0),
                    t.actuator(names::AIR_PUMP).unwrap_or(0),
                    t.actuator(names::STIRRING_MOTOR).unwrap_or(0),
                    t.faults,
                );
                match serde_json::to_string(t.as_ref()) {
                    Ok(json) => log::debug!("TELEM | {json}"),
                    Err(e) => warn!("TELEM | serialization failed: {e}"),
                }
            }
            AppEvent::StateChanged { from, to, program } => {
                info!("STATE | {from} -> {to} ({})", program.unwrap_or("-"));
            }
            AppEvent::SettleTimedOut { program, still_running } => {
                warn!("SETTLE | {program}: still running {still_running:?}");
            }
            AppEvent::SafetyStop(faults) => {
                error!("SAFETY | emergency stop, faults=0x{faults:04x}");
            }
            AppEvent::FaultsChanged(0) => {
                info!("FAULT | all cleared");
            }
            AppEvent::FaultsChanged(faults) => {
                warn!("FAULT | active=0x{faults:04x}");
            }
            AppEvent::Started(state) => {
                info!("START | initial_state={state}");
            }
        }
    }
}
