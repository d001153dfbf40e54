//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter       | Implements               | Connects to                |
//! |---------------|--------------------------|----------------------------|
//! | `config_file` | ConfigPort               | JSON document on disk      |
//! | `log_sink`    | EventSink                | `log` facade (console/UART)|
//! | `sim`         | SensorBus, ActuatorBus   | In-process vessel model    |
//! | `time`        | Clock                    | Host monotonic clock       |
//!
//! A controller board supplies its own `SensorBus`/`ActuatorBus` pair over
//! its drivers; everything above the port boundary is unchanged.

pub mod config_file;
pub mod log_sink;
pub mod sim;
pub mod time;
