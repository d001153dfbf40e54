//! Device names shared by the control core and the bus adapters.
//!
//! Single source of truth: programs, the PID manager, the volume ledger and
//! the safety supervisor address actuators and sensors by these names, and
//! every `ActuatorBus` / `SensorBus` implementation registers them.

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

pub const HEATING_PLATE: &str = "heatingPlate";
/// NaOH dosing pump (pH correction).
pub const BASE_PUMP: &str = "basePump";
pub const NUTRIENT_PUMP: &str = "nutrientPump";
pub const AIR_PUMP: &str = "airPump";
pub const DRAIN_PUMP: &str = "drainPump";
pub const SAMPLE_PUMP: &str = "samplePump";
pub const FILL_PUMP: &str = "fillPump";
pub const STIRRING_MOTOR: &str = "stirringMotor";
pub const LED_GROW_LIGHT: &str = "ledGrowLight";

/// Every actuator a fully populated fermenter board carries.
pub const ALL_ACTUATORS: [&str; 9] = [
    HEATING_PLATE,
    BASE_PUMP,
    NUTRIENT_PUMP,
    AIR_PUMP,
    DRAIN_PUMP,
    SAMPLE_PUMP,
    FILL_PUMP,
    STIRRING_MOTOR,
    LED_GROW_LIGHT,
];

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

pub const WATER_TEMP_SENSOR: &str = "waterTempSensor";
pub const AIR_TEMP_SENSOR: &str = "airTempSensor";
pub const ELECTRONIC_TEMP_SENSOR: &str = "electronicTempSensor";
pub const PH_SENSOR: &str = "phSensor";
/// Dissolved oxygen, percent saturation.
pub const OXYGEN_SENSOR: &str = "oxygenSensor";
pub const TURBIDITY_SENSOR: &str = "turbiditySensorSEN0554";
/// Vessel pressure, bar.
pub const PRESSURE_SENSOR: &str = "pressureSensor";

pub const ALL_SENSORS: [&str; 7] = [
    WATER_TEMP_SENSOR,
    AIR_TEMP_SENSOR,
    ELECTRONIC_TEMP_SENSOR,
    PH_SENSOR,
    OXYGEN_SENSOR,
    TURBIDITY_SENSOR,
    PRESSURE_SENSOR,
];
