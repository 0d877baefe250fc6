//! ---
//! hmi_section: "02-messaging-wire-protocol"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Wire protocol helpers for the telemetry link."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Operation name understood by fan/pump controllers.
pub const SET_FAN_SPEED_OPERATION: &str = "set-wind-pump-speed";

/// Water tank fill level push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterLevel {
    /// Device identifier.
    #[serde(rename = "device-sn")]
    pub device_id: String,
    /// Fill level as a fraction of capacity, `0.0..=1.0`.
    #[serde(rename = "water-amount")]
    pub water_amount: f64,
}

impl WaterLevel {
    /// Fill level in percent.
    pub fn percent(&self) -> f64 {
        self.water_amount * 100.0
    }
}

/// Temperature and humidity meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Device identifier.
    #[serde(rename = "device-sn")]
    pub device_id: String,
    /// Air temperature.
    pub temperature: f64,
    /// Relative humidity.
    pub humidity: f64,
}

/// Anemometer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindSpeed {
    /// Device identifier.
    #[serde(rename = "device-sn")]
    pub device_id: String,
    /// Air speed.
    #[serde(rename = "flow-rate")]
    pub flow_rate: f64,
}

/// Water pipe flow meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterFlow {
    /// Device identifier.
    #[serde(rename = "device-sn")]
    pub device_id: String,
    /// Flow rate.
    #[serde(rename = "flow-rate")]
    pub flow_rate: f64,
    /// Line pressure.
    #[serde(rename = "water-pressure")]
    pub water_pressure: f64,
}

/// Gas detector concentrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasReading {
    /// Device identifier.
    #[serde(rename = "device-sn")]
    pub device_id: String,
    /// Carbon monoxide.
    #[serde(rename = "CO")]
    pub co: f64,
    /// Hydrogen chloride.
    #[serde(rename = "HCl")]
    pub hcl: f64,
    /// Sulphur dioxide.
    #[serde(rename = "SO2")]
    pub so2: f64,
}

/// Plant-wide production and consumption curves addressed to the reserved
/// `stats` identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Coal consumption, line 1.
    #[serde(rename = "coal-1", default)]
    pub coal_1: Vec<f64>,
    /// Coal consumption, line 2.
    #[serde(rename = "coal-2", default)]
    pub coal_2: Vec<f64>,
    /// Water used.
    #[serde(rename = "w-used", default)]
    pub water_used: Vec<f64>,
    /// Electricity used.
    #[serde(rename = "e-used", default)]
    pub energy_used: Vec<f64>,
}

/// Fan/pump speed steps. Serialised as the bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FanSpeed {
    /// Off.
    #[default]
    Stopped,
    /// Step 1.
    Low,
    /// Step 2.
    Medium,
    /// Step 3.
    High,
}

impl FanSpeed {
    /// Wire value of this step.
    pub const fn as_u8(self) -> u8 {
        match self {
            FanSpeed::Stopped => 0,
            FanSpeed::Low => 1,
            FanSpeed::Medium => 2,
            FanSpeed::High => 3,
        }
    }
}

impl TryFrom<u8> for FanSpeed {
    type Error = InvalidFanSpeed;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FanSpeed::Stopped),
            1 => Ok(FanSpeed::Low),
            2 => Ok(FanSpeed::Medium),
            3 => Ok(FanSpeed::High),
            other => Err(InvalidFanSpeed(other)),
        }
    }
}

impl Serialize for FanSpeed {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for FanSpeed {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        FanSpeed::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Fan speed outside `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("fan speed {0} out of range 0..=3")]
pub struct InvalidFanSpeed(pub u8);

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Command body sent as `device_control`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceControl {
    /// Target device.
    #[serde(rename = "device-sn")]
    pub device_id: String,
    /// Operation name.
    pub operation: String,
    /// Operation-specific parameters, flattened next to the operation.
    #[serde(flatten)]
    pub params: Map<String, JsonValue>,
}

impl DeviceControl {
    /// Command without parameters.
    pub fn new(device_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            operation: operation.into(),
            params: Map::new(),
        }
    }

    /// Attach one parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Set a fan or pump to the given speed step.
    pub fn set_fan_speed(device_id: impl Into<String>, speed: FanSpeed) -> Self {
        Self::new(device_id, SET_FAN_SPEED_OPERATION).with_param("fan-speed", speed.as_u8())
    }
}
