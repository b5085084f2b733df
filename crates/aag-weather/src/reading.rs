//! Decoded sensor data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conditions::Conditions;

/// Raw bytes of one capture cycle as read from the serial port.
///
/// Holds the concatenated responses (handshakes included) of every command
/// issued during the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl RawFrame {
    pub fn new(bytes: Vec<u8>, received_at: DateTime<Utc>) -> Self {
        Self { bytes, received_at }
    }
}

/// Identity of the connected CloudWatcher, read once per connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub firmware: String,
    pub serial_number: String,
    pub has_anemometer: bool,
}

/// One validated reading of every sensor on the unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub captured_at: DateTime<Utc>,
    pub sky_temp_c: f64,
    /// IR sensor body temperature, used as the ambient reference
    pub ambient_temp_c: f64,
    pub rain_sensor_temp_c: f64,
    pub rain_frequency: i64,
    pub ldr_kohm: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub light_sensor_freq: Option<i64>,
    pub supply_voltage: f64,
    pub pwm_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub wind_speed_kph: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub humidity_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pressure_hpa: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub switch_open: Option<bool>,
    pub internal_errors: [i64; 4],
    pub conditions: Conditions,
}

impl SensorReading {
    /// Sky minus ambient temperature, the cloudiness indicator.
    pub fn sky_delta_c(&self) -> f64 {
        self.sky_temp_c - self.ambient_temp_c
    }
}
