//! Raw frame to [`SensorReading`] conversion.
//!
//! Decoding is a pure function of the frame bytes, its receipt time, the
//! electrical constants, the thresholds and the optional gust value: the same
//! inputs always yield the same reading or the same error.

use std::collections::BTreeMap;

use crate::conditions;
use crate::config::{ElectricalConstants, Thresholds};
use crate::error::{AagError, Result};
use crate::protocol::{codes, split_responses, Block};
use crate::reading::{DeviceInfo, RawFrame, SensorReading};

const ABS_ZERO: f64 = 273.15;
const ADC_MAX: f64 = 1023.0;

/// Physical ranges a decoded value must fall into.
pub mod limits {
    pub const TEMP_C: (f64, f64) = (-60.0, 80.0);
    pub const SKY_TEMP_C: (f64, f64) = (-100.0, 80.0);
    pub const RAIN_FREQUENCY: (f64, f64) = (0.0, 10_000.0);
    pub const PWM_PERCENT: (f64, f64) = (0.0, 100.0);
    pub const WIND_KPH: (f64, f64) = (0.0, 200.0);
    pub const HUMIDITY_PCT: (f64, f64) = (0.0, 100.0);
    pub const PRESSURE_HPA: (f64, f64) = (300.0, 1100.0);
    pub const SUPPLY_V: (f64, f64) = (0.0, 30.0);
}

/// Stateless decoder carrying the board constants and thresholds.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    pub constants: ElectricalConstants,
    pub thresholds: Thresholds,
}

impl Decoder {
    pub fn new(constants: ElectricalConstants, thresholds: Thresholds) -> Self {
        Self {
            constants,
            thresholds,
        }
    }

    /// Decode a frame without gust history.
    pub fn decode(&self, frame: &RawFrame) -> Result<SensorReading> {
        self.decode_with_gust(frame, None)
    }

    /// Decode a frame, classifying the wind with the gust seen by the caller
    /// over its recent readings.
    pub fn decode_with_gust(&self, frame: &RawFrame, gust_kph: Option<f64>) -> Result<SensorReading> {
        let blocks = index_blocks(&frame.bytes)?;
        let c = &self.constants;

        let sky_temp_c = required(&blocks, codes::SKY_TEMP)?.int()? as f64 / 100.0;
        let ambient_temp_c = required(&blocks, codes::SENSOR_TEMP)?.int()? as f64 / 100.0;
        let ldr_kohm = ldr_kohm(required(&blocks, codes::LDR)?.int()?, c);
        let rain_sensor_temp_c = ntc_temp_c(required(&blocks, codes::RAIN_SENSOR_TEMP)?.int()?, c);
        let supply_voltage = supply_voltage(required(&blocks, codes::ZENER)?.int()?, c)?;
        let rain_frequency = required(&blocks, codes::RAIN_FREQ)?.int()?;
        let pwm_percent = required(&blocks, codes::PWM)?.int()? as f64 * 100.0 / ADC_MAX;

        let mut internal_errors = [0i64; 4];
        for (slot, code) in internal_errors.iter_mut().zip(codes::ERRORS) {
            *slot = required(&blocks, code)?.int()?;
        }

        let light_sensor_freq = optional(&blocks, codes::LIGHT_FREQ)
            .map(Block::int)
            .transpose()?;
        let wind_speed_kph = optional(&blocks, codes::WIND)
            .map(|b| b.int().map(wind_kph))
            .transpose()?;
        let humidity_pct = match (
            optional(&blocks, codes::HUMIDITY_16BIT),
            optional(&blocks, codes::HUMIDITY),
        ) {
            (Some(b), _) => Some(b.int()? as f64 * 125.0 / 65536.0 - 6.0),
            (None, Some(b)) => Some(b.int()? as f64 * 100.0 / ADC_MAX),
            (None, None) => None,
        };
        let pressure_hpa = optional(&blocks, codes::PRESSURE)
            .map(|b| b.int().map(|raw| raw as f64 / 16.0 / 100.0))
            .transpose()?;
        let switch_open = match (
            blocks.contains_key(codes::SWITCH_OPEN),
            blocks.contains_key(codes::SWITCH_CLOSED),
        ) {
            (true, true) => {
                return Err(AagError::Decode(
                    "switch reported both open and closed".into(),
                ))
            }
            (true, false) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        };

        check("sky_temp_c", sky_temp_c, limits::SKY_TEMP_C)?;
        check("ambient_temp_c", ambient_temp_c, limits::TEMP_C)?;
        check("rain_sensor_temp_c", rain_sensor_temp_c, limits::TEMP_C)?;
        check("rain_frequency", rain_frequency as f64, limits::RAIN_FREQUENCY)?;
        check("pwm_percent", pwm_percent, limits::PWM_PERCENT)?;
        check("supply_voltage", supply_voltage, limits::SUPPLY_V)?;
        if !ldr_kohm.is_finite() || ldr_kohm < 0.0 {
            return Err(AagError::Validation {
                field: "ldr_kohm",
                value: ldr_kohm,
                min: 0.0,
                max: f64::INFINITY,
            });
        }
        if let Some(v) = wind_speed_kph {
            check("wind_speed_kph", v, limits::WIND_KPH)?;
        }
        if let Some(v) = humidity_pct {
            check("humidity_pct", v, limits::HUMIDITY_PCT)?;
        }
        if let Some(v) = pressure_hpa {
            check("pressure_hpa", v, limits::PRESSURE_HPA)?;
        }

        let conditions = conditions::classify(
            sky_temp_c - ambient_temp_c,
            wind_speed_kph,
            gust_kph,
            rain_frequency,
            &self.thresholds,
        );

        Ok(SensorReading {
            captured_at: frame.received_at,
            sky_temp_c,
            ambient_temp_c,
            rain_sensor_temp_c,
            rain_frequency,
            ldr_kohm,
            light_sensor_freq,
            supply_voltage,
            pwm_percent,
            wind_speed_kph,
            humidity_pct,
            pressure_hpa,
            switch_open,
            internal_errors,
            conditions,
        })
    }
}

/// Decode the identification responses read when a connection opens.
pub fn decode_device_info(bytes: &[u8]) -> Result<DeviceInfo> {
    let blocks = index_blocks(bytes)?;
    Ok(DeviceInfo {
        name: required(&blocks, codes::INTERNAL_NAME)?.value.clone(),
        firmware: required(&blocks, codes::FIRMWARE)?.value.clone(),
        serial_number: optional(&blocks, codes::SERIAL_NUMBER)
            .map(|b| b.value.clone())
            .unwrap_or_default(),
        has_anemometer: optional(&blocks, codes::ANEMOMETER)
            .map(|b| b.value.eq_ignore_ascii_case("Y"))
            .unwrap_or(false),
    })
}

fn index_blocks(bytes: &[u8]) -> Result<BTreeMap<String, Block>> {
    let mut blocks = BTreeMap::new();
    for block in split_responses(bytes)?.into_iter().flatten() {
        if blocks.contains_key(&block.code) {
            return Err(AagError::Decode(format!("duplicate block '{}'", block.code)));
        }
        blocks.insert(block.code.clone(), block);
    }
    Ok(blocks)
}

fn required<'a>(blocks: &'a BTreeMap<String, Block>, code: &str) -> Result<&'a Block> {
    blocks
        .get(code)
        .ok_or_else(|| AagError::Decode(format!("missing block '{}'", code)))
}

fn optional<'a>(blocks: &'a BTreeMap<String, Block>, code: &str) -> Option<&'a Block> {
    blocks.get(code)
}

fn check(field: &'static str, value: f64, (min, max): (f64, f64)) -> Result<()> {
    if value.is_nan() || value < min || value > max {
        return Err(AagError::Validation {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn clamp_adc(raw: i64) -> f64 {
    raw.clamp(1, 1022) as f64
}

fn ldr_kohm(raw: i64, c: &ElectricalConstants) -> f64 {
    c.ldr_pull_up_kohm / (ADC_MAX / clamp_adc(raw) - 1.0)
}

fn ntc_temp_c(raw: i64, c: &ElectricalConstants) -> f64 {
    let r = c.rain_pull_up_kohm / (ADC_MAX / clamp_adc(raw) - 1.0);
    let ln_r = (r / c.rain_res_at_25_kohm).ln();
    1.0 / (ln_r / c.rain_beta + 1.0 / (ABS_ZERO + 25.0)) - ABS_ZERO
}

fn supply_voltage(raw: i64, c: &ElectricalConstants) -> Result<f64> {
    if raw <= 0 {
        return Err(AagError::Validation {
            field: "zener_adc",
            value: raw as f64,
            min: 1.0,
            max: ADC_MAX,
        });
    }
    Ok(ADC_MAX * c.zener_voltage / raw as f64)
}

fn wind_kph(raw: i64) -> f64 {
    if raw == 0 {
        0.0
    } else {
        raw as f64 * 0.84 + 3.0
    }
}
