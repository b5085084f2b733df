//! Sky, wind and rain classification.

use serde::{Deserialize, Serialize};

use crate::config::Thresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkyCondition {
    Unknown,
    Clear,
    Cloudy,
    #[serde(rename = "Very Cloudy")]
    VeryCloudy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindCondition {
    Unknown,
    Calm,
    Windy,
    #[serde(rename = "Very Windy")]
    VeryWindy,
    Gusty,
    #[serde(rename = "Very Gusty")]
    VeryGusty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RainCondition {
    Unknown,
    Dry,
    Wet,
    Rain,
}

/// Classification attached to every published reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    pub sky: SkyCondition,
    pub wind: WindCondition,
    pub rain: RainCondition,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gust_kph: Option<f64>,
    pub safe: bool,
}

impl Default for Conditions {
    fn default() -> Self {
        Self {
            sky: SkyCondition::Unknown,
            wind: WindCondition::Unknown,
            rain: RainCondition::Unknown,
            gust_kph: None,
            safe: false,
        }
    }
}

pub fn classify_sky(sky_delta_c: f64, t: &Thresholds) -> SkyCondition {
    if sky_delta_c.is_nan() {
        SkyCondition::Unknown
    } else if sky_delta_c < t.cloudy {
        SkyCondition::Clear
    } else if sky_delta_c < t.very_cloudy {
        SkyCondition::Cloudy
    } else {
        SkyCondition::VeryCloudy
    }
}

/// Gusts take precedence over sustained wind once they cross `gusty`.
pub fn classify_wind(speed_kph: Option<f64>, gust_kph: Option<f64>, t: &Thresholds) -> WindCondition {
    let Some(speed) = speed_kph else {
        return WindCondition::Unknown;
    };
    let gust = gust_kph.unwrap_or(speed).max(speed);

    if gust >= t.very_gusty {
        WindCondition::VeryGusty
    } else if speed >= t.very_windy {
        WindCondition::VeryWindy
    } else if gust >= t.gusty {
        WindCondition::Gusty
    } else if speed >= t.windy {
        WindCondition::Windy
    } else {
        WindCondition::Calm
    }
}

/// The capacitive sensor frequency drops as water collects on it.
pub fn classify_rain(rain_frequency: i64, t: &Thresholds) -> RainCondition {
    let freq = rain_frequency as f64;
    if freq > t.wet {
        RainCondition::Dry
    } else if freq > t.rainy {
        RainCondition::Wet
    } else {
        RainCondition::Rain
    }
}

/// Build the full classification.
///
/// A reading is safe when the sky is not very cloudy, the wind is not very
/// windy or very gusty and the rain sensor is dry. A missing anemometer does
/// not make a reading unsafe.
pub fn classify(
    sky_delta_c: f64,
    wind_speed_kph: Option<f64>,
    gust_kph: Option<f64>,
    rain_frequency: i64,
    t: &Thresholds,
) -> Conditions {
    let sky = classify_sky(sky_delta_c, t);
    let wind = classify_wind(wind_speed_kph, gust_kph, t);
    let rain = classify_rain(rain_frequency, t);

    let sky_ok = matches!(sky, SkyCondition::Clear | SkyCondition::Cloudy);
    let wind_ok = !matches!(wind, WindCondition::VeryWindy | WindCondition::VeryGusty);
    let rain_ok = rain == RainCondition::Dry;

    Conditions {
        sky,
        wind,
        rain,
        gust_kph: wind_speed_kph.map(|speed| gust_kph.unwrap_or(speed).max(speed)),
        safe: sky_ok && wind_ok && rain_ok,
    }
}
