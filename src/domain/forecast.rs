use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Exterior conditions at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub temperature_c: f64,
    /// Cloud cover fraction, 0 = clear sky, 1 = overcast
    pub nebulosity: f64,
}

/// Electricity price at one instant with the tariff it was taken from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffQuote {
    pub price_eur_per_kwh: f64,
    pub label: String,
}

/// Daily colour grade of a three-tier tariff.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum TariffGrade {
    #[default]
    Blue,
    White,
    Red,
}

/// One horizon step handed to the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub time: NaiveDateTime,
    pub t_ext_c: f64,
    pub nebulosity: f64,
    pub price_eur_per_kwh: f64,
    pub tariff_label: String,
}

/// Forecast over the optimizer horizon, one point per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub generated_at: NaiveDateTime,
    pub step_seconds: f64,
    pub points: Vec<ForecastPoint>,
}

impl Forecast {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn t_ext(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.t_ext_c).collect()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price_eur_per_kwh).collect()
    }
}
