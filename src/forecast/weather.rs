use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::DayWeather;

/// Hour of the daily temperature minimum.
pub const TROUGH_HOUR: f64 = 4.0;

/// Where the optimizer takes its exterior temperature outlook from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherOutlook {
    /// Fixed sinusoid between 5 °C and 15 °C
    #[default]
    Synthetic,
    /// Same scenario the plant is driven by
    Scenario,
}

/// Sinusoidal diurnal curve through the day's envelope, trough at 04:00
/// and peak at 16:00.
pub fn diurnal_temperature(day: &DayWeather, hour: f64) -> f64 {
    let avg = (day.t_max + day.t_min) / 2.0;
    let amp = (day.t_max - day.t_min) / 2.0;
    avg - amp * (PI * (hour - TROUGH_HOUR) / 12.0).cos()
}

/// Exterior temperature of the synthetic outlook at horizon step `step`.
pub fn synthetic_temperature(step: usize, steps_per_day: f64, start_hour: f64) -> f64 {
    10.0 + 5.0 * (2.0 * PI * (step as f64 / steps_per_day + (start_hour - 8.0) / 24.0)).sin()
}
