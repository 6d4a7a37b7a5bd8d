use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use std::sync::Arc;

use super::{
    diurnal_temperature, synthetic_temperature, GradeCalendar, Scenario, TariffModel,
    WeatherOutlook,
};
use crate::domain::{Forecast, ForecastPoint, TariffQuote, WeatherSample};

/// Cloud cover assumed by the synthetic outlook, which carries no sky
/// information. Overcast means no solar gain is counted on.
pub const SYNTHETIC_NEBULOSITY: f64 = 1.0;

/// Fractional hour of day.
pub fn hour_of_day(at: NaiveDateTime) -> f64 {
    at.hour() as f64 + at.minute() as f64 / 60.0 + at.second() as f64 / 3600.0
}

/// Scenario-backed weather and tariff lookups.
///
/// Day indices count calendar days from `epoch`, the first simulated day.
pub struct Forecaster {
    scenario: Arc<Scenario>,
    tariff: Arc<dyn TariffModel>,
    epoch: NaiveDate,
}

impl Forecaster {
    pub fn new(scenario: Arc<Scenario>, tariff: Arc<dyn TariffModel>, epoch: NaiveDate) -> Self {
        Self {
            scenario,
            tariff,
            epoch,
        }
    }

    /// Forecaster using the tariff described in the scenario itself.
    pub fn from_scenario(
        scenario: Arc<Scenario>,
        epoch: NaiveDate,
        calendar: Option<Arc<dyn GradeCalendar>>,
    ) -> Self {
        let tariff = scenario.prices.build(calendar);
        Self::new(scenario, tariff, epoch)
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn epoch(&self) -> NaiveDate {
        self.epoch
    }

    pub fn day_index(&self, at: NaiveDateTime) -> i64 {
        (at.date() - self.epoch).num_days()
    }

    pub fn date_of(&self, day_index: i64) -> NaiveDate {
        self.epoch + Duration::days(day_index)
    }

    pub fn weather_at(&self, day_index: i64, hour: f64) -> WeatherSample {
        let day = self.scenario.day(day_index);
        WeatherSample {
            temperature_c: diurnal_temperature(&day, hour),
            nebulosity: day.nebulosity.clamp(0.0, 1.0),
        }
    }

    pub fn price_at(&self, day_index: i64, hour: f64) -> TariffQuote {
        self.tariff.quote(self.date_of(day_index), hour)
    }

    /// Weather and price at a simulated instant.
    pub fn conditions_at(&self, at: NaiveDateTime) -> (WeatherSample, TariffQuote) {
        let day_index = self.day_index(at);
        let hour = hour_of_day(at);
        (self.weather_at(day_index, hour), self.price_at(day_index, hour))
    }

    /// Forecast for `steps` consecutive steps of `step_seconds` starting at
    /// `start`. Prices are looked up step by step, so a horizon crossing
    /// midnight picks up the next day's tariff.
    pub fn horizon(
        &self,
        start: NaiveDateTime,
        steps: usize,
        step_seconds: u32,
        outlook: WeatherOutlook,
    ) -> Forecast {
        let steps_per_day = 86_400.0 / f64::from(step_seconds.max(1));
        let start_hour = start.hour() as f64;
        let dt = Duration::seconds(i64::from(step_seconds));

        let mut points = Vec::with_capacity(steps);
        let mut at = start;
        for i in 0..steps {
            let day_index = self.day_index(at);
            let hour = hour_of_day(at);
            let (t_ext_c, nebulosity) = match outlook {
                WeatherOutlook::Synthetic => (
                    synthetic_temperature(i, steps_per_day, start_hour),
                    SYNTHETIC_NEBULOSITY,
                ),
                WeatherOutlook::Scenario => {
                    let w = self.weather_at(day_index, hour);
                    (w.temperature_c, w.nebulosity)
                }
            };
            let quote = self.price_at(day_index, hour);
            points.push(ForecastPoint {
                time: at,
                t_ext_c,
                nebulosity,
                price_eur_per_kwh: quote.price_eur_per_kwh,
                tariff_label: quote.label,
            });
            at += dt;
        }

        Forecast {
            generated_at: start,
            step_seconds: f64::from(step_seconds),
            points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::DayWeather;
    use proptest::prelude::*;

    fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
    }

    fn scenario() -> Arc<Scenario> {
        Arc::new(
            Scenario::from_json(
                r#"{
                "weather": [
                    {"t_min": -4.0, "t_max": 4.0, "nebulosity": 0.9},
                    {"t_min": 0.0, "t_max": 8.0, "nebulosity": 0.1},
                    {"t_min": 3.0, "t_max": 5.0, "nebulosity": 1.4}
                ],
                "prices": {"tempo": {"calendar": {"2026-01-02": "RED"}}}
            }"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_weather_lookup_by_day() {
        let f = Forecaster::from_scenario(scenario(), epoch(), None);
        let w = f.weather_at(1, 16.0);
        assert!((w.temperature_c - 8.0).abs() < 1e-9);
        assert_eq!(w.nebulosity, 0.1);
        // Nebulosity is clamped into [0, 1].
        assert_eq!(f.weather_at(2, 0.0).nebulosity, 1.0);
    }

    #[test]
    fn test_empty_scenario_returns_defaults() {
        let f = Forecaster::from_scenario(Arc::new(Scenario::default()), epoch(), None);
        let w = f.weather_at(3, 4.0);
        assert_eq!(w.temperature_c, DayWeather::default().t_min);
        assert_eq!(f.price_at(3, 12.0).price_eur_per_kwh, 0.15);
    }

    #[test]
    fn test_horizon_crosses_midnight() {
        let f = Forecaster::from_scenario(scenario(), epoch(), None);
        let start = epoch().and_hms_opt(21, 0, 0).unwrap();
        let forecast = f.horizon(start, 16, 900, WeatherOutlook::Synthetic);

        assert_eq!(forecast.len(), 16);
        assert_eq!(forecast.points[0].tariff_label, "BLUE_HP");
        assert_eq!(forecast.points[4].tariff_label, "BLUE_HC");
        // 2026-01-02 00:00 onwards is a red day.
        assert_eq!(forecast.points[12].time.date(), epoch().succ_opt().unwrap());
        assert_eq!(forecast.points[12].tariff_label, "RED_HC");
    }

    #[test]
    fn test_horizon_scenario_outlook_follows_plant_weather() {
        let f = Forecaster::from_scenario(scenario(), epoch(), None);
        let start = epoch().and_hms_opt(0, 0, 0).unwrap();
        let forecast = f.horizon(start, 96, 900, WeatherOutlook::Scenario);
        for p in &forecast.points {
            let (w, _) = f.conditions_at(p.time);
            assert_eq!(p.t_ext_c, w.temperature_c);
            assert_eq!(p.nebulosity, w.nebulosity);
        }
    }

    #[test]
    fn test_synthetic_outlook_is_deterministic() {
        let f = Forecaster::from_scenario(Arc::new(Scenario::default()), epoch(), None);
        let start = epoch().and_hms_opt(8, 0, 0).unwrap();
        let a = f.horizon(start, 96, 900, WeatherOutlook::Synthetic);
        let b = f.horizon(start, 96, 900, WeatherOutlook::Synthetic);
        assert_eq!(a, b);
        assert!((a.points[0].t_ext_c - 10.0).abs() < 1e-9);
        assert!(a.points.iter().all(|p| p.nebulosity == SYNTHETIC_NEBULOSITY));
    }

    proptest! {
        #[test]
        fn prop_weather_wraps_around(n in 3i64..10_000, hour in 0.0f64..24.0) {
            let f = Forecaster::from_scenario(scenario(), epoch(), None);
            let len = f.scenario().weather.len() as i64;
            prop_assert_eq!(f.weather_at(n, hour), f.weather_at(n % len, hour));
        }
    }
}
