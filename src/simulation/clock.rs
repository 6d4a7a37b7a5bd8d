use chrono::{DateTime, Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid ISO-8601 timestamp {input:?}")]
pub struct TimeParseError {
    pub input: String,
}

/// Parses an ISO-8601 timestamp into simulated (naive) time. Offsets are
/// accepted and dropped, keeping the local wall time they annotate.
pub fn parse_iso_timestamp(input: &str) -> Result<NaiveDateTime, TimeParseError> {
    let trimmed = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.naive_local());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt);
        }
    }
    Err(TimeParseError {
        input: input.to_string(),
    })
}

/// Simulated time, advanced in fixed steps and paced against the wall clock
/// by `speed_factor`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationClock {
    pub sim_time: NaiveDateTime,
    pub step_seconds: u32,
    pub speed_factor: f64,
    started_at: NaiveDateTime,
}

impl SimulationClock {
    pub fn new(start: NaiveDateTime, step_seconds: u32, speed_factor: f64) -> Self {
        Self {
            sim_time: start,
            step_seconds: step_seconds.max(1),
            speed_factor,
            started_at: start,
        }
    }

    pub fn started_at(&self) -> NaiveDateTime {
        self.started_at
    }

    pub fn step(&self) -> Duration {
        Duration::seconds(i64::from(self.step_seconds))
    }

    pub fn step_hours(&self) -> f64 {
        f64::from(self.step_seconds) / 3600.0
    }

    /// Moves simulated time forward by one step and returns the new instant.
    pub fn advance(&mut self) -> NaiveDateTime {
        self.sim_time += self.step();
        self.sim_time
    }

    pub fn elapsed(&self) -> Duration {
        self.sim_time - self.started_at
    }

    /// Wall-clock time one step should take. `None` when pacing is off
    /// (non-positive or infinite speed factor).
    pub fn wall_budget(&self) -> Option<std::time::Duration> {
        if self.speed_factor.is_finite() && self.speed_factor > 0.0 {
            Some(std::time::Duration::from_secs_f64(
                f64::from(self.step_seconds) / self.speed_factor,
            ))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 1)
            .unwrap()
            .and_hms_opt(23, 58, 0)
            .unwrap()
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut clock = SimulationClock::new(start(), 60, 60.0);
        let a = clock.advance();
        let b = clock.advance();
        assert!(b > a);
        assert_eq!(b.date(), NaiveDate::from_ymd_opt(2026, 2, 2).unwrap());
        assert_eq!(clock.elapsed(), Duration::minutes(2));
    }

    #[test]
    fn test_wall_budget() {
        let clock = SimulationClock::new(start(), 60, 60.0);
        assert_eq!(clock.wall_budget(), Some(std::time::Duration::from_secs(1)));

        let batch = SimulationClock::new(start(), 60, f64::INFINITY);
        assert_eq!(batch.wall_budget(), None);
    }

    #[rstest]
    #[case("2026-02-01T12:30:00")]
    #[case("2026-02-01T12:30:00.250")]
    #[case("2026-02-01T12:30")]
    #[case("2026-02-01T12:30:00+01:00")]
    #[case("2026-02-01T12:30:00Z")]
    fn test_parse_iso_timestamp(#[case] input: &str) {
        let parsed = parse_iso_timestamp(input).unwrap();
        assert_eq!(parsed.date(), NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(parsed.format("%H:%M").to_string(), "12:30");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_iso_timestamp("yesterday").is_err());
        assert!(parse_iso_timestamp("").is_err());
    }
}
