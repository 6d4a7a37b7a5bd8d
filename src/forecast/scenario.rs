//! Scenario documents driving the simulated weather and tariffs.
//!
//! A scenario is read once at startup and never mutated. A missing or
//! unreadable document is not fatal: callers fall back to
//! [`Scenario::default`], whose lookups return deterministic defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use super::prices::PriceSpec;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Daily temperature envelope and cloud cover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayWeather {
    #[serde(default)]
    pub t_min: f64,
    #[serde(default = "default_t_max")]
    pub t_max: f64,
    #[serde(default)]
    pub nebulosity: f64,
}

fn default_t_max() -> f64 {
    10.0
}

impl Default for DayWeather {
    fn default() -> Self {
        Self {
            t_min: 0.0,
            t_max: default_t_max(),
            nebulosity: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub weather: Vec<DayWeather>,
    #[serde(default)]
    pub prices: PriceSpec,
    #[serde(default)]
    pub initial_temp: Option<f64>,
    #[serde(default)]
    pub duration_days: Option<u32>,
}

impl Scenario {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ScenarioError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&raw).map_err(|source| ScenarioError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the scenario, or an empty one if it cannot be read.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path).await {
            Ok(scenario) => {
                info!(
                    path = %path.display(),
                    days = scenario.weather.len(),
                    "scenario loaded"
                );
                scenario
            }
            Err(e) => {
                error!(error = %e, "scenario unavailable, using defaults");
                Self::default()
            }
        }
    }

    /// Weather for a scenario day, looping over the scenario when the
    /// index runs past its end.
    pub fn day(&self, day_index: i64) -> DayWeather {
        if self.weather.is_empty() {
            return DayWeather::default();
        }
        let len = self.weather.len() as i64;
        self.weather[day_index.rem_euclid(len) as usize]
    }
}
