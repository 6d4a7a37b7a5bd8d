use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Soft comfort bounds on the air temperature (°C).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_band"))]
#[serde(default)]
pub struct ComfortBand {
    pub t_min_c: f64,
    pub t_max_c: f64,
}

impl Default for ComfortBand {
    fn default() -> Self {
        Self {
            t_min_c: 19.0,
            t_max_c: 24.0,
        }
    }
}

fn validate_band(band: &ComfortBand) -> Result<(), ValidationError> {
    if band.t_min_c < band.t_max_c {
        Ok(())
    } else {
        Err(ValidationError::new("t_min_c must be below t_max_c"))
    }
}

impl ComfortBand {
    /// Degrees below the lower bound, zero inside the band.
    pub fn under(&self, t_air_c: f64) -> f64 {
        (self.t_min_c - t_air_c).max(0.0)
    }

    /// Degrees above the upper bound, zero inside the band.
    pub fn over(&self, t_air_c: f64) -> f64 {
        (t_air_c - self.t_max_c).max(0.0)
    }
}

/// Weights of the heating cost objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObjectiveWeights {
    /// Penalty per squared degree of discomfort (Rho)
    #[validate(range(min = 0.0))]
    pub rho: f64,
    /// Brings `price · power` to the order of magnitude of the comfort terms
    #[validate(range(min = 0.0))]
    pub price_scale: f64,
    /// Extra factor on overheating penalties, > 1
    #[validate(range(min = 1.0))]
    pub asym_weight: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            rho: 1.0,
            price_scale: 1e-4,
            asym_weight: 2.0,
        }
    }
}
