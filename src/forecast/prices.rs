//! Electricity tariffs.
//!
//! Three pricing strategies sit behind [`TariffModel`]: a flat price, a
//! peak/off-peak schedule and a three-grade colour tariff whose grade for
//! each calendar day comes from a [`GradeCalendar`].

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::warn;

use super::tempo::{GradeCalendar, StaticGradeCalendar};
use crate::domain::{TariffGrade, TariffQuote};

pub const DEFAULT_PRICE_EUR_PER_KWH: f64 = 0.15;

/// Peak window of the colour tariff, `[start, end)` in hours.
pub const GRADED_PEAK_WINDOW: (f64, f64) = (6.0, 22.0);

pub trait TariffModel: Send + Sync {
    fn quote(&self, date: NaiveDate, hour: f64) -> TariffQuote;
}

// ============================================================================
// Scenario price documents
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakPrices {
    pub peak: f64,
    pub off_peak: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakSchedule {
    pub peak: f64,
    pub off_peak: f64,
    /// `[start, end)` hour intervals billed at the peak price
    pub peak_hours: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedSpec {
    #[serde(default = "GradedSpec::default_blue")]
    pub blue: PeakPrices,
    #[serde(default = "GradedSpec::default_white")]
    pub white: PeakPrices,
    #[serde(default = "GradedSpec::default_red")]
    pub red: PeakPrices,
    /// Known grades per day; days missing here fall back to blue
    #[serde(default)]
    pub calendar: BTreeMap<NaiveDate, TariffGrade>,
}

impl GradedSpec {
    fn default_blue() -> PeakPrices {
        PeakPrices {
            peak: 0.1609,
            off_peak: 0.1296,
        }
    }

    fn default_white() -> PeakPrices {
        PeakPrices {
            peak: 0.1894,
            off_peak: 0.1486,
        }
    }

    fn default_red() -> PeakPrices {
        PeakPrices {
            peak: 0.7562,
            off_peak: 0.1568,
        }
    }

    pub fn prices_for(&self, grade: TariffGrade) -> PeakPrices {
        match grade {
            TariffGrade::Blue => self.blue,
            TariffGrade::White => self.white,
            TariffGrade::Red => self.red,
        }
    }
}

/// `prices` section of a scenario. Precedence: tempo, then schedule, then
/// the flat default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSpec {
    #[serde(default = "default_price")]
    pub default: f64,
    #[serde(default)]
    pub schedule: Option<PeakSchedule>,
    #[serde(default)]
    pub tempo: Option<GradedSpec>,
}

fn default_price() -> f64 {
    DEFAULT_PRICE_EUR_PER_KWH
}

impl Default for PriceSpec {
    fn default() -> Self {
        Self {
            default: DEFAULT_PRICE_EUR_PER_KWH,
            schedule: None,
            tempo: None,
        }
    }
}

impl PriceSpec {
    /// Builds the tariff described by this document. `calendar` replaces the
    /// document's own grade calendar when given.
    pub fn build(&self, calendar: Option<Arc<dyn GradeCalendar>>) -> Arc<dyn TariffModel> {
        if let Some(tempo) = &self.tempo {
            let calendar = calendar.unwrap_or_else(|| {
                Arc::new(StaticGradeCalendar::new(tempo.calendar.clone()))
            });
            return Arc::new(GradedTariff::new(tempo.clone(), calendar));
        }
        if let Some(schedule) = &self.schedule {
            return Arc::new(PeakOffPeakTariff::new(schedule.clone()));
        }
        Arc::new(FlatTariff::new(self.default))
    }
}

// ============================================================================
// Strategies
// ============================================================================

pub struct FlatTariff {
    price: f64,
}

impl FlatTariff {
    pub fn new(price: f64) -> Self {
        Self { price }
    }
}

impl TariffModel for FlatTariff {
    fn quote(&self, _date: NaiveDate, _hour: f64) -> TariffQuote {
        TariffQuote {
            price_eur_per_kwh: self.price,
            label: "BASE".to_string(),
        }
    }
}

pub struct PeakOffPeakTariff {
    schedule: PeakSchedule,
}

impl PeakOffPeakTariff {
    pub fn new(schedule: PeakSchedule) -> Self {
        Self { schedule }
    }

    pub fn is_peak(&self, hour: f64) -> bool {
        self.schedule
            .peak_hours
            .iter()
            .any(|&(start, end)| hour >= start && hour < end)
    }
}

impl TariffModel for PeakOffPeakTariff {
    fn quote(&self, _date: NaiveDate, hour: f64) -> TariffQuote {
        if self.is_peak(hour) {
            TariffQuote {
                price_eur_per_kwh: self.schedule.peak,
                label: "HP".to_string(),
            }
        } else {
            TariffQuote {
                price_eur_per_kwh: self.schedule.off_peak,
                label: "HC".to_string(),
            }
        }
    }
}

/// Colour-graded tariff with a fixed 06:00–22:00 peak window.
pub struct GradedTariff {
    spec: GradedSpec,
    calendar: Arc<dyn GradeCalendar>,
    warned: Mutex<HashSet<NaiveDate>>,
}

impl GradedTariff {
    pub fn new(spec: GradedSpec, calendar: Arc<dyn GradeCalendar>) -> Self {
        Self {
            spec,
            calendar,
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn grade_for(&self, date: NaiveDate) -> TariffGrade {
        match self.calendar.grade_for(date) {
            Some(grade) => grade,
            None => {
                if self.warned.lock().insert(date) {
                    warn!(%date, "tariff grade unknown, assuming BLUE");
                }
                TariffGrade::Blue
            }
        }
    }
}

impl TariffModel for GradedTariff {
    fn quote(&self, date: NaiveDate, hour: f64) -> TariffQuote {
        let grade = self.grade_for(date);
        let prices = self.spec.prices_for(grade);
        let (start, end) = GRADED_PEAK_WINDOW;
        if hour >= start && hour < end {
            TariffQuote {
                price_eur_per_kwh: prices.peak,
                label: format!("{grade}_HP"),
            }
        } else {
            TariffQuote {
                price_eur_per_kwh: prices.off_peak,
                label: format!("{grade}_HC"),
            }
        }
    }
}
