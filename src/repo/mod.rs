use std::sync::Arc;

use serde::{Deserialize, Serialize};
use validator::Validate;

pub mod series;

pub use series::*;

/// Where telemetry records go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkBackend {
    /// Retained in memory and readable back through [`HistoryReader`]
    #[default]
    Memory,
    /// Logged only; history reads fall back to defaults
    Tracing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HistoryConfig {
    pub backend: SinkBackend,
    #[validate(range(min = 1))]
    pub retention: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: SinkBackend::Memory,
            retention: 100_000,
        }
    }
}

pub struct Repositories {
    pub sink: Arc<dyn TelemetrySink>,
    pub history: Arc<dyn HistoryReader>,
}

impl Repositories {
    pub fn new(cfg: &HistoryConfig) -> Self {
        match cfg.backend {
            SinkBackend::Memory => {
                let store = Arc::new(InMemorySeriesStore::new(cfg.retention));
                Self {
                    sink: store.clone(),
                    history: store,
                }
            }
            SinkBackend::Tracing => Self {
                sink: Arc::new(TracingSink),
                // Nothing is retained, so every read finds nothing.
                history: Arc::new(InMemorySeriesStore::new(1)),
            },
        }
    }
}
