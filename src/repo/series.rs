//! Time-series records and the in-process stores behind them.

use std::collections::{BTreeMap, VecDeque};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One point of a measurement, line-protocol shaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    pub timestamp: Option<NaiveDateTime>,
}

impl SeriesRecord {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn at(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn location(&self) -> Option<&str> {
        self.tags.get("location").map(String::as_str)
    }
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn write(&self, record: SeriesRecord) -> Result<()>;
}

#[async_trait]
pub trait HistoryReader: Send + Sync {
    /// Most recent value of `field` in `measurement` tagged with `location`.
    async fn get_latest(&self, measurement: &str, location: &str, field: &str)
        -> Result<Option<f64>>;
}

/// Bounded in-memory store, newest records last.
pub struct InMemorySeriesStore {
    records: RwLock<VecDeque<SeriesRecord>>,
    retention: usize,
}

impl Default for InMemorySeriesStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl InMemorySeriesStore {
    pub fn new(retention: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            retention: retention.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// All retained records of `measurement`, oldest first.
    pub fn records(&self, measurement: &str) -> Vec<SeriesRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.measurement == measurement)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TelemetrySink for InMemorySeriesStore {
    async fn write(&self, record: SeriesRecord) -> Result<()> {
        let mut records = self.records.write();
        if records.len() >= self.retention {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }
}

#[async_trait]
impl HistoryReader for InMemorySeriesStore {
    async fn get_latest(
        &self,
        measurement: &str,
        location: &str,
        field: &str,
    ) -> Result<Option<f64>> {
        Ok(self
            .records
            .read()
            .iter()
            .rev()
            .filter(|r| r.measurement == measurement && r.location() == Some(location))
            .find_map(|r| r.fields.get(field).copied()))
    }
}

/// Sink that only logs what it is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn write(&self, record: SeriesRecord) -> Result<()> {
        debug!(
            measurement = %record.measurement,
            tags = ?record.tags,
            fields = ?record.fields,
            timestamp = ?record.timestamp,
            "telemetry record"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(location: &str, temperature: f64) -> SeriesRecord {
        SeriesRecord::new("sensors")
            .tag("location", location)
            .field("temperature", temperature)
    }

    #[tokio::test]
    async fn test_latest_value_per_location() {
        let store = InMemorySeriesStore::default();
        store.write(reading("living_room", 19.0)).await.unwrap();
        store.write(reading("office", 17.5)).await.unwrap();
        store.write(reading("living_room", 19.8)).await.unwrap();

        let latest = store
            .get_latest("sensors", "living_room", "temperature")
            .await
            .unwrap();
        assert_eq!(latest, Some(19.8));
        let office = store.get_latest("sensors", "office", "temperature").await.unwrap();
        assert_eq!(office, Some(17.5));
    }

    #[tokio::test]
    async fn test_missing_field_is_none() {
        let store = InMemorySeriesStore::default();
        store.write(reading("living_room", 19.0)).await.unwrap();
        let value = store
            .get_latest("sensors", "living_room", "humidity")
            .await
            .unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest() {
        let store = InMemorySeriesStore::new(2);
        for t in [18.0, 19.0, 20.0] {
            store.write(reading("room", t)).await.unwrap();
        }
        let kept: Vec<f64> = store
            .records("sensors")
            .iter()
            .map(|r| r.fields["temperature"])
            .collect();
        assert_eq!(kept, vec![19.0, 20.0]);
    }
}
