//! Daily grade calendars for the colour tariff.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::domain::TariffGrade;

/// Source of the colour grade applying to a calendar day.
///
/// Lookups are synchronous; calendars backed by a remote service keep a
/// cache that is refreshed out of band.
pub trait GradeCalendar: Send + Sync {
    fn grade_for(&self, date: NaiveDate) -> Option<TariffGrade>;
}

/// Grades known up front, typically from the scenario document.
#[derive(Debug, Clone, Default)]
pub struct StaticGradeCalendar {
    grades: BTreeMap<NaiveDate, TariffGrade>,
}

impl StaticGradeCalendar {
    pub fn new(grades: BTreeMap<NaiveDate, TariffGrade>) -> Self {
        Self { grades }
    }
}

impl GradeCalendar for StaticGradeCalendar {
    fn grade_for(&self, date: NaiveDate) -> Option<TariffGrade> {
        self.grades.get(&date).copied()
    }
}

/// Grades fetched from an HTTP service publishing one colour per day at
/// `{base_url}/api/tempo/{YYYY-MM-DD}`.
pub struct HttpGradeCalendar {
    base_url: String,
    client: reqwest::Client,
    cache: RwLock<HashMap<NaiveDate, (Instant, TariffGrade)>>,
    ttl: Duration,
}

#[derive(Debug, Deserialize)]
struct RawGrade {
    #[allow(dead_code)]
    date: Option<NaiveDate>,
    color: TariffGrade,
}

impl HttpGradeCalendar {
    pub fn new(base_url: String, ttl: Duration, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("azru/0.2"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            base_url,
            client,
            cache: RwLock::new(HashMap::new()),
            ttl,
        })
    }

    fn url_for(&self, date: NaiveDate) -> String {
        format!(
            "{}/api/tempo/{}",
            self.base_url.trim_end_matches('/'),
            date.format("%Y-%m-%d")
        )
    }

    fn is_fresh(&self, date: NaiveDate) -> bool {
        self.cache
            .read()
            .get(&date)
            .is_some_and(|(fetched, _)| fetched.elapsed() < self.ttl)
    }

    /// Fetches the grade for one day and stores it in the cache.
    pub async fn fetch(&self, date: NaiveDate) -> Result<TariffGrade> {
        let url = self.url_for(date);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("grade GET failed")?;
        let status = resp.status();
        let body = resp.text().await.context("grade read failed")?;
        if !status.is_success() {
            anyhow::bail!("grade API error: HTTP {status}: {body}");
        }
        let raw: RawGrade = serde_json::from_str(&body).context("grade JSON parse failed")?;
        self.cache.write().insert(date, (Instant::now(), raw.color));
        debug!(%date, grade = %raw.color, "tariff grade fetched");
        Ok(raw.color)
    }

    /// Makes sure today's and tomorrow's grades are cached. Failures are
    /// logged and leave the previous cache content in place.
    pub async fn refresh(&self, today: NaiveDate) {
        for date in [today, today + ChronoDuration::days(1)] {
            if self.is_fresh(date) {
                continue;
            }
            if let Err(e) = self.fetch(date).await {
                warn!(%date, error = %e, "tariff grade refresh failed");
            }
        }
    }
}

impl GradeCalendar for HttpGradeCalendar {
    fn grade_for(&self, date: NaiveDate) -> Option<TariffGrade> {
        self.cache.read().get(&date).map(|(_, grade)| *grade)
    }
}
