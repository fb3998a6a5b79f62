//! Core data shapes shared by every pipeline stage: time windows, source
//! descriptors, raw (bronze) records and canonical (silver) records.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::{PipelineError, Result};

/// Canonical pollutant codes. Values are always µg/m³ after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pollutant {
    #[serde(rename = "pm10")]
    Pm10,
    #[serde(rename = "pm25")]
    Pm25,
    #[serde(rename = "so2")]
    So2,
    #[serde(rename = "co")]
    Co,
    #[serde(rename = "o3")]
    O3,
    #[serde(rename = "no2")]
    No2,
}

impl Pollutant {
    pub fn code(&self) -> &'static str {
        match self {
            Pollutant::Pm10 => "pm10",
            Pollutant::Pm25 => "pm25",
            Pollutant::So2 => "so2",
            Pollutant::Co => "co",
            Pollutant::O3 => "o3",
            Pollutant::No2 => "no2",
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

const WINDOW_KEY_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Half-open interval [since, until) scoping a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { since, until }
    }

    /// Window covering whole days [since, until], half-open at midnight UTC
    /// after the last day.
    pub fn from_dates(since: NaiveDate, until: NaiveDate) -> Self {
        let start = since.and_hms_opt(0, 0, 0).expect("midnight is valid");
        let end = until
            .succ_opt()
            .unwrap_or(until)
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid");
        Self {
            since: DateTime::from_naive_utc_and_offset(start, Utc),
            until: DateTime::from_naive_utc_and_offset(end, Utc),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.since >= self.until
    }

    /// Stable key used by the cache index and layer file names.
    pub fn key(&self) -> String {
        format!(
            "{}-{}",
            self.since.format(WINDOW_KEY_FORMAT),
            self.until.format(WINDOW_KEY_FORMAT)
        )
    }

    /// Inverse of [`TimeWindow::key`], used when walking layer directories.
    pub fn from_key(key: &str) -> Result<Self> {
        let (since, until) = key.split_once('-').ok_or_else(|| PipelineError::Cache {
            message: format!("malformed window key '{key}'"),
        })?;
        let parse = |s: &str| -> Result<DateTime<Utc>> {
            let naive = NaiveDateTime::parse_from_str(s, WINDOW_KEY_FORMAT).map_err(|e| {
                PipelineError::Cache {
                    message: format!("malformed window key '{key}': {e}"),
                }
            })?;
            Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
        };
        Ok(Self {
            since: parse(since)?,
            until: parse(until)?,
        })
    }
}

/// How a source is reached on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMethod {
    #[serde(rename = "feature-layer-query")]
    FeatureLayerQuery,
    #[serde(rename = "rest-api")]
    RestApi,
    #[serde(rename = "static-file")]
    StaticFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessSpec {
    pub method: AccessMethod,
    pub url: String,
}

/// Geographic bounding box (WGS84).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeoBounds {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// Canonical identity and position of one monitoring station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationEntry {
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Immutable description of one upstream provider, loaded from
/// `registry/sources/<id>.json`. The mapping tables live here so label and
/// station dictionaries are versioned alongside the source definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub source_id: String,
    pub enabled: bool,
    pub access: AccessSpec,
    pub capabilities: Vec<Pollutant>,
    #[serde(default)]
    pub expected_bounds: Option<GeoBounds>,
    /// Offset of the source's local zone from UTC, in minutes (Brasília: -180).
    pub timezone_offset_minutes: i32,
    /// strftime format of raw timestamps. Formats containing `%z`/`%:z`
    /// carry their own offset; others are naive local time.
    pub timestamp_format: String,
    /// Courtesy throttle between requests to this source.
    #[serde(default)]
    pub min_request_interval_ms: u64,
    /// Per-request record cap for paginated feature-layer queries.
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub license: Option<String>,
    /// Raw pollutant label -> canonical code.
    pub pollutant_labels: HashMap<String, Pollutant>,
    /// Raw station key -> canonical station identity.
    pub stations: HashMap<String, StationEntry>,
}

impl SourceDescriptor {
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60)
            .expect("descriptor offset within +/-24h")
    }
}

/// One fetched observation, exactly as the source delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_id: String,
    pub station: String,
    pub pollutant: String,
    pub value: String,
    pub unit: String,
    pub timestamp: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// Normalized observation. Never mutated after creation; corrections are new
/// records, not in-place edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub station_id: String,
    pub pollutant: Pollutant,
    /// Concentration in µg/m³.
    pub value: f64,
    pub timestamp_utc: DateTime<Utc>,
    /// Same instant as `timestamp_utc`, expressed in the source's local zone.
    pub timestamp_local: DateTime<FixedOffset>,
    pub latitude: f64,
    pub longitude: f64,
    pub source_id: String,
    #[serde(default)]
    pub license: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_window_detection() {
        let t = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        assert!(TimeWindow::new(t, t).is_empty());
        assert!(TimeWindow::new(t + chrono::Duration::hours(1), t).is_empty());
        assert!(!TimeWindow::new(t, t + chrono::Duration::hours(1)).is_empty());
    }

    #[test]
    fn window_key_round_trips() {
        let w = TimeWindow::new(
            Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2023, 6, 2, 0, 0, 0).unwrap(),
        );
        let key = w.key();
        assert_eq!(key, "20230601T000000Z-20230602T000000Z");
        assert_eq!(TimeWindow::from_key(&key).unwrap(), w);
    }

    #[test]
    fn window_from_dates_is_half_open() {
        let w = TimeWindow::from_dates(
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
        );
        assert_eq!(w.since, Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(w.until, Utc.with_ymd_and_hms(2023, 6, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn pollutant_codes_are_stable() {
        assert_eq!(Pollutant::Pm25.code(), "pm25");
        assert_eq!(
            serde_json::to_string(&Pollutant::Co).unwrap(),
            "\"co\"".to_string()
        );
    }
}
