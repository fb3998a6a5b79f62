//! Normalization engine: converts raw source records into canonical
//! records (unified pollutant codes, µg/m³ values, UTC + local timestamps).
//!
//! Normalization is a pure function of the raw record and the source's
//! static mapping tables. Any label, unit or station the tables do not know
//! is discarded with a reported reason, never guessed. Discards
//! are not errors: they are counted, logged and surfaced in the batch
//! outcome.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use tracing::{debug, info};

use crate::domain::{CanonicalRecord, Pollutant, RawRecord, SourceDescriptor};
use crate::observability::metrics;

/// Oldest timestamp the program cares about. Anything earlier is a raw-data
/// artifact (epoch zeros, placeholder dates) rather than a measurement.
const HISTORICAL_FLOOR: &str = "2000-01-01T00:00:00Z";

/// Tolerance for upstream clock skew on future timestamps, in minutes.
const CLOCK_SKEW_MINUTES: i64 = 60;

/// Unit conversion table, total for the supported pollutant set. µg/m³ is
/// canonical; CO arrives in mg/m³ from some sources and converts at ×1000.
static UNIT_FACTORS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("µg/m³", 1.0),
        ("µg/m3", 1.0),
        ("ug/m³", 1.0),
        ("ug/m3", 1.0),
        ("mg/m³", 1000.0),
        ("mg/m3", 1000.0),
        ("mg/m^3", 1000.0),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    UnmappedPollutant,
    UnknownUnit,
    UnknownStation,
    UnparsableValue,
    UnparsableTimestamp,
    TimestampOutOfRange,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::UnmappedPollutant => "unmapped_pollutant",
            DiscardReason::UnknownUnit => "unknown_unit",
            DiscardReason::UnknownStation => "unknown_station",
            DiscardReason::UnparsableValue => "unparsable_value",
            DiscardReason::UnparsableTimestamp => "unparsable_timestamp",
            DiscardReason::TimestampOutOfRange => "timestamp_out_of_range",
        }
    }
}

/// One intentionally dropped record, with the reason an operator would need
/// to extend the mapping tables.
#[derive(Debug, Clone)]
pub struct Discard {
    pub reason: DiscardReason,
    pub detail: String,
}

pub enum Outcome {
    Record(CanonicalRecord),
    Discard(Discard),
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub records: Vec<CanonicalRecord>,
    pub discards: Vec<Discard>,
}

/// Per-source normalizer. Built from the source descriptor plus an injected
/// reference instant, so the future-timestamp check never reads the clock
/// and the whole transform stays deterministic and testable.
pub struct Normalizer {
    descriptor: SourceDescriptor,
    min_timestamp: DateTime<Utc>,
    max_timestamp: DateTime<Utc>,
}

impl Normalizer {
    pub fn new(descriptor: &SourceDescriptor, reference_now: DateTime<Utc>) -> Self {
        let floor = HISTORICAL_FLOOR
            .parse::<DateTime<Utc>>()
            .expect("historical floor constant is valid RFC 3339");
        Self {
            descriptor: descriptor.clone(),
            min_timestamp: floor,
            max_timestamp: reference_now + Duration::minutes(CLOCK_SKEW_MINUTES),
        }
    }

    pub fn normalize(&self, raw: &RawRecord) -> Outcome {
        let label = raw.pollutant.trim().to_lowercase();
        let pollutant = match self.descriptor.pollutant_labels.get(&label) {
            Some(p) => *p,
            None => {
                return self.discard(
                    DiscardReason::UnmappedPollutant,
                    format!("pollutant label '{}' has no mapping", raw.pollutant),
                )
            }
        };

        let station_key = raw.station.trim().to_lowercase();
        let station = match self.descriptor.stations.get(&station_key) {
            Some(s) => s,
            None => {
                return self.discard(
                    DiscardReason::UnknownStation,
                    format!("station '{}' is not in the lookup table", raw.station),
                )
            }
        };

        let value = match raw.value.trim().replace(',', ".").parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                return self.discard(
                    DiscardReason::UnparsableValue,
                    format!("value '{}' is not a number", raw.value),
                )
            }
        };

        let unit = raw.unit.trim().to_lowercase();
        let factor = match UNIT_FACTORS.get(unit.as_str()) {
            Some(f) => *f,
            None => {
                return self.discard(
                    DiscardReason::UnknownUnit,
                    format!("unit '{}' is not in the conversion table", raw.unit),
                )
            }
        };

        let timestamp_utc = match self.parse_timestamp(&raw.timestamp) {
            Ok(ts) => ts,
            Err(detail) => return self.discard(DiscardReason::UnparsableTimestamp, detail),
        };
        if timestamp_utc < self.min_timestamp || timestamp_utc > self.max_timestamp {
            return self.discard(
                DiscardReason::TimestampOutOfRange,
                format!(
                    "timestamp {} outside [{}, {}]",
                    timestamp_utc, self.min_timestamp, self.max_timestamp
                ),
            );
        }
        // Both representations are computed once, here, and never
        // reinterpreted downstream.
        let timestamp_local = timestamp_utc.with_timezone(&self.descriptor.local_offset());

        let (latitude, longitude) = match (raw.latitude, raw.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => (station.latitude, station.longitude),
        };

        Outcome::Record(CanonicalRecord {
            station_id: station.station_id.clone(),
            pollutant,
            value: value * factor,
            timestamp_utc,
            timestamp_local,
            latitude,
            longitude,
            source_id: raw.source_id.clone(),
            license: self.descriptor.license.clone(),
        })
    }

    /// Normalize a batch, preserving the order of the originating raw
    /// records. Returns every produced record plus every discard.
    pub fn normalize_batch(&self, raws: &[RawRecord]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for raw in raws {
            match self.normalize(raw) {
                Outcome::Record(record) => outcome.records.push(record),
                Outcome::Discard(discard) => outcome.discards.push(discard),
            }
        }
        metrics::normalize::records_produced(outcome.records.len());
        for discard in &outcome.discards {
            metrics::normalize::record_discarded(discard.reason.as_str());
        }
        info!(
            source_id = %self.descriptor.source_id,
            produced = outcome.records.len(),
            discarded = outcome.discards.len(),
            "normalized batch"
        );
        outcome
    }

    fn parse_timestamp(&self, raw: &str) -> Result<DateTime<Utc>, String> {
        let format = self.descriptor.timestamp_format.as_str();
        let raw = raw.trim();
        if format.contains("%z") || format.contains("%:z") || format.contains("%#z") {
            // Raw value carries its own offset.
            DateTime::parse_from_str(raw, format)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| format!("timestamp '{raw}' does not match '{format}': {e}"))
        } else {
            // Naive value in the source's local zone.
            let naive = NaiveDateTime::parse_from_str(raw, format)
                .map_err(|e| format!("timestamp '{raw}' does not match '{format}': {e}"))?;
            match self.descriptor.local_offset().from_local_datetime(&naive) {
                chrono::LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
                _ => Err(format!("timestamp '{raw}' is not a valid local instant")),
            }
        }
    }

    fn discard(&self, reason: DiscardReason, detail: String) -> Outcome {
        debug!(source_id = %self.descriptor.source_id, reason = reason.as_str(), %detail, "record discarded");
        Outcome::Discard(Discard { reason, detail })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccessMethod, AccessSpec, StationEntry};
    use chrono::TimeZone;

    fn descriptor() -> SourceDescriptor {
        SourceDescriptor {
            source_id: "monitorar".into(),
            enabled: true,
            access: AccessSpec {
                method: AccessMethod::RestApi,
                url: "http://example.invalid".into(),
            },
            capabilities: vec![Pollutant::Pm25, Pollutant::Co],
            expected_bounds: None,
            timezone_offset_minutes: -180,
            timestamp_format: "%Y-%m-%dT%H:%M:%S%:z".into(),
            min_request_interval_ms: 0,
            page_size: None,
            license: Some("CC-BY-4.0".into()),
            pollutant_labels: HashMap::from([
                ("mp2.5".to_string(), Pollutant::Pm25),
                ("pm25".to_string(), Pollutant::Pm25),
                ("co".to_string(), Pollutant::Co),
            ]),
            stations: HashMap::from([(
                "rodoviaria".to_string(),
                StationEntry {
                    station_id: "rodoviaria".into(),
                    latitude: -15.7801,
                    longitude: -47.9302,
                },
            )]),
        }
    }

    fn reference_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 15, 0, 0, 0).unwrap()
    }

    fn raw(pollutant: &str, value: &str, unit: &str, ts: &str) -> RawRecord {
        RawRecord {
            source_id: "monitorar".into(),
            station: "rodoviaria".into(),
            pollutant: pollutant.into(),
            value: value.into(),
            unit: unit.into(),
            timestamp: ts.into(),
            latitude: None,
            longitude: None,
        }
    }

    #[test]
    fn end_to_end_sample_record() {
        let normalizer = Normalizer::new(&descriptor(), reference_now());
        let outcome =
            normalizer.normalize(&raw("MP2.5", "42", "ug/m3", "2023-06-01T10:00:00-03:00"));
        let record = match outcome {
            Outcome::Record(r) => r,
            Outcome::Discard(d) => panic!("unexpected discard: {:?}", d),
        };
        assert_eq!(record.pollutant, Pollutant::Pm25);
        assert_eq!(record.value, 42.0);
        assert_eq!(record.station_id, "rodoviaria");
        assert_eq!(
            record.timestamp_utc,
            Utc.with_ymd_and_hms(2023, 6, 1, 13, 0, 0).unwrap()
        );
        assert_eq!(record.timestamp_local.to_rfc3339(), "2023-06-01T10:00:00-03:00");
        assert_eq!(record.latitude, -15.7801);
        assert_eq!(record.license.as_deref(), Some("CC-BY-4.0"));
    }

    #[test]
    fn co_converts_from_mg_exactly() {
        let normalizer = Normalizer::new(&descriptor(), reference_now());
        for v in ["0.5", "1.2", "9.999"] {
            let outcome = normalizer.normalize(&raw("co", v, "mg/m3", "2023-06-01T10:00:00-03:00"));
            match outcome {
                Outcome::Record(r) => {
                    assert_eq!(r.value, v.parse::<f64>().unwrap() * 1000.0)
                }
                Outcome::Discard(d) => panic!("unexpected discard: {:?}", d),
            }
        }
    }

    #[test]
    fn utc_local_round_trip_law() {
        let normalizer = Normalizer::new(&descriptor(), reference_now());
        let outcome =
            normalizer.normalize(&raw("pm25", "10", "µg/m³", "2023-06-01T22:30:00-03:00"));
        if let Outcome::Record(r) = outcome {
            assert_eq!(r.timestamp_local.with_timezone(&Utc), r.timestamp_utc);
        } else {
            panic!("expected a record");
        }
    }

    #[test]
    fn unmapped_labels_are_counted_not_erred() {
        let normalizer = Normalizer::new(&descriptor(), reference_now());
        let batch = vec![
            raw("pm25", "10", "ug/m3", "2023-06-01T10:00:00-03:00"),
            raw("benzene", "10", "ug/m3", "2023-06-01T11:00:00-03:00"),
            raw("nox", "10", "ug/m3", "2023-06-01T12:00:00-03:00"),
            raw("pm25", "11", "ug/m3", "2023-06-01T13:00:00-03:00"),
        ];
        let outcome = normalizer.normalize_batch(&batch);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.discards.len(), 2);
        assert!(outcome
            .discards
            .iter()
            .all(|d| d.reason == DiscardReason::UnmappedPollutant));
    }

    #[test]
    fn unknown_unit_discards_instead_of_passing_through() {
        let normalizer = Normalizer::new(&descriptor(), reference_now());
        let outcome = normalizer.normalize(&raw("pm25", "10", "ppb", "2023-06-01T10:00:00-03:00"));
        match outcome {
            Outcome::Discard(d) => assert_eq!(d.reason, DiscardReason::UnknownUnit),
            Outcome::Record(_) => panic!("ppb must not pass through"),
        }
    }

    #[test]
    fn unknown_station_is_discarded() {
        let normalizer = Normalizer::new(&descriptor(), reference_now());
        let mut record = raw("pm25", "10", "ug/m3", "2023-06-01T10:00:00-03:00");
        record.station = "estacao_fantasma".into();
        match normalizer.normalize(&record) {
            Outcome::Discard(d) => assert_eq!(d.reason, DiscardReason::UnknownStation),
            Outcome::Record(_) => panic!("unknown stations must not be attributed"),
        }
    }

    #[test]
    fn future_and_ancient_timestamps_are_discarded() {
        let normalizer = Normalizer::new(&descriptor(), reference_now());
        // Two hours past reference_now, beyond the 1h skew tolerance.
        match normalizer.normalize(&raw("pm25", "10", "ug/m3", "2023-06-15T02:00:00+00:00")) {
            Outcome::Discard(d) => assert_eq!(d.reason, DiscardReason::TimestampOutOfRange),
            Outcome::Record(_) => panic!("future timestamp must be discarded"),
        }
        match normalizer.normalize(&raw("pm25", "10", "ug/m3", "1999-12-31T23:00:00+00:00")) {
            Outcome::Discard(d) => assert_eq!(d.reason, DiscardReason::TimestampOutOfRange),
            Outcome::Record(_) => panic!("pre-floor timestamp must be discarded"),
        }
    }

    #[test]
    fn naive_timestamps_assume_source_zone() {
        let mut spec = descriptor();
        spec.timestamp_format = "%Y-%m-%d %H:%M:%S".into();
        let normalizer = Normalizer::new(&spec, reference_now());
        let outcome = normalizer.normalize(&raw("pm25", "10", "ug/m3", "2023-06-01 10:00:00"));
        if let Outcome::Record(r) = outcome {
            assert_eq!(
                r.timestamp_utc,
                Utc.with_ymd_and_hms(2023, 6, 1, 13, 0, 0).unwrap()
            );
        } else {
            panic!("expected a record");
        }
    }

    #[test]
    fn decimal_commas_parse() {
        let normalizer = Normalizer::new(&descriptor(), reference_now());
        match normalizer.normalize(&raw("pm25", "42,5", "ug/m3", "2023-06-01T10:00:00-03:00")) {
            Outcome::Record(r) => assert_eq!(r.value, 42.5),
            Outcome::Discard(d) => panic!("unexpected discard: {:?}", d),
        }
    }

    #[test]
    fn raw_coordinates_win_over_station_table() {
        let normalizer = Normalizer::new(&descriptor(), reference_now());
        let mut record = raw("pm25", "10", "ug/m3", "2023-06-01T10:00:00-03:00");
        record.latitude = Some(-15.70);
        record.longitude = Some(-47.80);
        if let Outcome::Record(r) = normalizer.normalize(&record) {
            assert_eq!(r.latitude, -15.70);
            assert_eq!(r.longitude, -47.80);
        } else {
            panic!("expected a record");
        }
    }
}
