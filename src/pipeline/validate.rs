//! Validation engine: plausibility and consistency checks over canonical
//! records. Every check runs on every batch: the report is the full issue
//! list, never a fail-fast prefix. Error-severity issues fail the batch
//! verdict; warnings are informational.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{CanonicalRecord, GeoBounds, Pollutant};
use crate::observability::metrics;

/// Brazil bounding box (WGS84).
const BRAZIL_BOUNDS: GeoBounds = GeoBounds {
    min_lat: -33.0,
    max_lat: 5.0,
    min_lon: -74.0,
    max_lon: -34.0,
};

/// Literature-informed plausible concentration ranges, µg/m³.
fn plausible_range(pollutant: Pollutant) -> (f64, f64) {
    match pollutant {
        Pollutant::Pm25 | Pollutant::Pm10 => (0.0, 1000.0),
        Pollutant::O3 => (0.0, 200.0),
        Pollutant::No2 | Pollutant::So2 => (0.0, 400.0),
        Pollutant::Co => (0.0, 10000.0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Range,
    TimestampOrder,
    CoordinateBounds,
    Completeness,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Range => "range",
            IssueKind::TimestampOrder => "timestamp_order",
            IssueKind::CoordinateBounds => "coordinate_bounds",
            IssueKind::Completeness => "completeness",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// One detected problem. `record` indexes into the validated batch; `None`
/// marks a batch-level finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub record: Option<usize>,
    pub kind: IssueKind,
    pub severity: Severity,
    pub detail: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Verdict: pass unless any issue is error severity.
    pub fn passed(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|issue| issue.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }
}

/// Batch validator. `expected_bounds` is the owning source's declared
/// reporting area (e.g. the Federal District box) when known.
pub struct Validator {
    expected_bounds: Option<GeoBounds>,
}

impl Validator {
    pub fn new(expected_bounds: Option<GeoBounds>) -> Self {
        Self { expected_bounds }
    }

    pub fn validate(&self, records: &[CanonicalRecord]) -> ValidationReport {
        let mut issues = Vec::new();
        self.check_ranges(records, &mut issues);
        self.check_timestamp_order(records, &mut issues);
        self.check_coordinates(records, &mut issues);
        self.check_completeness(records, &mut issues);
        issues.sort_by_key(|i| i.record.unwrap_or(usize::MAX));

        for issue in &issues {
            metrics::validate::issue_detected(issue.kind.as_str(), match issue.severity {
                Severity::Warning => "warning",
                Severity::Error => "error",
            });
        }
        let report = ValidationReport { issues };
        if report.passed() {
            metrics::validate::batch_passed();
        } else {
            metrics::validate::batch_failed();
        }
        info!(
            records = records.len(),
            issues = report.issues.len(),
            errors = report.error_count(),
            passed = report.passed(),
            "validated batch"
        );
        report
    }

    fn check_ranges(&self, records: &[CanonicalRecord], issues: &mut Vec<ValidationIssue>) {
        for (idx, record) in records.iter().enumerate() {
            let (lo, hi) = plausible_range(record.pollutant);
            if !record.value.is_finite() {
                continue; // completeness reports non-finite values
            }
            if record.value < lo || record.value > hi {
                issues.push(ValidationIssue {
                    record: Some(idx),
                    kind: IssueKind::Range,
                    severity: Severity::Error,
                    detail: format!(
                        "{} concentration {} outside plausible range [{lo}, {hi}] µg/m³",
                        record.pollutant, record.value
                    ),
                });
            }
        }
    }

    /// Within one station+pollutant series, timestamps must strictly
    /// increase in delivery order. A duplicate of the immediately preceding
    /// timestamp warns (source re-delivery); anything earlier than the
    /// series maximum errors.
    fn check_timestamp_order(
        &self,
        records: &[CanonicalRecord],
        issues: &mut Vec<ValidationIssue>,
    ) {
        // Per series: (previous delivered timestamp, maximum seen so far).
        let mut series: HashMap<
            (&str, Pollutant),
            (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>),
        > = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            let key = (record.station_id.as_str(), record.pollutant);
            if let Some((prev, max)) = series.get(&key) {
                if record.timestamp_utc == *prev {
                    issues.push(ValidationIssue {
                        record: Some(idx),
                        kind: IssueKind::TimestampOrder,
                        severity: Severity::Warning,
                        detail: format!(
                            "duplicate timestamp {} for {}/{}",
                            record.timestamp_utc, record.station_id, record.pollutant
                        ),
                    });
                } else if record.timestamp_utc < *max {
                    issues.push(ValidationIssue {
                        record: Some(idx),
                        kind: IssueKind::TimestampOrder,
                        severity: Severity::Error,
                        detail: format!(
                            "timestamp {} precedes {} for {}/{}",
                            record.timestamp_utc, max, record.station_id, record.pollutant
                        ),
                    });
                }
            }
            let entry = series
                .entry(key)
                .or_insert((record.timestamp_utc, record.timestamp_utc));
            entry.0 = record.timestamp_utc;
            if record.timestamp_utc > entry.1 {
                entry.1 = record.timestamp_utc;
            }
        }
    }

    fn check_coordinates(&self, records: &[CanonicalRecord], issues: &mut Vec<ValidationIssue>) {
        for (idx, record) in records.iter().enumerate() {
            if !record.latitude.is_finite() || !record.longitude.is_finite() {
                continue; // completeness reports non-finite coordinates
            }
            if !BRAZIL_BOUNDS.contains(record.latitude, record.longitude) {
                issues.push(ValidationIssue {
                    record: Some(idx),
                    kind: IssueKind::CoordinateBounds,
                    severity: Severity::Error,
                    detail: format!(
                        "coordinates ({}, {}) outside Brazil bounds",
                        record.latitude, record.longitude
                    ),
                });
            } else if let Some(bounds) = &self.expected_bounds {
                if !bounds.contains(record.latitude, record.longitude) {
                    issues.push(ValidationIssue {
                        record: Some(idx),
                        kind: IssueKind::CoordinateBounds,
                        severity: Severity::Error,
                        detail: format!(
                            "coordinates ({}, {}) outside the source's declared reporting area",
                            record.latitude, record.longitude
                        ),
                    });
                }
            }
        }
    }

    fn check_completeness(&self, records: &[CanonicalRecord], issues: &mut Vec<ValidationIssue>) {
        for (idx, record) in records.iter().enumerate() {
            let mut missing = Vec::new();
            if record.station_id.trim().is_empty() {
                missing.push("station_id");
            }
            if record.source_id.trim().is_empty() {
                missing.push("source_id");
            }
            if !record.value.is_finite() {
                missing.push("value");
            }
            if !record.latitude.is_finite() {
                missing.push("latitude");
            }
            if !record.longitude.is_finite() {
                missing.push("longitude");
            }
            if !missing.is_empty() {
                issues.push(ValidationIssue {
                    record: Some(idx),
                    kind: IssueKind::Completeness,
                    severity: Severity::Error,
                    detail: format!("required fields missing or non-finite: {}", missing.join(", ")),
                });
            }
            // Canonical-record invariant: both timestamps denote one instant.
            if record.timestamp_local.with_timezone(&chrono::Utc) != record.timestamp_utc {
                issues.push(ValidationIssue {
                    record: Some(idx),
                    kind: IssueKind::Completeness,
                    severity: Severity::Error,
                    detail: format!(
                        "timestamp_local {} and timestamp_utc {} disagree",
                        record.timestamp_local, record.timestamp_utc
                    ),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Utc};

    fn record(pollutant: Pollutant, value: f64, hour: u32) -> CanonicalRecord {
        let utc = Utc.with_ymd_and_hms(2023, 6, 1, hour, 0, 0).unwrap();
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        CanonicalRecord {
            station_id: "rodoviaria".into(),
            pollutant,
            value,
            timestamp_utc: utc,
            timestamp_local: utc.with_timezone(&offset),
            latitude: -15.7801,
            longitude: -47.9302,
            source_id: "monitorar".into(),
            license: None,
        }
    }

    #[test]
    fn in_range_value_passes_clean() {
        let report = Validator::new(None).validate(&[record(Pollutant::Pm25, 35.0, 10)]);
        assert!(report.issues.is_empty());
        assert!(report.passed());
    }

    #[test]
    fn out_of_range_value_is_one_range_error() {
        let report = Validator::new(None).validate(&[record(Pollutant::Pm25, 1500.0, 10)]);
        let range_issues: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::Range)
            .collect();
        assert_eq!(range_issues.len(), 1);
        assert_eq!(range_issues[0].severity, Severity::Error);
        assert!(!report.passed());
    }

    #[test]
    fn coordinates_inside_df_pass_outside_brazil_fail() {
        let df_bounds = GeoBounds {
            min_lat: -16.06,
            max_lat: -15.45,
            min_lon: -48.3,
            max_lon: -47.3,
        };
        let validator = Validator::new(Some(df_bounds));

        let mut inside = record(Pollutant::Pm25, 10.0, 10);
        inside.latitude = -15.7;
        inside.longitude = -47.9;
        assert!(validator.validate(&[inside]).passed());

        let mut new_york = record(Pollutant::Pm25, 10.0, 10);
        new_york.latitude = 40.0;
        new_york.longitude = -74.0;
        let report = validator.validate(&[new_york]);
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::CoordinateBounds && i.severity == Severity::Error));
    }

    #[test]
    fn inside_brazil_but_outside_declared_area_errors() {
        let df_bounds = GeoBounds {
            min_lat: -16.06,
            max_lat: -15.45,
            min_lon: -48.3,
            max_lon: -47.3,
        };
        let mut sao_paulo = record(Pollutant::Pm25, 10.0, 10);
        sao_paulo.latitude = -23.55;
        sao_paulo.longitude = -46.63;
        let report = Validator::new(Some(df_bounds)).validate(&[sao_paulo]);
        assert!(!report.passed());
        assert!(report.issues[0].detail.contains("declared reporting area"));
    }

    #[test]
    fn duplicate_timestamp_warns_regression_errors() {
        let batch = vec![
            record(Pollutant::Pm25, 10.0, 10),
            record(Pollutant::Pm25, 11.0, 10), // duplicate instant
            record(Pollutant::Pm25, 12.0, 9),  // goes backwards
        ];
        let report = Validator::new(None).validate(&batch);
        let order: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::TimestampOrder)
            .collect();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].severity, Severity::Warning);
        assert_eq!(order[1].severity, Severity::Error);
    }

    #[test]
    fn duplicate_of_a_regressed_timestamp_still_warns() {
        let batch = vec![
            record(Pollutant::Pm25, 10.0, 10),
            record(Pollutant::Pm25, 11.0, 9), // regression
            record(Pollutant::Pm25, 12.0, 9), // re-delivery of the 09:00 reading
        ];
        let report = Validator::new(None).validate(&batch);
        let order: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::TimestampOrder)
            .collect();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].record, Some(1));
        assert_eq!(order[0].severity, Severity::Error);
        assert_eq!(order[1].record, Some(2));
        assert_eq!(order[1].severity, Severity::Warning);
    }

    #[test]
    fn independent_series_do_not_interact() {
        let mut other_station = record(Pollutant::Pm25, 10.0, 9);
        other_station.station_id = "cras_fercal".into();
        let batch = vec![record(Pollutant::Pm25, 10.0, 10), other_station];
        assert!(Validator::new(None).validate(&batch).passed());
    }

    #[test]
    fn non_finite_value_is_a_completeness_error() {
        let report = Validator::new(None).validate(&[record(Pollutant::Pm25, f64::NAN, 10)]);
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::Completeness && i.severity == Severity::Error));
        // NaN must not also produce a range issue.
        assert!(!report.issues.iter().any(|i| i.kind == IssueKind::Range));
    }

    #[test]
    fn disagreeing_timestamps_violate_the_invariant() {
        let mut bad = record(Pollutant::Pm25, 10.0, 10);
        bad.timestamp_local = Utc
            .with_ymd_and_hms(2023, 6, 1, 11, 0, 0)
            .unwrap()
            .with_timezone(&FixedOffset::west_opt(3 * 3600).unwrap());
        let report = Validator::new(None).validate(&[bad]);
        assert!(!report.passed());
    }

    #[test]
    fn all_checks_run_even_when_one_fails() {
        let mut bad = record(Pollutant::Pm25, 5000.0, 10);
        bad.latitude = 40.0;
        bad.longitude = -74.0;
        bad.station_id = "".into();
        let report = Validator::new(None).validate(&[bad]);
        let kinds: Vec<_> = report.issues.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&IssueKind::Range));
        assert!(kinds.contains(&IssueKind::CoordinateBounds));
        assert!(kinds.contains(&IssueKind::Completeness));
    }
}
