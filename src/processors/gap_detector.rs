use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::models::extract::ExtractKey;
use crate::models::observation::{Cell, FieldValue, ObservationRecord};
use crate::models::policy::{FieldPolicy, ImputationStrategy, PolicySet};
use crate::models::summary::RepairWarning;

/// Output of gap detection: the sequence aligned to the full expected
/// calendar, with every (timestamp, field) cell classified, plus the
/// warnings raised while classifying.
#[derive(Debug, Clone)]
pub struct GapReport {
    pub records: Vec<ObservationRecord>,
    pub warnings: Vec<RepairWarning>,
}

/// Aligns a station's raw sequence to the expected hourly calendar and
/// classifies each cell as present-valid, present-suspect, or absent.
///
/// Pure over its inputs: no I/O, no clock. Duplicate timestamps are an
/// upstream correctness violation and abort the unit rather than being
/// papered over.
pub struct GapDetector {
    policies: PolicySet,
}

impl GapDetector {
    pub fn new(policies: PolicySet) -> Self {
        Self { policies }
    }

    pub fn align(
        &self,
        key: &ExtractKey,
        station_name: &str,
        raw: &[ObservationRecord],
    ) -> Result<GapReport> {
        let mut by_hour: BTreeMap<chrono::NaiveDateTime, &ObservationRecord> = BTreeMap::new();
        for record in raw {
            if record.station_id != key.station_id {
                return Err(PipelineError::InvalidFormat(format!(
                    "Record for station {} in a sequence keyed to station {}",
                    record.station_id, key.station_id
                )));
            }
            if by_hour.insert(record.timestamp, record).is_some() {
                return Err(PipelineError::DuplicateTimestamp {
                    station_id: key.station_id,
                    timestamp: record.timestamp,
                });
            }
        }

        let mut warnings = Vec::new();
        let mut records = Vec::with_capacity(key.hour_count());

        for hour in key.expected_hours() {
            let mut aligned =
                ObservationRecord::new(key.station_id, station_name.to_string(), hour);
            let source = by_hour.get(&hour);

            for (field, policy) in self.policies.iter() {
                let raw_cell = source.map(|r| r.cell(field)).unwrap_or(&Cell::Absent);
                let cell = self.classify(field, policy, raw_cell, hour, &mut warnings);
                aligned.set_cell(field, cell);
            }

            // Fields outside the policy set pass through untouched.
            if let Some(source) = source {
                for (field, cell) in &source.fields {
                    if self.policies.get(field).is_none() {
                        aligned.set_cell(field, cell.clone());
                    }
                }
            }

            records.push(aligned);
        }

        Ok(GapReport { records, warnings })
    }

    /// Classify one raw cell under one field policy.
    fn classify(
        &self,
        field: &str,
        policy: &FieldPolicy,
        raw: &Cell,
        hour: chrono::NaiveDateTime,
        warnings: &mut Vec<RepairWarning>,
    ) -> Cell {
        let value = match raw.value() {
            Some(v) => v,
            None => return Cell::Absent,
        };

        let number = match value.as_number() {
            Some(n) => n,
            None => {
                if expects_numeric(policy) {
                    warn!(field, %hour, label = %value.to_cell_string(),
                        "non-numeric value where numeric expected, treating as absent");
                    return Cell::Absent;
                }
                return raw.clone();
            }
        };

        if !number.is_finite() {
            return Cell::Absent;
        }

        if let Some(valid_range) = &policy.valid_range {
            if !valid_range.contains(number) {
                warn!(field, %hour, value = number,
                    "value outside physical validity range, treating as absent");
                return Cell::Absent;
            }
        }

        if let Some(bounds) = &policy.bounds {
            if !bounds.contains(number) {
                warn!(field, %hour, value = number, "value outside bounds, flagging suspect");
                warnings.push(RepairWarning::OutOfBounds {
                    field: field.to_string(),
                    timestamp: hour,
                    value: number,
                });
                return Cell::Suspect(FieldValue::Number(number));
            }
        }

        raw.clone()
    }
}

fn expects_numeric(policy: &FieldPolicy) -> bool {
    policy.bounds.is_some()
        || policy.valid_range.is_some()
        || matches!(
            policy.strategy,
            ImputationStrategy::LinearTimeInterpolation | ImputationStrategy::BoundedClamp
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::observation::Provenance;
    use chrono::{NaiveDate, NaiveDateTime};

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn day_key() -> ExtractKey {
        ExtractKey::new(
            108,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        )
        .unwrap()
    }

    fn record(h: u32, temp: f64) -> ObservationRecord {
        ObservationRecord::new(108, "Seoul".to_string(), hour(h))
            .with_cell("temperature", Cell::Observed(FieldValue::Number(temp)))
    }

    #[test]
    fn test_missing_hours_become_absent_cells() {
        let detector = GapDetector::new(PolicySet::asos_default());
        let raw = vec![record(0, 1.0), record(5, 2.0)];

        let report = detector.align(&day_key(), "Seoul", &raw).unwrap();
        assert_eq!(report.records.len(), 24);
        assert_eq!(report.records[0].cell("temperature").number(), Some(1.0));
        assert!(report.records[1].cell("temperature").is_absent());
        assert!(report.records[3].cell("temperature").is_absent());
        assert_eq!(report.records[5].cell("temperature").number(), Some(2.0));
        // Fields with a policy but no data at all are absent everywhere.
        assert!(report.records[0].cell("humidity").is_absent());
    }

    #[test]
    fn test_duplicate_timestamp_is_fatal() {
        let detector = GapDetector::new(PolicySet::asos_default());
        let raw = vec![record(3, 1.0), record(3, 1.5)];

        let err = detector.align(&day_key(), "Seoul", &raw).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DuplicateTimestamp { station_id: 108, .. }
        ));
    }

    #[test]
    fn test_out_of_validity_range_is_absent() {
        let detector = GapDetector::new(PolicySet::asos_default());
        // -999 is a typical upstream sentinel, far outside the valid range.
        let raw = vec![record(0, -999.0)];

        let report = detector.align(&day_key(), "Seoul", &raw).unwrap();
        assert!(report.records[0].cell("temperature").is_absent());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_out_of_bounds_is_suspect_with_warning() {
        let detector = GapDetector::new(PolicySet::asos_default());
        let raw = vec![ObservationRecord::new(108, "Seoul".to_string(), hour(0))
            .with_cell("humidity", Cell::Observed(FieldValue::Number(104.0)))];

        let report = detector.align(&day_key(), "Seoul", &raw).unwrap();
        let cell = report.records[0].cell("humidity");
        assert_eq!(cell.provenance(), Provenance::Suspect);
        assert_eq!(cell.number(), Some(104.0));
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            report.warnings[0],
            RepairWarning::OutOfBounds { value, .. } if value == 104.0
        ));
    }

    #[test]
    fn test_non_numeric_where_numeric_expected() {
        let detector = GapDetector::new(PolicySet::asos_default());
        let raw = vec![ObservationRecord::new(108, "Seoul".to_string(), hour(0))
            .with_cell("temperature", Cell::Observed(FieldValue::Label("n/a".to_string())))];

        let report = detector.align(&day_key(), "Seoul", &raw).unwrap();
        assert!(report.records[0].cell("temperature").is_absent());
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let detector = GapDetector::new(PolicySet::asos_default());
        let raw = vec![ObservationRecord::new(108, "Seoul".to_string(), hour(0))
            .with_cell("cloud_cover", Cell::Observed(FieldValue::Number(7.0)))];

        let report = detector.align(&day_key(), "Seoul", &raw).unwrap();
        assert_eq!(report.records[0].cell("cloud_cover").number(), Some(7.0));
        assert!(report.records[1].cell("cloud_cover").is_absent());
    }
}
