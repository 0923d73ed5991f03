use tracing::warn;

use crate::models::observation::{Cell, FieldValue, ObservationRecord};
use crate::models::policy::{FieldPolicy, ImputationStrategy, PolicySet};
use crate::models::summary::{ImputationSummary, RepairWarning};

/// Fills absent cells in an aligned hourly sequence, field by field,
/// according to the policy set.
///
/// Only absent cells are ever written: observed and suspect values pass
/// through bit-for-bit. There is no randomness and no clock, so repairing
/// the same input twice yields identical output.
pub struct Imputer {
    policies: PolicySet,
}

impl Imputer {
    pub fn new(policies: PolicySet) -> Self {
        Self { policies }
    }

    /// Repair the sequence in place and return the warnings raised.
    ///
    /// The records must already be aligned to the expected calendar (one
    /// record per hour, consecutive), which makes index distance equal to
    /// hour distance.
    pub fn repair(&self, records: &mut [ObservationRecord]) -> Vec<RepairWarning> {
        let mut warnings = Vec::new();
        for (field, policy) in self.policies.iter() {
            match policy.strategy {
                ImputationStrategy::None => {}
                ImputationStrategy::LinearTimeInterpolation | ImputationStrategy::BoundedClamp => {
                    self.fill_linear(records, field, policy, &mut warnings);
                }
                ImputationStrategy::NearestNeighborCarry => {
                    self.fill_carry(records, field, policy, &mut warnings);
                }
            }
        }
        warnings
    }

    /// Repair and assemble the full summary, folding in warnings carried
    /// over from gap detection.
    pub fn repair_with_summary(
        &self,
        records: &mut [ObservationRecord],
        mut prior_warnings: Vec<RepairWarning>,
    ) -> ImputationSummary {
        prior_warnings.extend(self.repair(records));
        let fields: Vec<String> = self.policies.field_names().map(str::to_string).collect();
        ImputationSummary {
            fields: ImputationSummary::tally(records, &fields),
            warnings: prior_warnings,
        }
    }

    /// Linear time-weighted interpolation across each gap, optionally
    /// clamped into bounds. Gaps at the sequence edges or longer than the
    /// cap stay absent.
    fn fill_linear(
        &self,
        records: &mut [ObservationRecord],
        field: &str,
        policy: &FieldPolicy,
        warnings: &mut Vec<RepairWarning>,
    ) {
        let clamp = matches!(policy.strategy, ImputationStrategy::BoundedClamp)
            .then_some(policy.bounds)
            .flatten();

        // Numeric anchor snapshot; imputed cells never anchor further fills.
        let anchors: Vec<Option<f64>> = records
            .iter()
            .map(|r| {
                let cell = r.cell(field);
                if cell.is_anchor() {
                    cell.number()
                } else {
                    None
                }
            })
            .collect();

        for (start, end) in absent_runs(records, field) {
            let gap_hours = end - start + 1;
            if gap_hours > policy.max_gap_hours as usize {
                warnings.push(RepairWarning::UnfillableGap {
                    field: field.to_string(),
                    gap_start: records[start].timestamp,
                    gap_hours,
                    max_gap_hours: policy.max_gap_hours,
                });
                warn!(field, gap_hours, cap = policy.max_gap_hours, "gap exceeds cap, left absent");
                continue;
            }

            let before = if start > 0 { anchors[start - 1] } else { None };
            let after = anchors.get(end + 1).copied().flatten();
            let (v_before, v_after) = match (before, after) {
                (Some(b), Some(a)) => (b, a),
                // Gap at the sequence edge: one boundary only, never filled.
                _ => continue,
            };

            let span = (gap_hours + 1) as f64;
            for (offset, index) in (start..=end).enumerate() {
                let fraction = (offset + 1) as f64 / span;
                let mut value = v_before + (v_after - v_before) * fraction;
                if let Some(bounds) = clamp {
                    if !bounds.contains(value) {
                        warnings.push(RepairWarning::OutOfBounds {
                            field: field.to_string(),
                            timestamp: records[index].timestamp,
                            value,
                        });
                        warn!(field, value, "interpolated value clamped into bounds");
                        value = bounds.clamp(value);
                    }
                }
                records[index].set_cell(field, Cell::Imputed(FieldValue::Number(value)));
            }
        }
    }

    /// Propagate the nearest measured value in time, earlier winning ties,
    /// with the donor at most `max_gap_hours` away. In a long gap the cells
    /// near the edges fill and the middle stays absent.
    fn fill_carry(
        &self,
        records: &mut [ObservationRecord],
        field: &str,
        policy: &FieldPolicy,
        warnings: &mut Vec<RepairWarning>,
    ) {
        let max_gap = policy.max_gap_hours as usize;
        let anchors: Vec<Option<FieldValue>> = records
            .iter()
            .map(|r| {
                let cell = r.cell(field);
                if cell.is_anchor() {
                    cell.value().cloned()
                } else {
                    None
                }
            })
            .collect();

        for (start, end) in absent_runs(records, field) {
            let gap_hours = end - start + 1;
            if gap_hours > max_gap {
                warnings.push(RepairWarning::UnfillableGap {
                    field: field.to_string(),
                    gap_start: records[start].timestamp,
                    gap_hours,
                    max_gap_hours: policy.max_gap_hours,
                });
                warn!(field, gap_hours, cap = policy.max_gap_hours, "gap exceeds cap");
            }

            for index in start..=end {
                if let Some(value) = nearest_donor(&anchors, index, max_gap) {
                    records[index].set_cell(field, Cell::Imputed(value));
                }
            }
        }
    }
}

/// Maximal runs of absent cells for one field, as inclusive index ranges.
fn absent_runs(records: &[ObservationRecord], field: &str) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, record) in records.iter().enumerate() {
        if record.cell(field).is_absent() {
            start.get_or_insert(i);
        } else if let Some(s) = start.take() {
            runs.push((s, i - 1));
        }
    }
    if let Some(s) = start {
        runs.push((s, records.len() - 1));
    }
    runs
}

/// Nearest anchor value within `max_gap` hours of `index`, preferring the
/// earlier side on ties.
fn nearest_donor(anchors: &[Option<FieldValue>], index: usize, max_gap: usize) -> Option<FieldValue> {
    for distance in 1..=max_gap {
        if distance <= index {
            if let Some(value) = &anchors[index - distance] {
                return Some(value.clone());
            }
        }
        if let Some(Some(value)) = anchors.get(index + distance) {
            return Some(value.clone());
        }
    }
    None
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

    /// An aligned five-hour temperature sequence with cells set per `values`.
    fn sequence(values: &[Option<f64>]) -> Vec<ObservationRecord> {
        values
            .iter()
            .enumerate()
            .map(|(h, v)| {
                let cell = match v {
                    Some(v) => Cell::Observed(FieldValue::Number(*v)),
                    None => Cell::Absent,
                };
                ObservationRecord::new(108, "Seoul".to_string(), hour(h as u32))
                    .with_cell("temperature", cell)
            })
            .collect()
    }

    fn linear_policy(max_gap_hours: u32) -> PolicySet {
        let mut set = PolicySet::new();
        set.insert(
            "temperature",
            FieldPolicy::new(ImputationStrategy::LinearTimeInterpolation, max_gap_hours),
        );
        set
    }

    #[test]
    fn test_linear_fill_time_weighted() {
        // Readings at 00:00 and 04:00, nothing between, cap 6:
        // 01:00-03:00 fill at 12.0, 14.0, 16.0.
        let mut records = sequence(&[Some(10.0), None, None, None, Some(18.0)]);
        let imputer = Imputer::new(linear_policy(6));
        let warnings = imputer.repair(&mut records);

        assert!(warnings.is_empty());
        assert_eq!(records[1].cell("temperature").number(), Some(12.0));
        assert_eq!(records[2].cell("temperature").number(), Some(14.0));
        assert_eq!(records[3].cell("temperature").number(), Some(16.0));
        for i in 1..=3 {
            assert_eq!(
                records[i].cell("temperature").provenance(),
                Provenance::Imputed
            );
        }
    }

    #[test]
    fn test_gap_beyond_cap_stays_absent() {
        // Same setup, cap 2: the three-hour gap stays absent entirely.
        let mut records = sequence(&[Some(10.0), None, None, None, Some(18.0)]);
        let imputer = Imputer::new(linear_policy(2));
        let warnings = imputer.repair(&mut records);

        for i in 1..=3 {
            assert!(records[i].cell("temperature").is_absent());
        }
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            &warnings[0],
            RepairWarning::UnfillableGap { gap_hours: 3, max_gap_hours: 2, .. }
        ));
    }

    #[test]
    fn test_edge_gaps_are_never_filled() {
        let mut records = sequence(&[None, None, Some(10.0), None, None]);
        let imputer = Imputer::new(linear_policy(6));
        imputer.repair(&mut records);

        assert!(records[0].cell("temperature").is_absent());
        assert!(records[1].cell("temperature").is_absent());
        assert!(records[3].cell("temperature").is_absent());
        assert!(records[4].cell("temperature").is_absent());
    }

    #[test]
    fn test_no_overwrite_of_present_cells() {
        let mut records = sequence(&[Some(10.0), Some(11.0), Some(12.0)]);
        let original = records.clone();
        let imputer = Imputer::new(linear_policy(6));
        imputer.repair(&mut records);

        assert_eq!(records, original);
    }

    #[test]
    fn test_determinism() {
        let mut first = sequence(&[Some(10.0), None, None, None, Some(18.0), None, Some(3.5)]);
        let mut second = first.clone();
        let imputer = Imputer::new(linear_policy(6));

        let warnings_first = imputer.repair(&mut first);
        let warnings_second = imputer.repair(&mut second);
        assert_eq!(first, second);
        assert_eq!(warnings_first, warnings_second);
    }

    #[test]
    fn test_suspect_cells_anchor_interpolation() {
        let mut records = sequence(&[Some(10.0), None, None]);
        records[2].set_cell("temperature", Cell::Suspect(FieldValue::Number(14.0)));
        let imputer = Imputer::new(linear_policy(6));
        imputer.repair(&mut records);

        assert_eq!(records[1].cell("temperature").number(), Some(12.0));
        // The suspect anchor itself is untouched.
        assert_eq!(
            records[2].cell("temperature").provenance(),
            Provenance::Suspect
        );
    }

    #[test]
    fn test_bounded_clamp_clips_interpolated_values() {
        // Suspect anchors at 110 and 90 pull the interpolation above the
        // 0..100 bounds; the filled value is clamped and warned about.
        let mut records = sequence(&[None, None, None]);
        records[0].set_cell("humidity", Cell::Suspect(FieldValue::Number(110.0)));
        records[1].set_cell("humidity", Cell::Absent);
        records[2].set_cell("humidity", Cell::Observed(FieldValue::Number(94.0)));

        let mut set = PolicySet::new();
        set.insert(
            "humidity",
            FieldPolicy::new(ImputationStrategy::BoundedClamp, 3).with_bounds(0.0, 100.0),
        );
        let imputer = Imputer::new(set);
        let warnings = imputer.repair(&mut records);

        assert_eq!(records[1].cell("humidity").number(), Some(100.0));
        assert_eq!(
            records[1].cell("humidity").provenance(),
            Provenance::Imputed
        );
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            &warnings[0],
            RepairWarning::OutOfBounds { value, .. } if *value == 102.0
        ));
    }

    #[test]
    fn test_carry_prefers_earlier_on_ties() {
        let mut records = sequence(&[None, None, None]);
        records[0].set_cell("wind_direction", Cell::Observed(FieldValue::Label("N".into())));
        records[1].set_cell("wind_direction", Cell::Absent);
        records[2].set_cell("wind_direction", Cell::Observed(FieldValue::Label("S".into())));

        let mut set = PolicySet::new();
        set.insert(
            "wind_direction",
            FieldPolicy::new(ImputationStrategy::NearestNeighborCarry, 3),
        );
        let imputer = Imputer::new(set);
        imputer.repair(&mut records);

        assert_eq!(
            records[1].cell("wind_direction"),
            &Cell::Imputed(FieldValue::Label("N".to_string()))
        );
    }

    #[test]
    fn test_carry_respects_donor_distance() {
        // Gap of five absent hours between anchors, cap 2: the two cells
        // nearest each anchor fill, the middle one stays absent.
        let mut records = sequence(&[None; 7]);
        records[0].set_cell("wind_direction", Cell::Observed(FieldValue::Label("N".into())));
        records[6].set_cell("wind_direction", Cell::Observed(FieldValue::Label("S".into())));
        for i in 1..=5 {
            records[i].set_cell("wind_direction", Cell::Absent);
        }

        let mut set = PolicySet::new();
        set.insert(
            "wind_direction",
            FieldPolicy::new(ImputationStrategy::NearestNeighborCarry, 2),
        );
        let imputer = Imputer::new(set);
        let warnings = imputer.repair(&mut records);

        assert_eq!(records[1].cell("wind_direction").value().unwrap().to_cell_string(), "N");
        assert_eq!(records[2].cell("wind_direction").value().unwrap().to_cell_string(), "N");
        assert!(records[3].cell("wind_direction").is_absent());
        assert_eq!(records[4].cell("wind_direction").value().unwrap().to_cell_string(), "S");
        assert_eq!(records[5].cell("wind_direction").value().unwrap().to_cell_string(), "S");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_repair_with_summary_counts() {
        let mut records = sequence(&[Some(10.0), None, None, None, Some(18.0)]);
        let imputer = Imputer::new(linear_policy(6));
        let summary = imputer.repair_with_summary(&mut records, Vec::new());

        let counts = summary.counts("temperature");
        assert_eq!(counts.observed, 2);
        assert_eq!(counts.imputed, 3);
        assert_eq!(counts.absent, 0);
    }
}
