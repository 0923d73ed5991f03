use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::observation::{ObservationRecord, Provenance};

/// Per-field cell accounting for one repaired sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCounts {
    pub observed: usize,
    pub suspect: usize,
    pub imputed: usize,
    pub absent: usize,
}

impl FieldCounts {
    pub fn total(&self) -> usize {
        self.observed + self.suspect + self.imputed + self.absent
    }
}

/// Non-fatal repair findings, accumulated instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RepairWarning {
    /// A gap longer than the field's `max_gap_hours`; its cells stay absent.
    UnfillableGap {
        field: String,
        gap_start: NaiveDateTime,
        gap_hours: usize,
        max_gap_hours: u32,
    },
    /// A value that required clamping into the field's bounds, or a raw
    /// value outside them that was kept as suspect.
    OutOfBounds {
        field: String,
        timestamp: NaiveDateTime,
        value: f64,
    },
}

/// How many cells per field were imputed vs left absent, plus warnings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImputationSummary {
    pub fields: BTreeMap<String, FieldCounts>,
    pub warnings: Vec<RepairWarning>,
}

impl ImputationSummary {
    /// Recompute the per-field counts from a repaired sequence. Counts are a
    /// pure function of the cells, which is what makes the extract artifact
    /// self-contained.
    pub fn tally(records: &[ObservationRecord], fields: &[String]) -> BTreeMap<String, FieldCounts> {
        let mut counts: BTreeMap<String, FieldCounts> = BTreeMap::new();
        for field in fields {
            let entry = counts.entry(field.clone()).or_default();
            for record in records {
                match record.cell(field).provenance() {
                    Provenance::Observed => entry.observed += 1,
                    Provenance::Suspect => entry.suspect += 1,
                    Provenance::Imputed => entry.imputed += 1,
                    Provenance::Absent => entry.absent += 1,
                }
            }
        }
        counts
    }

    pub fn counts(&self, field: &str) -> FieldCounts {
        self.fields.get(field).copied().unwrap_or_default()
    }

    pub fn total_imputed(&self) -> usize {
        self.fields.values().map(|c| c.imputed).sum()
    }

    pub fn total_absent(&self) -> usize {
        self.fields.values().map(|c| c.absent).sum()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// An incoming record that collided with a manually verified master record.
/// The master record wins; the collision is reported, never dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub station_id: u32,
    pub timestamp: NaiveDateTime,
}

/// Outcome of merging one extract into the master dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub conflicts: Vec<MergeConflict>,
}

impl MergeReport {
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

/// Pipeline stages for one (station, date-range) unit. Transitions are
/// one-way; only the final stage touches durable master state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStage {
    Fetched,
    GapChecked,
    Imputed,
    Extracted,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RunOutcome {
    Completed,
    CompletedWithWarnings,
    Aborted { stage: RunStage, reason: String },
}

/// The notification payload: one summary per unit, produced whether the
/// unit completed or aborted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub station_id: u32,
    pub station_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub outcome: RunOutcome,
    pub stage_reached: RunStage,
    pub imputation: ImputationSummary,
    pub merge: Option<MergeReport>,
}

impl RunSummary {
    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One-line human summary for terminal output.
    pub fn headline(&self) -> String {
        match &self.outcome {
            RunOutcome::Completed => format!(
                "station {} {}..{}: merged, {} cells imputed, {} left absent",
                self.station_id,
                self.start_date,
                self.end_date,
                self.imputation.total_imputed(),
                self.imputation.total_absent()
            ),
            RunOutcome::CompletedWithWarnings => format!(
                "station {} {}..{}: merged with {} warnings, {} conflicts",
                self.station_id,
                self.start_date,
                self.end_date,
                self.imputation.warnings.len(),
                self.merge.as_ref().map_or(0, MergeReport::conflict_count)
            ),
            RunOutcome::Aborted { stage, reason } => format!(
                "station {} {}..{}: ABORTED at {:?}: {}",
                self.station_id, self.start_date, self.end_date, stage, reason
            ),
        }
    }
}
