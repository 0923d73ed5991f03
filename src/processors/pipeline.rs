use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::models::extract::{DailyExtract, ExtractKey};
use crate::models::observation::ObservationRecord;
use crate::models::policy::PolicySet;
use crate::models::summary::{ImputationSummary, MergeReport, RunOutcome, RunStage, RunSummary};
use crate::processors::gap_detector::GapDetector;
use crate::processors::imputer::Imputer;
use crate::processors::merge_engine::{MasterDataset, MergeEngine};
use crate::readers::master_reader::MasterReader;
use crate::readers::observation_reader::group_by_station;
use crate::utils::progress::ProgressReporter;
use crate::writers::extract_writer::ExtractWriter;
use crate::writers::master_writer::MasterWriter;

/// One independent unit of work: a single station over a single inclusive
/// date range.
#[derive(Debug, Clone)]
pub struct RunUnit {
    pub key: ExtractKey,
    pub station_name: String,
    pub raw: Vec<ObservationRecord>,
}

impl RunUnit {
    /// Split a mixed-station batch into per-station units. Without an
    /// explicit range each station covers the dates it actually reported.
    pub fn from_batch(
        records: Vec<ObservationRecord>,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<RunUnit>> {
        let mut units = Vec::new();
        for (station_id, (station_name, sequence)) in group_by_station(records) {
            let (start, end) = match range {
                Some(range) => range,
                None => {
                    let first = sequence.first().map(|r| r.timestamp.date());
                    let last = sequence.last().map(|r| r.timestamp.date());
                    match (first, last) {
                        (Some(first), Some(last)) => (first, last),
                        _ => continue,
                    }
                }
            };
            units.push(RunUnit {
                key: ExtractKey::new(station_id, start, end)?,
                station_name,
                raw: sequence,
            });
        }
        Ok(units)
    }
}

/// Drives units through the one-way stage sequence
/// FETCHED → GAP-CHECKED → IMPUTED → EXTRACTED → MERGED.
///
/// Units are independent until the merge, so they fan out over a rayon
/// pool; the merge is the only stage with a durable side effect and runs
/// one-at-a-time behind a mutex on the master dataset.
pub struct PipelineRunner {
    policies: PolicySet,
    output_dir: PathBuf,
    max_workers: usize,
}

impl PipelineRunner {
    pub fn new(policies: PolicySet, output_dir: PathBuf) -> Self {
        Self {
            policies,
            output_dir,
            max_workers: num_cpus::get(),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Repair every unit and merge each result into the master dataset at
    /// `master_path`. Every unit yields a summary, aborted or not.
    pub fn run_units(
        &self,
        units: &[RunUnit],
        master_path: &Path,
        progress: Option<&ProgressReporter>,
    ) -> Result<Vec<RunSummary>> {
        let master = Mutex::new(MasterReader::new().read_master(master_path)?);
        let processed = AtomicUsize::new(0);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let summaries = pool.install(|| {
            units
                .par_iter()
                .map(|unit| {
                    let summary = self.run_single_unit(unit, Some((&master, master_path)));
                    let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(p) = progress {
                        p.update(count as u64);
                    }
                    summary
                })
                .collect()
        });

        Ok(summaries)
    }

    /// Repair every unit and write extracts without touching the master.
    pub fn repair_units(
        &self,
        units: &[RunUnit],
        progress: Option<&ProgressReporter>,
    ) -> Result<Vec<RunSummary>> {
        let processed = AtomicUsize::new(0);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let summaries = pool.install(|| {
            units
                .par_iter()
                .map(|unit| {
                    let summary = self.run_single_unit(unit, None);
                    let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(p) = progress {
                        p.update(count as u64);
                    }
                    summary
                })
                .collect()
        });

        Ok(summaries)
    }

    /// One unit through the state machine. Failures halt the unit at the
    /// stage reached so far; nothing durable is touched before the merge.
    fn run_single_unit(
        &self,
        unit: &RunUnit,
        merge_target: Option<(&Mutex<MasterDataset>, &Path)>,
    ) -> RunSummary {
        let detector = GapDetector::new(self.policies.clone());
        let report = match detector.align(&unit.key, &unit.station_name, &unit.raw) {
            Ok(report) => report,
            Err(e) => return self.aborted(unit, RunStage::Fetched, e, ImputationSummary::default()),
        };

        let mut records = report.records;
        let imputer = Imputer::new(self.policies.clone());
        let summary = imputer.repair_with_summary(&mut records, report.warnings);

        let extract =
            match DailyExtract::new(unit.key, unit.station_name.clone(), records, summary.clone()) {
                Ok(extract) => extract,
                Err(e) => return self.aborted(unit, RunStage::Imputed, e, summary),
            };

        if let Err(e) = ExtractWriter::new().write_extract(&extract, &self.output_dir) {
            return self.aborted(unit, RunStage::Imputed, e, summary);
        }
        info!(station = unit.key.station_id, artifact = %unit.key.artifact_name(), "extract written");

        let (stage, merge_report) = match merge_target {
            None => (RunStage::Extracted, None),
            Some((master, master_path)) => {
                match self.merge_serialized(master, master_path, &extract) {
                    Ok(report) => (RunStage::Merged, Some(report)),
                    Err(e) => return self.aborted(unit, RunStage::Extracted, e, summary),
                }
            }
        };

        let has_conflicts = merge_report
            .as_ref()
            .is_some_and(|r| !r.conflicts.is_empty());
        let outcome = if summary.has_warnings() || has_conflicts {
            RunOutcome::CompletedWithWarnings
        } else {
            RunOutcome::Completed
        };

        RunSummary {
            station_id: unit.key.station_id,
            station_name: unit.station_name.clone(),
            start_date: unit.key.start_date,
            end_date: unit.key.end_date,
            outcome,
            stage_reached: stage,
            imputation: summary,
            merge: merge_report,
        }
    }

    /// The read-modify-write of the master is the serialization point: one
    /// merge in flight at a time, and the in-memory dataset only advances
    /// after the file write succeeded.
    fn merge_serialized(
        &self,
        master: &Mutex<MasterDataset>,
        master_path: &Path,
        extract: &DailyExtract,
    ) -> Result<MergeReport> {
        let mut guard = master.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let (merged, report) = MergeEngine::new().merge(&guard, extract)?;
        MasterWriter::new().write_master(&merged, master_path)?;
        *guard = merged;

        for conflict in &report.conflicts {
            warn!(
                station = conflict.station_id,
                timestamp = %conflict.timestamp,
                "verified master record retained over incoming extract"
            );
        }
        Ok(report)
    }

    fn aborted(
        &self,
        unit: &RunUnit,
        stage: RunStage,
        error: PipelineError,
        imputation: ImputationSummary,
    ) -> RunSummary {
        warn!(station = unit.key.station_id, %error, ?stage, "unit aborted");
        RunSummary {
            station_id: unit.key.station_id,
            station_name: unit.station_name.clone(),
            start_date: unit.key.start_date,
            end_date: unit.key.end_date,
            outcome: RunOutcome::Aborted {
                stage,
                reason: error.to_string(),
            },
            stage_reached: stage,
            imputation,
            merge: None,
        }
    }
}

/// Aggregate view over all unit summaries for one invocation, used for the
/// final notification payload.
pub fn totals(summaries: &[RunSummary]) -> BTreeMap<&'static str, usize> {
    let mut totals = BTreeMap::new();
    totals.insert(
        "imputed",
        summaries.iter().map(|s| s.imputation.total_imputed()).sum(),
    );
    totals.insert(
        "absent",
        summaries.iter().map(|s| s.imputation.total_absent()).sum(),
    );
    totals.insert(
        "conflicts",
        summaries
            .iter()
            .filter_map(|s| s.merge.as_ref())
            .map(MergeReport::conflict_count)
            .sum(),
    );
    totals.insert("aborted", summaries.iter().filter(|s| s.is_aborted()).count());
    totals
}
