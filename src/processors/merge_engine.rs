use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::models::extract::DailyExtract;
use crate::models::observation::ObservationRecord;
use crate::models::summary::{MergeConflict, MergeReport};

/// One row of the master dataset: an observation plus the manual
/// verification marker that protects it from being overwritten by later
/// extracts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterRecord {
    pub record: ObservationRecord,
    pub verified: bool,
}

impl MasterRecord {
    pub fn new(record: ObservationRecord) -> Self {
        Self {
            record,
            verified: false,
        }
    }

    pub fn verified(record: ObservationRecord) -> Self {
        Self {
            record,
            verified: true,
        }
    }

    pub fn key(&self) -> (u32, chrono::NaiveDateTime) {
        self.record.key()
    }
}

/// The single long-lived dataset: all stations, all time, sorted by
/// (station_id, timestamp) with unique keys. Grows monotonically through
/// merge operations and is never mutated in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterDataset {
    records: Vec<MasterRecord>,
}

impl MasterDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from unordered records, enforcing the key
    /// uniqueness invariant.
    pub fn from_records(mut records: Vec<MasterRecord>) -> Result<Self> {
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        for pair in records.windows(2) {
            if pair[0].key() == pair[1].key() {
                let (station_id, timestamp) = pair[0].key();
                return Err(PipelineError::Merge(format!(
                    "Master dataset contains duplicate key (station {}, {})",
                    station_id, timestamp
                )));
            }
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[MasterRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, station_id: u32, timestamp: chrono::NaiveDateTime) -> Option<&MasterRecord> {
        self.records
            .binary_search_by(|r| r.key().cmp(&(station_id, timestamp)))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn into_records(self) -> Vec<MasterRecord> {
        self.records
    }
}

/// Sorted-union merge of one daily extract into the master dataset.
///
/// The newer extract is authoritative for unverified keys; verified master
/// records always win and the collision is reported. Merging the same
/// extract twice leaves the dataset unchanged.
pub struct MergeEngine;

impl MergeEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn merge(
        &self,
        master: &MasterDataset,
        extract: &DailyExtract,
    ) -> Result<(MasterDataset, MergeReport)> {
        let incoming: Vec<MasterRecord> = extract
            .records
            .iter()
            .cloned()
            .map(MasterRecord::new)
            .collect();
        debug_assert!(incoming.windows(2).all(|p| p[0].key() < p[1].key()));

        let mut report = MergeReport::default();
        let mut merged = Vec::with_capacity(master.len() + incoming.len());

        // Both sides are pre-sorted, so a single two-pointer pass keeps the
        // work proportional to the inputs.
        let old_records = master.records();
        let mut i = 0;
        let mut j = 0;

        while i < old_records.len() && j < incoming.len() {
            let old = &old_records[i];
            let new = &incoming[j];
            match old.key().cmp(&new.key()) {
                Ordering::Less => {
                    merged.push(old.clone());
                    i += 1;
                }
                Ordering::Greater => {
                    report.inserted += 1;
                    merged.push(new.clone());
                    j += 1;
                }
                Ordering::Equal => {
                    if old.record == new.record {
                        report.unchanged += 1;
                        merged.push(old.clone());
                    } else if old.verified {
                        let (station_id, timestamp) = old.key();
                        report.conflicts.push(MergeConflict {
                            station_id,
                            timestamp,
                        });
                        merged.push(old.clone());
                    } else {
                        report.replaced += 1;
                        merged.push(new.clone());
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&old_records[i..]);
        report.inserted += incoming.len() - j;
        merged.extend_from_slice(&incoming[j..]);

        Ok((MasterDataset { records: merged }, report))
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new()
    }
}
