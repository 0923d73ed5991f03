use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::models::observation::ObservationRecord;
use crate::models::summary::ImputationSummary;

/// Identity of one daily extract: a station and an inclusive date range.
/// Re-running the pipeline for the same key supersedes the previous
/// artifact rather than appending to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractKey {
    pub station_id: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ExtractKey {
    pub fn new(station_id: u32, start_date: NaiveDate, end_date: NaiveDate) -> Result<Self> {
        if end_date < start_date {
            return Err(PipelineError::InvalidFormat(format!(
                "End date {} precedes start date {}",
                end_date, start_date
            )));
        }
        Ok(Self {
            station_id,
            start_date,
            end_date,
        })
    }

    /// Number of hours the repaired sequence must contain.
    pub fn hour_count(&self) -> usize {
        let days = (self.end_date - self.start_date).num_days() + 1;
        (days * 24) as usize
    }

    /// The complete expected calendar: every hour from 00:00 on the start
    /// date through 23:00 on the end date.
    pub fn expected_hours(&self) -> impl Iterator<Item = NaiveDateTime> {
        let first = self.start_date.and_hms_opt(0, 0, 0).unwrap();
        let count = self.hour_count();
        (0..count).map(move |h| first + Duration::hours(h as i64))
    }

    /// Deterministic artifact name, so a re-run for the same range is
    /// recognizable as a supersession.
    pub fn artifact_name(&self) -> String {
        format!(
            "asos_{}_{}_{}.csv",
            self.station_id,
            self.start_date.format("%Y%m%d"),
            self.end_date.format("%Y%m%d")
        )
    }
}

/// One repaired batch of hourly records for a station over a date range,
/// together with the per-field imputation accounting. Immutable once
/// written.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyExtract {
    pub key: ExtractKey,
    pub station_name: String,
    pub records: Vec<ObservationRecord>,
    pub summary: ImputationSummary,
}

impl DailyExtract {
    pub fn new(
        key: ExtractKey,
        station_name: String,
        records: Vec<ObservationRecord>,
        summary: ImputationSummary,
    ) -> Result<Self> {
        if records.len() != key.hour_count() {
            return Err(PipelineError::MissingData(format!(
                "Extract for station {} expects {} hourly records, got {}",
                key.station_id,
                key.hour_count(),
                records.len()
            )));
        }
        for (record, expected) in records.iter().zip(key.expected_hours()) {
            if record.timestamp != expected {
                return Err(PipelineError::InvalidFormat(format!(
                    "Extract record at {} does not match expected hour {}",
                    record.timestamp, expected
                )));
            }
            if record.station_id != key.station_id {
                return Err(PipelineError::InvalidFormat(format!(
                    "Extract record for station {} inside extract keyed to station {}",
                    record.station_id, key.station_id
                )));
            }
        }
        Ok(Self {
            key,
            station_name,
            records,
            summary,
        })
    }

    /// Sorted union of every field name appearing in the records.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .iter()
            .flat_map(|r| r.fields.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
