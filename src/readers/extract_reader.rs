use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::models::extract::{DailyExtract, ExtractKey};
use crate::models::observation::{Cell, ObservationRecord, Provenance};
use crate::models::summary::ImputationSummary;
use crate::readers::observation_reader::{decode_bom_tolerant, parse_hour_timestamp};
use crate::utils::constants::{COL_STATION_ID, COL_STATION_NAME, COL_TIMESTAMP, COL_VERIFIED, FLAG_SUFFIX};

/// Reads a daily extract artifact back into memory, reconstructing the
/// provenance of every cell. The imputation counts are recomputed from the
/// rows, which is exactly why the artifact is self-contained.
pub struct ExtractReader;

impl ExtractReader {
    pub fn new() -> Self {
        Self
    }

    pub fn read_extract(&self, path: &Path) -> Result<DailyExtract> {
        let bytes = std::fs::read(path)?;
        let text = decode_bom_tolerant(&bytes)?;
        self.parse_extract(&text)
    }

    pub fn parse_extract(&self, text: &str) -> Result<DailyExtract> {
        let rows = decode_table(text, false)?;
        if rows.is_empty() {
            return Err(PipelineError::MissingData(
                "Extract artifact contains no records".to_string(),
            ));
        }

        let records: Vec<ObservationRecord> = rows.into_iter().map(|(r, _)| r).collect();
        let station_id = records[0].station_id;
        let station_name = records[0].station_name.clone();
        let key = ExtractKey::new(
            station_id,
            records[0].timestamp.date(),
            records[records.len() - 1].timestamp.date(),
        )?;

        let fields: Vec<String> = {
            let mut names: Vec<String> = records
                .iter()
                .flat_map(|r| r.fields.keys().cloned())
                .collect();
            names.sort();
            names.dedup();
            names
        };
        let summary = ImputationSummary {
            fields: ImputationSummary::tally(&records, &fields),
            warnings: Vec::new(),
        };

        DailyExtract::new(key, station_name, records, summary)
    }
}

impl Default for ExtractReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the shared tabular layout used by extracts and the master file:
/// key columns, then a value column plus a `_flag` column per field, plus
/// an optional `verified` column.
pub(crate) fn decode_table(
    text: &str,
    expect_verified: bool,
) -> Result<Vec<(ObservationRecord, bool)>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let station_id_idx = required_column(&headers, COL_STATION_ID)?;
    let station_name_idx = required_column(&headers, COL_STATION_NAME)?;
    let timestamp_idx = required_column(&headers, COL_TIMESTAMP)?;
    let verified_idx = if expect_verified {
        Some(required_column(&headers, COL_VERIFIED)?)
    } else {
        None
    };

    // Every `<field>_flag` column names a field; its value column must sit
    // somewhere in the header as well.
    let mut field_columns: Vec<(String, usize, usize)> = Vec::new();
    for (flag_idx, header) in headers.iter().enumerate() {
        if let Some(field) = header.strip_suffix(FLAG_SUFFIX) {
            let value_idx = required_column(&headers, field)?;
            field_columns.push((field.to_string(), value_idx, flag_idx));
        }
    }

    let mut rows = Vec::new();
    for row in reader.records() {
        let row = row?;

        let station_id: u32 = row
            .get(station_id_idx)
            .unwrap_or_default()
            .parse()
            .map_err(|_| {
                PipelineError::InvalidFormat(format!(
                    "Unparseable station id: {:?}",
                    row.get(station_id_idx)
                ))
            })?;
        let station_name = row.get(station_name_idx).unwrap_or_default().to_string();
        let timestamp = parse_hour_timestamp(row.get(timestamp_idx).unwrap_or_default())?;

        let mut record = ObservationRecord::new(station_id, station_name, timestamp);
        for (field, value_idx, flag_idx) in &field_columns {
            let flag_raw = row.get(*flag_idx).unwrap_or_default().trim();
            let flag_char = flag_raw.chars().next().ok_or_else(|| {
                PipelineError::InvalidFormat(format!("Empty provenance flag for {}", field))
            })?;
            let flag = Provenance::from_char(flag_char)?;
            let cell = Cell::from_parts(row.get(*value_idx).unwrap_or_default(), flag)?;
            record.set_cell(field, cell);
        }

        let verified = match verified_idx {
            Some(idx) => parse_verified(row.get(idx).unwrap_or_default())?,
            None => false,
        };
        rows.push((record, verified));
    }

    Ok(rows)
}

fn parse_verified(raw: &str) -> Result<bool> {
    match raw.trim() {
        "1" | "true" => Ok(true),
        "0" | "false" | "" => Ok(false),
        other => Err(PipelineError::InvalidFormat(format!(
            "Unparseable verified marker: {:?}",
            other
        ))),
    }
}

fn required_column(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| PipelineError::MissingData(format!("Column '{}' not found", name)))
}
