use std::collections::BTreeMap;
use std::path::Path;

use chrono::{NaiveDateTime, Timelike};

use crate::error::{PipelineError, Result};
use crate::models::observation::{Cell, FieldValue, ObservationRecord};
use crate::utils::constants::{COL_STATION_ID, COL_STATION_NAME, COL_TIMESTAMP};

/// Reads the raw observation CSV handed over by the fetch collaborator.
///
/// Layout: `station_id,station_name,timestamp` followed by one column per
/// field. Cells may be empty (missing). Files may start with a UTF-8 BOM,
/// which the upstream exporter emits.
pub struct ObservationReader;

impl ObservationReader {
    pub fn new() -> Self {
        Self
    }

    pub fn read_observations(&self, path: &Path) -> Result<Vec<ObservationRecord>> {
        let bytes = std::fs::read(path)?;
        let text = decode_bom_tolerant(&bytes)?;
        self.parse_observations(&text)
    }

    pub fn parse_observations(&self, text: &str) -> Result<Vec<ObservationRecord>> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader.headers()?.clone();
        let station_id_idx = column_index(&headers, COL_STATION_ID)?;
        let station_name_idx = column_index(&headers, COL_STATION_NAME)?;
        let timestamp_idx = column_index(&headers, COL_TIMESTAMP)?;

        let field_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                *i != station_id_idx && *i != station_name_idx && *i != timestamp_idx
            })
            .map(|(i, name)| (i, name.to_string()))
            .collect();

        let mut records = Vec::new();
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
            for (idx, field) in &field_columns {
                let cell = match row.get(*idx).map(str::trim) {
                    None | Some("") => Cell::Absent,
                    Some(raw) => match raw.parse::<f64>() {
                        Ok(v) => Cell::Observed(FieldValue::Number(v)),
                        Err(_) => Cell::Observed(FieldValue::Label(raw.to_string())),
                    },
                };
                record.set_cell(field, cell);
            }
            records.push(record);
        }

        Ok(records)
    }
}

impl Default for ObservationReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Group a mixed-station batch into per-station sequences, sorted by
/// timestamp, keyed by station id. The name attached to each station is
/// taken from its first record.
pub fn group_by_station(
    records: Vec<ObservationRecord>,
) -> BTreeMap<u32, (String, Vec<ObservationRecord>)> {
    let mut groups: BTreeMap<u32, (String, Vec<ObservationRecord>)> = BTreeMap::new();
    for record in records {
        let entry = groups
            .entry(record.station_id)
            .or_insert_with(|| (record.station_name.clone(), Vec::new()));
        entry.1.push(record);
    }
    for (_, sequence) in groups.values_mut() {
        sequence.sort_by_key(|r| r.timestamp);
    }
    groups
}

/// Decode raw bytes, accepting (and stripping) the UTF-8 byte-order mark
/// the upstream `utf-8-sig` exporter writes.
pub fn decode_bom_tolerant(bytes: &[u8]) -> Result<String> {
    let (text, _, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if had_errors {
        return Err(PipelineError::InvalidFormat(
            "Input is not valid UTF-8".to_string(),
        ));
    }
    Ok(text.into_owned())
}

/// Parse an hourly timestamp. Accepts `YYYY-MM-DD HH:MM` and
/// `YYYY-MM-DD HH:MM:SS`; anything not on the exact hour is refused.
pub fn parse_hour_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();
    let parsed = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M"))?;

    if parsed.minute() != 0 || parsed.second() != 0 {
        return Err(PipelineError::InvalidFormat(format!(
            "Timestamp {} is not on the hour",
            trimmed
        )));
    }
    Ok(parsed)
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| PipelineError::MissingData(format!("Column '{}' not found", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_raw_csv_with_missing_cells() {
        let csv = "station_id,station_name,timestamp,temperature,humidity\n\
                   108,Seoul,2025-01-01 00:00,10.0,45\n\
                   108,Seoul,2025-01-01 01:00,,46\n\
                   108,Seoul,2025-01-01 02:00,11.5,\n";

        let reader = ObservationReader::new();
        let records = reader.parse_observations(csv).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].cell("temperature").number(), Some(10.0));
        assert!(records[1].cell("temperature").is_absent());
        assert_eq!(records[1].cell("humidity").number(), Some(46.0));
        assert!(records[2].cell("humidity").is_absent());
    }

    #[test]
    fn test_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(
            b"station_id,station_name,timestamp,temperature\n108,Seoul,2025-01-01 00:00,1.0\n",
        );

        let text = decode_bom_tolerant(&bytes).unwrap();
        let reader = ObservationReader::new();
        let records = reader.parse_observations(&text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].station_id, 108);
    }

    #[test]
    fn test_off_hour_timestamp_rejected() {
        assert!(parse_hour_timestamp("2025-01-01 00:30").is_err());
        assert!(parse_hour_timestamp("2025-01-01 00:00:30").is_err());

        let ts = parse_hour_timestamp("2025-01-01 13:00:00").unwrap();
        assert_eq!(
            ts,
            NaiveDate::from_ymd_opt(2025, 1, 1)
                .unwrap()
                .and_hms_opt(13, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_missing_key_column_is_an_error() {
        let csv = "station_id,timestamp,temperature\n108,2025-01-01 00:00,1.0\n";
        let reader = ObservationReader::new();
        assert!(matches!(
            reader.parse_observations(csv),
            Err(PipelineError::MissingData(_))
        ));
    }

    #[test]
    fn test_group_by_station_sorts_sequences() {
        let csv = "station_id,station_name,timestamp,temperature\n\
                   108,Seoul,2025-01-01 02:00,3.0\n\
                   133,Daejeon,2025-01-01 00:00,5.0\n\
                   108,Seoul,2025-01-01 00:00,1.0\n";
        let reader = ObservationReader::new();
        let records = reader.parse_observations(csv).unwrap();

        let groups = group_by_station(records);
        assert_eq!(groups.len(), 2);
        let (name, seoul) = &groups[&108];
        assert_eq!(name, "Seoul");
        assert_eq!(seoul.len(), 2);
        assert!(seoul[0].timestamp < seoul[1].timestamp);
    }

    #[test]
    fn test_categorical_values_become_labels() {
        let csv = "station_id,station_name,timestamp,wind_direction\n\
                   108,Seoul,2025-01-01 00:00,NNE\n";
        let reader = ObservationReader::new();
        let records = reader.parse_observations(csv).unwrap();
        assert_eq!(
            records[0].cell("wind_direction"),
            &Cell::Observed(FieldValue::Label("NNE".to_string()))
        );
    }
}
