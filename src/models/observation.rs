use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::utils::constants::{FLAG_ABSENT, FLAG_IMPUTED, FLAG_OBSERVED, FLAG_SUSPECT};

/// A single field measurement: numeric for continuous fields, a label for
/// categorical fields such as wind direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Number(f64),
    Label(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Label(_) => None,
        }
    }

    /// Render the value the way it appears in CSV cells.
    pub fn to_cell_string(&self) -> String {
        match self {
            FieldValue::Number(v) => format_number(*v),
            FieldValue::Label(s) => s.clone(),
        }
    }
}

/// Format a number without trailing float noise: whole values print without
/// a fractional part, everything else with full precision.
fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

/// Per-cell origin marker. The flag alphabet follows the common station
/// quality convention (0 = valid, 1 = suspect, 9 = missing) extended with
/// 2 for imputed cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Observed,
    Suspect,
    Imputed,
    Absent,
}

impl Provenance {
    pub fn as_char(&self) -> char {
        match self {
            Provenance::Observed => FLAG_OBSERVED,
            Provenance::Suspect => FLAG_SUSPECT,
            Provenance::Imputed => FLAG_IMPUTED,
            Provenance::Absent => FLAG_ABSENT,
        }
    }

    pub fn from_char(c: char) -> Result<Self> {
        match c {
            FLAG_OBSERVED => Ok(Provenance::Observed),
            FLAG_SUSPECT => Ok(Provenance::Suspect),
            FLAG_IMPUTED => Ok(Provenance::Imputed),
            FLAG_ABSENT => Ok(Provenance::Absent),
            _ => Err(PipelineError::InvalidProvenanceFlag(c)),
        }
    }
}

/// One (timestamp, field) cell together with how its value came to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Observed(FieldValue),
    Suspect(FieldValue),
    Imputed(FieldValue),
    Absent,
}

impl Cell {
    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Cell::Observed(v) | Cell::Suspect(v) | Cell::Imputed(v) => Some(v),
            Cell::Absent => None,
        }
    }

    pub fn number(&self) -> Option<f64> {
        self.value().and_then(FieldValue::as_number)
    }

    pub fn provenance(&self) -> Provenance {
        match self {
            Cell::Observed(_) => Provenance::Observed,
            Cell::Suspect(_) => Provenance::Suspect,
            Cell::Imputed(_) => Provenance::Imputed,
            Cell::Absent => Provenance::Absent,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Cell::Absent)
    }

    /// Measured cells (valid or suspect) anchor imputation; imputed and
    /// absent cells never do.
    pub fn is_anchor(&self) -> bool {
        matches!(self, Cell::Observed(_) | Cell::Suspect(_))
    }

    /// Rebuild a cell from its CSV value string and provenance flag.
    pub fn from_parts(raw: &str, flag: Provenance) -> Result<Self> {
        match flag {
            Provenance::Absent => Ok(Cell::Absent),
            _ => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(PipelineError::InvalidFormat(format!(
                        "Flag {} requires a value, got an empty cell",
                        flag.as_char()
                    )));
                }
                let value = match trimmed.parse::<f64>() {
                    Ok(v) => FieldValue::Number(v),
                    Err(_) => FieldValue::Label(trimmed.to_string()),
                };
                Ok(match flag {
                    Provenance::Observed => Cell::Observed(value),
                    Provenance::Suspect => Cell::Suspect(value),
                    Provenance::Imputed => Cell::Imputed(value),
                    Provenance::Absent => unreachable!(),
                })
            }
        }
    }
}

/// One hourly reading from one station. Timestamps are hour-resolution and
/// fixed to the station's local standard time; fields are kept in a BTreeMap
/// so iteration order, and therefore all serialized output, is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub station_id: u32,
    pub station_name: String,
    pub timestamp: NaiveDateTime,
    pub fields: BTreeMap<String, Cell>,
}

impl ObservationRecord {
    pub fn new(station_id: u32, station_name: String, timestamp: NaiveDateTime) -> Self {
        Self {
            station_id,
            station_name,
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    /// Merge/sort key: (station, hour).
    pub fn key(&self) -> (u32, NaiveDateTime) {
        (self.station_id, self.timestamp)
    }

    pub fn cell(&self, field: &str) -> &Cell {
        self.fields.get(field).unwrap_or(&Cell::Absent)
    }

    pub fn set_cell(&mut self, field: &str, cell: Cell) {
        self.fields.insert(field.to_string(), cell);
    }

    pub fn with_cell(mut self, field: &str, cell: Cell) -> Self {
        self.set_cell(field, cell);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_provenance_flag_round_trip() {
        for p in [
            Provenance::Observed,
            Provenance::Suspect,
            Provenance::Imputed,
            Provenance::Absent,
        ] {
            assert_eq!(Provenance::from_char(p.as_char()).unwrap(), p);
        }
        assert!(Provenance::from_char('5').is_err());
    }

    #[test]
    fn test_cell_accessors() {
        let observed = Cell::Observed(FieldValue::Number(12.5));
        assert_eq!(observed.number(), Some(12.5));
        assert!(observed.is_anchor());
        assert!(!observed.is_absent());

        let suspect = Cell::Suspect(FieldValue::Number(101.0));
        assert!(suspect.is_anchor());

        let imputed = Cell::Imputed(FieldValue::Number(14.0));
        assert!(!imputed.is_anchor());
        assert_eq!(imputed.provenance(), Provenance::Imputed);

        assert!(Cell::Absent.value().is_none());
        assert!(!Cell::Absent.is_anchor());
    }

    #[test]
    fn test_cell_from_parts() {
        let cell = Cell::from_parts("12.5", Provenance::Observed).unwrap();
        assert_eq!(cell, Cell::Observed(FieldValue::Number(12.5)));

        let cell = Cell::from_parts("NNE", Provenance::Imputed).unwrap();
        assert_eq!(cell, Cell::Imputed(FieldValue::Label("NNE".to_string())));

        let cell = Cell::from_parts("", Provenance::Absent).unwrap();
        assert_eq!(cell, Cell::Absent);

        assert!(Cell::from_parts("", Provenance::Observed).is_err());
    }

    #[test]
    fn test_record_key_and_cells() {
        let record = ObservationRecord::new(108, "Seoul".to_string(), hour(3))
            .with_cell("temperature", Cell::Observed(FieldValue::Number(-2.1)));

        assert_eq!(record.key(), (108, hour(3)));
        assert_eq!(record.cell("temperature").number(), Some(-2.1));
        assert!(record.cell("humidity").is_absent());
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(FieldValue::Number(12.0).to_cell_string(), "12.0");
        assert_eq!(FieldValue::Number(12.5).to_cell_string(), "12.5");
        assert_eq!(FieldValue::Number(-0.25).to_cell_string(), "-0.25");
    }
}
