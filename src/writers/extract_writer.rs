use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};
use crate::models::extract::DailyExtract;
use crate::utils::constants::{
    COL_STATION_ID, COL_STATION_NAME, COL_TIMESTAMP, FLAG_SUFFIX, TIMESTAMP_FORMAT, UTF8_BOM,
};

/// Writes one daily extract artifact.
///
/// The write is all-or-nothing: content goes to a temp file in the target
/// directory and is renamed onto the final name only once complete, so the
/// merge engine can never observe a partial artifact. A failed write leaves
/// the temp file to be cleaned up on drop.
pub struct ExtractWriter;

impl ExtractWriter {
    pub fn new() -> Self {
        Self
    }

    /// Write the artifact into `dir` under its deterministic name and
    /// return the final path.
    pub fn write_extract(&self, extract: &DailyExtract, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let target = dir.join(extract.key.artifact_name());
        let fields = extract.field_names();

        let mut temp = NamedTempFile::new_in(dir)?;
        {
            let file = temp.as_file_mut();
            file.write_all(UTF8_BOM)?;

            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(header_row(&fields))?;
            for record in &extract.records {
                let mut row = vec![
                    record.station_id.to_string(),
                    record.station_name.clone(),
                    record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                ];
                for field in &fields {
                    let cell = record.cell(field);
                    row.push(cell.value().map(|v| v.to_cell_string()).unwrap_or_default());
                    row.push(cell.provenance().as_char().to_string());
                }
                writer.write_record(&row)?;
            }
            writer.flush()?;
        }

        temp.persist(&target).map_err(|e| PipelineError::AtomicWrite {
            path: target.clone(),
            reason: e.error.to_string(),
        })?;

        Ok(target)
    }
}

impl Default for ExtractWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn header_row(fields: &[String]) -> Vec<String> {
    let mut header = vec![
        COL_STATION_ID.to_string(),
        COL_STATION_NAME.to_string(),
        COL_TIMESTAMP.to_string(),
    ];
    for field in fields {
        header.push(field.clone());
        header.push(format!("{}{}", field, FLAG_SUFFIX));
    }
    header
}
