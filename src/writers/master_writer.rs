use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};
use crate::processors::merge_engine::MasterDataset;
use crate::utils::constants::{
    COL_STATION_ID, COL_STATION_NAME, COL_TIMESTAMP, COL_VERIFIED, FLAG_SUFFIX, TIMESTAMP_FORMAT,
    UTF8_BOM,
};

/// Persists the master dataset: the whole file is rewritten atomically, so
/// a failed write leaves the previous master readable and unchanged.
pub struct MasterWriter;

impl MasterWriter {
    pub fn new() -> Self {
        Self
    }

    pub fn write_master(&self, master: &MasterDataset, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        // Column set is the union across all stations; stations missing a
        // field get an absent cell there.
        let fields: BTreeSet<String> = master
            .records()
            .iter()
            .flat_map(|r| r.record.fields.keys().cloned())
            .collect();

        let mut temp = NamedTempFile::new_in(dir)?;
        {
            let file = temp.as_file_mut();
            file.write_all(UTF8_BOM)?;

            let mut writer = csv::Writer::from_writer(file);
            let mut header = vec![
                COL_STATION_ID.to_string(),
                COL_STATION_NAME.to_string(),
                COL_TIMESTAMP.to_string(),
            ];
            for field in &fields {
                header.push(field.clone());
                header.push(format!("{}{}", field, FLAG_SUFFIX));
            }
            header.push(COL_VERIFIED.to_string());
            writer.write_record(&header)?;

            for row in master.records() {
                let mut cells = vec![
                    row.record.station_id.to_string(),
                    row.record.station_name.clone(),
                    row.record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                ];
                for field in &fields {
                    let cell = row.record.cell(field);
                    cells.push(cell.value().map(|v| v.to_cell_string()).unwrap_or_default());
                    cells.push(cell.provenance().as_char().to_string());
                }
                cells.push(if row.verified { "1" } else { "0" }.to_string());
                writer.write_record(&cells)?;
            }
            writer.flush()?;
        }

        temp.persist(path).map_err(|e| PipelineError::AtomicWrite {
            path: path.to_path_buf(),
            reason: e.error.to_string(),
        })?;

        Ok(())
    }
}

impl Default for MasterWriter {
    fn default() -> Self {
        Self::new()
    }
}
