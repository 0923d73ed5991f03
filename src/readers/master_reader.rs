use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::processors::merge_engine::{MasterDataset, MasterRecord};
use crate::readers::extract_reader::decode_table;
use crate::readers::observation_reader::decode_bom_tolerant;

/// Loads the persisted master dataset. The contract is read-fully: the
/// whole file comes into memory, the merge happens there, and the writer
/// puts the whole file back.
pub struct MasterReader;

impl MasterReader {
    pub fn new() -> Self {
        Self
    }

    /// Read the master CSV. A missing file is the bootstrap case and yields
    /// an empty dataset.
    pub fn read_master(&self, path: &Path) -> Result<MasterDataset> {
        if !path.exists() {
            info!(path = %path.display(), "no master dataset yet, starting empty");
            return Ok(MasterDataset::new());
        }

        let bytes = std::fs::read(path)?;
        let text = decode_bom_tolerant(&bytes)?;
        self.parse_master(&text)
    }

    pub fn parse_master(&self, text: &str) -> Result<MasterDataset> {
        let rows = decode_table(text, true)?;
        let records: Vec<MasterRecord> = rows
            .into_iter()
            .map(|(record, verified)| MasterRecord { record, verified })
            .collect();
        MasterDataset::from_records(records)
    }
}

impl Default for MasterReader {
    fn default() -> Self {
        Self::new()
    }
}
