use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, StringArray, TimestampSecondArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;

use crate::error::Result;
use crate::models::observation::FieldValue;
use crate::processors::merge_engine::MasterDataset;
use crate::utils::constants::{DEFAULT_ROW_GROUP_SIZE, FLAG_SUFFIX};

/// Snapshots the master dataset to Parquet for analytical consumers.
///
/// One column pair per field (value + provenance flag) mirroring the CSV
/// layout; numeric fields become Float64, categorical fields Utf8.
pub struct ParquetExporter {
    compression: Compression,
    row_group_size: usize,
}

impl ParquetExporter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            "snappy" => Compression::SNAPPY,
            "gzip" => Compression::GZIP(GzipLevel::default()),
            "lz4" => Compression::LZ4,
            "zstd" => Compression::ZSTD(parquet::basic::ZstdLevel::default()),
            "none" => Compression::UNCOMPRESSED,
            _ => {
                return Err(crate::error::PipelineError::InvalidFormat(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size;
        self
    }

    /// Write the snapshot. An empty master produces no file.
    pub fn export(&self, master: &MasterDataset, path: &Path) -> Result<()> {
        if master.is_empty() {
            return Ok(());
        }

        let fields = field_layout(master);
        let schema = self.create_schema(&fields);
        let batch = self.to_batch(master, &fields, schema.clone())?;

        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build();

        let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        Ok(())
    }

    fn create_schema(&self, fields: &[(String, bool)]) -> Arc<Schema> {
        let mut columns = vec![
            Field::new("station_id", DataType::UInt32, false),
            Field::new("station_name", DataType::Utf8, false),
            Field::new(
                "timestamp",
                DataType::Timestamp(TimeUnit::Second, None),
                false,
            ),
        ];
        for (name, numeric) in fields {
            let data_type = if *numeric {
                DataType::Float64
            } else {
                DataType::Utf8
            };
            columns.push(Field::new(name, data_type, true));
            columns.push(Field::new(
                format!("{}{}", name, FLAG_SUFFIX),
                DataType::Utf8,
                false,
            ));
        }
        columns.push(Field::new("verified", DataType::Boolean, false));

        Arc::new(Schema::new(columns))
    }

    fn to_batch(
        &self,
        master: &MasterDataset,
        fields: &[(String, bool)],
        schema: Arc<Schema>,
    ) -> Result<RecordBatch> {
        let records = master.records();

        let station_ids: Vec<u32> = records.iter().map(|r| r.record.station_id).collect();
        let station_names: Vec<String> =
            records.iter().map(|r| r.record.station_name.clone()).collect();
        let timestamps: Vec<i64> = records
            .iter()
            .map(|r| r.record.timestamp.and_utc().timestamp())
            .collect();

        let mut arrays: Vec<ArrayRef> = vec![
            Arc::new(UInt32Array::from(station_ids)),
            Arc::new(StringArray::from(station_names)),
            Arc::new(TimestampSecondArray::from(timestamps)),
        ];

        for (name, numeric) in fields {
            if *numeric {
                let values: Vec<Option<f64>> = records
                    .iter()
                    .map(|r| r.record.cell(name).number())
                    .collect();
                arrays.push(Arc::new(Float64Array::from(values)));
            } else {
                let values: Vec<Option<String>> = records
                    .iter()
                    .map(|r| r.record.cell(name).value().map(FieldValue::to_cell_string))
                    .collect();
                arrays.push(Arc::new(StringArray::from(values)));
            }
            let flags: Vec<String> = records
                .iter()
                .map(|r| r.record.cell(name).provenance().as_char().to_string())
                .collect();
            arrays.push(Arc::new(StringArray::from(flags)));
        }

        let verified: Vec<bool> = records.iter().map(|r| r.verified).collect();
        arrays.push(Arc::new(BooleanArray::from(verified)));

        Ok(RecordBatch::try_new(schema, arrays)?)
    }

    /// Row count and sizing summary for terminal display after an export.
    pub fn file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        Ok(ParquetFileInfo {
            total_rows: metadata.file_metadata().num_rows(),
            row_groups: metadata.num_row_groups(),
            file_size: std::fs::metadata(path)?.len(),
        })
    }
}

impl Default for ParquetExporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Field name plus whether every present value is numeric.
fn field_layout(master: &MasterDataset) -> Vec<(String, bool)> {
    let names: BTreeSet<String> = master
        .records()
        .iter()
        .flat_map(|r| r.record.fields.keys().cloned())
        .collect();

    names
        .into_iter()
        .map(|name| {
            let numeric = master.records().iter().all(|r| {
                r.record
                    .cell(&name)
                    .value()
                    .map_or(true, |v| v.as_number().is_some())
            });
            (name, numeric)
        })
        .collect()
}

#[derive(Debug)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: usize,
    pub file_size: u64,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        format!(
            "Parquet snapshot:\n\
            - Total rows: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB",
            self.total_rows,
            self.row_groups,
            self.file_size as f64 / 1_048_576.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::observation::{Cell, FieldValue, ObservationRecord};
    use crate::processors::merge_engine::MasterRecord;
    use chrono::NaiveDate;
    use tempfile::NamedTempFile;

    fn sample_master() -> MasterDataset {
        let records = (0..3)
            .map(|h| {
                let ts = NaiveDate::from_ymd_opt(2025, 1, 1)
                    .unwrap()
                    .and_hms_opt(h, 0, 0)
                    .unwrap();
                MasterRecord::new(
                    ObservationRecord::new(108, "Seoul".to_string(), ts)
                        .with_cell("temperature", Cell::Observed(FieldValue::Number(5.0)))
                        .with_cell(
                            "wind_direction",
                            Cell::Observed(FieldValue::Label("N".to_string())),
                        ),
                )
            })
            .collect();
        MasterDataset::from_records(records).unwrap()
    }

    #[test]
    fn test_export_empty_master_writes_nothing() {
        let temp = NamedTempFile::new().unwrap();
        let result = ParquetExporter::new().export(&MasterDataset::new(), temp.path());
        assert!(result.is_ok());
    }

    #[test]
    fn test_export_and_file_info() {
        let temp = NamedTempFile::new().unwrap();
        let exporter = ParquetExporter::new();
        exporter.export(&sample_master(), temp.path()).unwrap();

        let info = exporter.file_info(temp.path()).unwrap();
        assert_eq!(info.total_rows, 3);
        assert!(info.file_size > 0);
    }

    #[test]
    fn test_compression_matrix() {
        for compression in ["snappy", "gzip", "lz4", "zstd", "none"] {
            let temp = NamedTempFile::new().unwrap();
            let exporter = ParquetExporter::new().with_compression(compression).unwrap();
            assert!(
                exporter.export(&sample_master(), temp.path()).is_ok(),
                "Failed with compression: {}",
                compression
            );
        }
        assert!(ParquetExporter::new().with_compression("lzo").is_err());
    }
}
