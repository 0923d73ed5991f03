pub mod extract_writer;
pub mod master_writer;
pub mod parquet_export;

pub use extract_writer::ExtractWriter;
pub use master_writer::MasterWriter;
pub use parquet_export::{ParquetExporter, ParquetFileInfo};
