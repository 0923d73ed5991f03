use chrono::{Datelike, Local};
use std::path::PathBuf;

use crate::utils::constants::MASTER_FILE;

/// Default master dataset location: data/asos_all_merged.csv
pub fn default_master_path() -> PathBuf {
    PathBuf::from("data").join(MASTER_FILE)
}

/// Generate default Parquet export filename with format:
/// asos-master-{YYMMDD}.parquet
pub fn generate_default_export_filename() -> PathBuf {
    let now = Local::now();
    let year = now.year() % 100;
    let month = now.month();
    let day = now.day();

    let filename = format!("asos-master-{:02}{:02}{:02}.parquet", year, month, day);
    PathBuf::from("output").join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_master_path() {
        let path = default_master_path();
        assert_eq!(path, PathBuf::from("data/asos_all_merged.csv"));
    }

    #[test]
    fn test_generate_default_export_filename() {
        let filename = generate_default_export_filename();
        let filename_str = filename.to_string_lossy();

        assert!(filename_str.starts_with("output/"));
        assert!(filename_str.contains("asos-master-"));
        assert!(filename_str.ends_with(".parquet"));
    }
}
