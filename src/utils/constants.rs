/// Key column names shared by raw input, extracts, and the master file
pub const COL_STATION_ID: &str = "station_id";
pub const COL_STATION_NAME: &str = "station_name";
pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_VERIFIED: &str = "verified";

/// Per-field provenance columns carry this suffix
pub const FLAG_SUFFIX: &str = "_flag";

/// Hourly timestamp serialization format
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Byte-order mark the upstream utf-8-sig exporter writes
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Field names of the ASOS hourly feed
pub const FIELD_TEMPERATURE: &str = "temperature";
pub const FIELD_HUMIDITY: &str = "humidity";
pub const FIELD_WIND_SPEED: &str = "wind_speed";
pub const FIELD_WIND_DIRECTION: &str = "wind_direction";
pub const FIELD_PRECIPITATION: &str = "precipitation";

/// Provenance flag characters (0/1/9 quality convention plus 2 for imputed)
pub const FLAG_OBSERVED: char = '0';
pub const FLAG_SUSPECT: char = '1';
pub const FLAG_IMPUTED: char = '2';
pub const FLAG_ABSENT: char = '9';

/// Default consecutive-gap cap, matching the upstream pipeline's rule
pub const DEFAULT_MAX_GAP_HOURS: u32 = 3;

/// Master dataset file name
pub const MASTER_FILE: &str = "asos_all_merged.csv";

/// Parquet export defaults
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10000;
