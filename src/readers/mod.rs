pub mod extract_reader;
pub mod master_reader;
pub mod observation_reader;

pub use extract_reader::ExtractReader;
pub use master_reader::MasterReader;
pub use observation_reader::{group_by_station, ObservationReader};
