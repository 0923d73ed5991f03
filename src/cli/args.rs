use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "asos-pipeline")]
#[command(about = "Gap-repair and incremental-merge processor for hourly ASOS observations")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Repair raw observations and write daily extract artifacts (no merge)
    Repair {
        #[arg(short, long, help = "Raw observation CSV from the fetch step")]
        input: PathBuf,

        #[arg(short, long, default_value = "data", help = "Directory for extract artifacts")]
        output_dir: PathBuf,

        #[arg(
            short,
            long,
            help = "Imputation policy file (TOML/JSON) [default: built-in ASOS policies]"
        )]
        policy: Option<PathBuf>,

        #[arg(long, help = "Range start (YYYY-MM-DD) [default: per-station earliest date]")]
        start_date: Option<NaiveDate>,

        #[arg(long, help = "Range end (YYYY-MM-DD) [default: per-station latest date]")]
        end_date: Option<NaiveDate>,
    },

    /// Run the full pipeline: repair, write extracts, merge into the master
    Run {
        #[arg(short, long, help = "Raw observation CSV from the fetch step")]
        input: PathBuf,

        #[arg(short, long, default_value = "data", help = "Directory for extract artifacts")]
        output_dir: PathBuf,

        #[arg(
            short,
            long,
            default_value = "data/asos_all_merged.csv",
            help = "Master dataset CSV"
        )]
        master: PathBuf,

        #[arg(
            short,
            long,
            help = "Imputation policy file (TOML/JSON) [default: built-in ASOS policies]"
        )]
        policy: Option<PathBuf>,

        #[arg(long, help = "Range start (YYYY-MM-DD) [default: per-station earliest date]")]
        start_date: Option<NaiveDate>,

        #[arg(long, help = "Range end (YYYY-MM-DD) [default: per-station latest date]")]
        end_date: Option<NaiveDate>,

        #[arg(long, default_value_t = num_cpus::get())]
        max_workers: usize,

        #[arg(long, help = "Also write the run summaries as JSON to this file")]
        summary_file: Option<PathBuf>,
    },

    /// Merge one previously written extract into the master dataset
    Merge {
        #[arg(short, long, help = "Extract artifact CSV")]
        extract: PathBuf,

        #[arg(
            short,
            long,
            default_value = "data/asos_all_merged.csv",
            help = "Master dataset CSV"
        )]
        master: PathBuf,
    },

    /// Export the master dataset as a Parquet snapshot
    Export {
        #[arg(
            short,
            long,
            default_value = "data/asos_all_merged.csv",
            help = "Master dataset CSV"
        )]
        master: PathBuf,

        #[arg(
            short,
            long,
            help = "Output Parquet file path [default: output/asos-master-{YYMMDD}.parquet]"
        )]
        output: Option<PathBuf>,

        #[arg(short, long, default_value = "snappy")]
        compression: String,
    },

    /// Display statistics about the master dataset
    Info {
        #[arg(
            short,
            long,
            default_value = "data/asos_all_merged.csv",
            help = "Master dataset CSV"
        )]
        file: PathBuf,

        #[arg(short, long, default_value = "5", help = "Sample records to display")]
        sample: usize,
    },
}
