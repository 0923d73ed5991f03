use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::Level;

use crate::cli::args::{Cli, Commands};
use crate::error::Result;
use crate::models::observation::Provenance;
use crate::models::policy::PolicySet;
use crate::models::summary::RunSummary;
use crate::processors::merge_engine::MasterDataset;
use crate::processors::pipeline::{totals, PipelineRunner, RunUnit};
use crate::processors::MergeEngine;
use crate::readers::{ExtractReader, MasterReader, ObservationReader};
use crate::utils::filename::generate_default_export_filename;
use crate::utils::progress::ProgressReporter;
use crate::writers::{MasterWriter, ParquetExporter};

pub async fn run(cli: Cli) -> Result<()> {
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();

    match cli.command {
        Commands::Repair {
            input,
            output_dir,
            policy,
            start_date,
            end_date,
        } => {
            let policies = load_policies(policy.as_deref())?;
            let units = load_units(&input, start_date, end_date)?;
            println!(
                "Repairing {} station unit(s) from {}",
                units.len(),
                input.display()
            );

            let progress = ProgressReporter::new(units.len() as u64, "Repairing...", false);
            let runner = PipelineRunner::new(policies, output_dir);
            let summaries = tokio::task::spawn_blocking(move || {
                let result = runner.repair_units(&units, Some(&progress));
                progress.finish_with_message("Repair complete");
                result
            })
            .await??;

            print_summaries(&summaries);
        }

        Commands::Run {
            input,
            output_dir,
            master,
            policy,
            start_date,
            end_date,
            max_workers,
            summary_file,
        } => {
            let policies = load_policies(policy.as_deref())?;
            let units = load_units(&input, start_date, end_date)?;
            println!(
                "Processing {} station unit(s) into master {}",
                units.len(),
                master.display()
            );

            let progress = ProgressReporter::new(units.len() as u64, "Processing...", false);
            let runner =
                PipelineRunner::new(policies, output_dir).with_max_workers(max_workers);
            let master_path = master.clone();
            let summaries = tokio::task::spawn_blocking(move || {
                let result = runner.run_units(&units, &master_path, Some(&progress));
                progress.finish_with_message("Pipeline complete");
                result
            })
            .await??;

            print_summaries(&summaries);

            // The JSON payload is what the notification collaborator gets.
            let payload = serde_json::to_string_pretty(&summaries)?;
            if let Some(path) = summary_file {
                std::fs::write(&path, &payload)?;
                println!("Summary written to {}", path.display());
            } else {
                println!("\n{}", payload);
            }
        }

        Commands::Merge { extract, master } => {
            println!("Merging {} into {}", extract.display(), master.display());

            let extract = ExtractReader::new().read_extract(&extract)?;
            let dataset = MasterReader::new().read_master(&master)?;

            let (merged, report) = MergeEngine::new().merge(&dataset, &extract)?;
            MasterWriter::new().write_master(&merged, &master)?;

            println!(
                "Merged: {} inserted, {} replaced, {} unchanged",
                report.inserted, report.replaced, report.unchanged
            );
            for conflict in &report.conflicts {
                println!(
                    "Conflict: station {} at {} is manually verified, master record kept",
                    conflict.station_id, conflict.timestamp
                );
            }
        }

        Commands::Export {
            master,
            output,
            compression,
        } => {
            let output = output.unwrap_or_else(generate_default_export_filename);
            println!(
                "Exporting {} to {}",
                master.display(),
                output.display()
            );

            let dataset = MasterReader::new().read_master(&master)?;
            if dataset.is_empty() {
                println!("Master dataset is empty - nothing to export");
                return Ok(());
            }

            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let exporter = ParquetExporter::new().with_compression(&compression)?;
            exporter.export(&dataset, &output)?;

            let info = exporter.file_info(&output)?;
            println!("\n{}", info.summary());
        }

        Commands::Info { file, sample } => {
            println!("Master dataset: {}", file.display());

            let dataset = MasterReader::new().read_master(&file)?;
            print_dataset_info(&dataset, sample);
        }
    }

    Ok(())
}

fn load_policies(path: Option<&Path>) -> Result<PolicySet> {
    match path {
        Some(path) => PolicySet::from_file(path),
        None => Ok(PolicySet::asos_default()),
    }
}

fn load_units(
    input: &PathBuf,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<Vec<RunUnit>> {
    let records = ObservationReader::new().read_observations(input)?;
    let range = match (start_date, end_date) {
        (Some(start), Some(end)) => Some((start, end)),
        (Some(start), None) => Some((start, start)),
        (None, Some(end)) => Some((end, end)),
        (None, None) => None,
    };
    RunUnit::from_batch(records, range)
}

fn print_summaries(summaries: &[RunSummary]) {
    for summary in summaries {
        println!("  {}", summary.headline());
    }

    let totals = totals(summaries);
    println!(
        "\nTotals: {} cells imputed, {} left absent, {} merge conflicts, {} unit(s) aborted",
        totals["imputed"], totals["absent"], totals["conflicts"], totals["aborted"]
    );
}

fn print_dataset_info(dataset: &MasterDataset, sample: usize) {
    if dataset.is_empty() {
        println!("Dataset is empty");
        return;
    }

    let records = dataset.records();
    let stations: std::collections::BTreeSet<u32> =
        records.iter().map(|r| r.record.station_id).collect();
    let first = records.iter().map(|r| r.record.timestamp).min().unwrap();
    let last = records.iter().map(|r| r.record.timestamp).max().unwrap();
    let verified = records.iter().filter(|r| r.verified).count();

    println!("- Records: {}", records.len());
    println!("- Stations: {}", stations.len());
    println!("- Timespan: {} to {}", first, last);
    println!("- Manually verified: {}", verified);

    let fields: std::collections::BTreeSet<String> = records
        .iter()
        .flat_map(|r| r.record.fields.keys().cloned())
        .collect();
    for field in &fields {
        let mut observed = 0usize;
        let mut suspect = 0usize;
        let mut imputed = 0usize;
        let mut absent = 0usize;
        for row in records {
            match row.record.cell(field).provenance() {
                Provenance::Observed => observed += 1,
                Provenance::Suspect => suspect += 1,
                Provenance::Imputed => imputed += 1,
                Provenance::Absent => absent += 1,
            }
        }
        println!(
            "- {}: {} observed, {} suspect, {} imputed, {} absent",
            field, observed, suspect, imputed, absent
        );
    }

    if sample > 0 {
        println!("\nSample records (showing up to {}):", sample);
        for (i, row) in records.iter().take(sample).enumerate() {
            let cells: Vec<String> = row
                .record
                .fields
                .iter()
                .map(|(name, cell)| {
                    format!(
                        "{}={} ({})",
                        name,
                        cell.value()
                            .map(|v| v.to_cell_string())
                            .unwrap_or_else(|| "-".to_string()),
                        cell.provenance().as_char()
                    )
                })
                .collect();
            println!(
                "{}. station {} ({}) at {}: {}",
                i + 1,
                row.record.station_id,
                row.record.station_name,
                row.record.timestamp,
                cells.join(", ")
            );
        }
    }
}
