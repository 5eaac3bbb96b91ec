use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use student_performance::config::init_logging;
use student_performance::forest::ForestParams;
use student_performance::pipeline::train_from_raw;
use student_performance::{ModelStore, RawTable, TrainOutcome, TrainingConfig};

/// Offline trainer: aggregate a CSV batch and fit the marks model.
#[derive(Parser)]
#[command(name = "train")]
#[command(about = "Train the marks prediction model from a CSV file", long_about = None)]
struct Cli {
    #[arg(long)]
    csv: PathBuf,

    #[arg(long, env = "SPT_MODEL_PATH", default_value = "models/rf_model.json")]
    model_path: PathBuf,

    #[arg(long, default_value_t = 100)]
    trees: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_filter: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_filter);

    let table = RawTable::from_csv_path(&cli.csv)
        .with_context(|| format!("failed to read {}", cli.csv.display()))?;
    let config = TrainingConfig {
        forest: ForestParams::default().n_trees(cli.trees).seed(cli.seed),
        ..Default::default()
    };
    let store = ModelStore::new(&cli.model_path);

    match train_from_raw(&table, &store, &config)? {
        TrainOutcome::Trained(report) => {
            println!(
                "Model written to {} ({} train / {} holdout rows).",
                store.path().display(),
                report.train_rows,
                report.validation_rows
            );
            println!("Holdout MSE: {:.4}", report.validation_mse);
        }
        TrainOutcome::NotTrained { students } => {
            println!("Not enough data to train: {students} student(s), need at least 2.");
        }
    }
    Ok(())
}
