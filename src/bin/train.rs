use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use rusty_affect::config::ExperimentConfig;
use rusty_affect::pipeline::run_training;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Assemble the valence/arousal dataset and train the classifier")]
struct Args {
    /// Experiment INI file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of the per-subject artifacts
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Output PNG for the loss/accuracy/ROC figure
    #[arg(long)]
    figure: Option<PathBuf>,

    /// Seed of the split, initialization and batch shuffling
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    epochs: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => ExperimentConfig::default(),
    };
    if let Some(dir) = args.artifacts {
        cfg.artifacts_dir = dir;
    }
    if args.figure.is_some() {
        cfg.figure_path = args.figure;
    }
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }
    if let Some(epochs) = args.epochs {
        cfg.epochs = epochs;
    }
    cfg.validate()?;

    let report = run_training(&cfg).context("training run failed")?;

    println!("PERFORMANCES ON TEST SET:");
    println!("Accuracy: {:.2}%", report.scores.accuracy * 100.0);
    println!("Precision: {:.2}%", report.scores.precision * 100.0);
    println!("Recall: {:.2}%", report.scores.recall * 100.0);
    println!("Fscore: {:.2}%", report.scores.fscore * 100.0);
    println!("AUC (flattened): {:.3}", report.roc.auc());
    if let Some(figure) = &report.figure {
        println!("Figure written to {}", figure.display());
    }

    Ok(())
}
