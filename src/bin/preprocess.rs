use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use rusty_affect::config::ExperimentConfig;
use rusty_affect::pipeline::run_preprocessing;

#[derive(Parser, Debug)]
#[command(name = "preprocess", about = "Merge BrainVision blocks, epoch them and save per-subject artifacts")]
struct Args {
    /// Subject codes to process
    #[arg(required = true)]
    subjects: Vec<String>,

    /// Experiment INI file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root of the BIDS recording tree
    #[arg(long)]
    root: Option<PathBuf>,

    /// BIDS task entity
    #[arg(long)]
    task: Option<String>,

    /// Recording blocks to merge (comma-separated, in order)
    #[arg(long, value_delimiter = ',')]
    runs: Option<Vec<String>>,

    /// Recording info JSON used for the artifacts
    #[arg(long)]
    info: Option<PathBuf>,

    /// Output directory of the artifacts
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip the diagnostic figures
    #[arg(long)]
    no_images: bool,
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
    let pre = &mut cfg.preprocessing;
    if let Some(root) = args.root {
        pre.bids_root = root;
    }
    if let Some(task) = args.task {
        pre.task = task;
    }
    if let Some(runs) = args.runs {
        pre.runs = runs;
    }
    if let Some(info) = args.info {
        pre.full_info = info;
    }
    if args.no_images {
        pre.save_images = false;
    }
    if let Some(output) = args.output {
        cfg.artifacts_dir = output;
    }
    cfg.validate()?;

    for subject in &args.subjects {
        let count = run_preprocessing(&cfg, subject)
            .with_context(|| format!("preprocessing subject {}", subject))?;
        println!("{}: {} epochs written to {}", subject, count, cfg.artifacts_dir.display());
    }

    Ok(())
}
