//! The two batch runs: recordings → per-subject artifacts, and artifacts → trained model.
use std::fs;
use std::path::PathBuf;

use burn::module::{AutodiffModule, Module};
use burn::tensor::backend::Backend;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::artifacts;
use crate::config::{ExperimentConfig, RecordingInfo};
use crate::dataset::{assemble, Dataset};
use crate::epochs::segment;
use crate::error::{Error, Result};
use crate::metrics::{self, RocCurve, Scores};
use crate::model::TrainingBackend;
use crate::plot;
use crate::raw::Raw;
use crate::read::BIDSPath;
use crate::split::{train_val_test, Partition};
use crate::survey::{FormTable, RatingsTable};
use crate::train::{fit, History};

/// Reads and merges every recording block of `subject` in the configured order.
pub fn load_recording(cfg: &ExperimentConfig, subject: &str) -> Result<Raw> {
    let pre = &cfg.preprocessing;
    let bids = BIDSPath::new(&pre.bids_root, subject, None, "eeg");

    let files = if pre.runs.is_empty() {
        vec![bids.recording_file(&pre.task, None, pre.format)]
    } else {
        pre.runs
            .iter()
            .map(|run| bids.recording_file(&pre.task, Some(run.as_str()), pre.format))
            .collect()
    };

    let mut blocks = Vec::with_capacity(files.len());
    for file in &files {
        log::info!("Reading {}", file.display());
        blocks.push(pre.format.load_raw(file)?);
    }

    let mut blocks = blocks.into_iter();
    let first = blocks
        .next()
        .ok_or_else(|| Error::Config("no recording blocks configured".to_string()))?;
    first.concatenate(&blocks.collect::<Vec<Raw>>())
}

fn write_figures(cfg: &ExperimentConfig, subject: &str, raw: &Raw, info: &RecordingInfo) -> Result<()> {
    let dir = &cfg.preprocessing.figures_dir;
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let picked = raw.pick_channels(&info.channels)?;
    plot::raw_traces(dir.join(format!("{}_raw.png", subject)), &picked, info.plot_seconds)?;

    let epochs = segment(&picked, info)?;
    let evoked = epochs.evoked();
    if evoked.is_empty() {
        log::warn!("Subject {}: no epochs to average", subject);
        return Ok(());
    }
    plot::evoked(
        dir.join(format!("{}_evoked.png", subject)),
        &evoked,
        picked.channels(),
        epochs.sfreq,
        epochs.t_min,
    )
}

/// Builds the artifacts of one subject and returns the number of saved epochs.
///
/// Figures use the plotting channel selection, the artifacts the full one.
pub fn run_preprocessing(cfg: &ExperimentConfig, subject: &str) -> Result<usize> {
    let raw = load_recording(cfg, subject)?;
    log::info!(
        "Subject {}: {} channels, {} samples @ {} Hz",
        subject,
        raw.channels().len(),
        raw.num_samples(),
        raw.sfreq()
    );

    if cfg.preprocessing.save_images {
        let plot_info = RecordingInfo::load(&cfg.preprocessing.plot_info)?;
        write_figures(cfg, subject, &raw, &plot_info)?;
    }

    let full_info = RecordingInfo::load(&cfg.preprocessing.full_info)?;
    let picked = raw.pick_channels(&full_info.channels)?;
    let epochs = segment(&picked, &full_info)?;
    if epochs.is_empty() {
        return Err(Error::EmptyDataset);
    }
    for condition in epochs.conditions() {
        log::debug!("Subject {}: condition {}", subject, condition);
    }

    artifacts::save(&cfg.artifacts_dir, subject, &epochs)?;
    Ok(epochs.len())
}

/// What a training run produced.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub partition: Partition,
    pub history: History,
    pub scores: Scores,
    pub roc: RocCurve,
    pub figure: Option<PathBuf>,
}

/// Assembles and encodes the dataset from the configured tables and artifacts.
pub fn build_dataset(cfg: &ExperimentConfig) -> Result<(Dataset, Array2<f32>)> {
    let form = FormTable::load(&cfg.form_path)?;
    let ratings = RatingsTable::load(&cfg.ratings_path)?;

    let mut dataset = assemble(&form, &ratings, cfg)?;
    let encoders = dataset.encode_features(cfg)?;
    for (column, encoder) in cfg.categorical_columns.iter().zip(&encoders) {
        log::debug!("Feature column {}: {} classes", column, encoder.classes().len());
    }
    let info = dataset.info.to_array()?;
    log::debug!("Info matrix {:?}", info.dim());

    let targets = dataset.targets(cfg.neutral_threshold);
    log::info!("Dataset ready: {} epochs of shape {:?}", dataset.len(), dataset.epoch_shape()?);
    Ok((dataset, targets))
}

pub fn run_training(cfg: &ExperimentConfig) -> Result<TrainingReport> {
    let (dataset, targets) = build_dataset(cfg)?;
    let (num_channels, num_samples) = dataset.epoch_shape()?;

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let partition = train_val_test(dataset.len(), cfg.test_fraction, cfg.holdout_test_fraction, &mut rng);
    log::info!(
        "Split: {} train, {} validation, {} test",
        partition.train.len(),
        partition.validation.len(),
        partition.test.len()
    );

    let x_train = dataset.signal_tensor(&partition.train)?;
    let y_train = targets.select(Axis(0), &partition.train);
    let x_val = dataset.signal_tensor(&partition.validation)?;
    let y_val = targets.select(Axis(0), &partition.validation);
    let x_test = dataset.signal_tensor(&partition.test)?;
    let y_test = targets.select(Axis(0), &partition.test);

    let training = cfg.training();
    let device = Default::default();
    TrainingBackend::seed(training.seed);
    let model = training
        .model
        .init::<TrainingBackend>(num_channels, num_samples, &device)?;
    for line in training.model.summary(num_channels, num_samples) {
        log::info!("{}", line);
    }
    log::info!("Total params: {}", model.num_params());

    let validation = if partition.validation.is_empty() {
        None
    } else {
        Some((&x_val, &y_val))
    };
    let (model, history) = fit(model, &x_train, &y_train, validation, &training, &device, &mut rng)?;

    let model = model.valid();
    let predicted = metrics::binarize(&model.predict(&x_test, &device)?, cfg.decision_threshold);
    let scores = metrics::score(&y_test, &predicted)?;
    let roc = metrics::flattened_roc(&y_test, &predicted)?;

    log::info!(
        "Test set: accuracy {:.2}% precision {:.2}% recall {:.2}% fscore {:.2}% auc {:.3}",
        scores.accuracy * 100.0,
        scores.precision * 100.0,
        scores.recall * 100.0,
        scores.fscore * 100.0,
        roc.auc()
    );

    let figure = match &cfg.figure_path {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
            }
            plot::training_report(path, &history, &roc)?;
            Some(path.clone())
        }
        None => None,
    };

    Ok(TrainingReport {
        partition,
        history,
        scores,
        roc,
        figure,
    })
}
