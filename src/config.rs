//! Experiment configuration.
//!
//! [`ExperimentConfig`] is read from an INI file and holds every path and constant of the
//! dataset-creation and training run. [`RecordingInfo`] is the JSON description of which
//! channels and markers the preprocessing pipeline uses.
//!
//! ```ini
//! [paths]
//! form = data/form-results/form-results.csv
//! ratings = data/ratings-results/ratings-results.csv
//! artifacts = data/artifacts
//! figure = results/training.png
//!
//! [subjects]
//! excluded = krki20, nipe10, maba09, soze31, dino02, ervi22
//!
//! [training]
//! batch_size = 16
//! epochs = 20
//! learning_rate = 0.01
//!
//! [model]
//! kernel_length = 64
//! dropout = 0.5
//!
//! [preprocessing]
//! bids_root = data/eeg
//! format = brainvision
//! task = images
//! runs = 1, 2, 3
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use burn::optim::AdamConfig;
use ini::Ini;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ModelConfig;
use crate::read::RecordingFormat;
use crate::train::TrainingConfig;

// Adam's ε, matching the optimizer the historical runs used
const ADAM_EPSILON: f32 = 1e-7;

pub const DEFAULT_EXCLUDED_CODES: [&str; 6] =
    ["krki20", "nipe10", "maba09", "soze31", "dino02", "ervi22"];

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    pub form_path: PathBuf,
    pub ratings_path: PathBuf,
    pub artifacts_dir: PathBuf,
    /// Where the loss/accuracy/ROC figure is written. `None` skips plotting.
    pub figure_path: Option<PathBuf>,

    pub excluded_codes: Vec<String>,

    /// Substring identifying ocular channels.
    pub eog_marker: String,
    /// Remove EOG rows from the signal before normalization. Off by default: the
    /// historical dataset kept every channel.
    pub drop_eog_channels: bool,
    /// Feature columns (after the `code` column is removed) to label-encode.
    pub categorical_columns: Vec<usize>,
    /// Feature columns divided by `scale_divisor`.
    pub scaled_columns: Vec<usize>,
    pub scale_divisor: f64,

    /// Radius of the neutral disk in the valence/arousal plane.
    pub neutral_threshold: f64,

    pub test_fraction: f64,
    pub holdout_test_fraction: f64,
    pub seed: u64,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,

    pub temporal_filters: usize,
    pub depth_multiplier: usize,
    pub separable_filters: usize,
    pub kernel_length: usize,
    pub separable_kernel_length: usize,
    pub pool_length: usize,
    pub separable_pool_length: usize,
    pub dropout: f64,
    pub depthwise_max_norm: f64,
    pub dense_max_norm: f64,

    /// Binarization cut for predicted probabilities.
    pub decision_threshold: f32,

    pub preprocessing: PreprocessConfig,
}

/// Where the recordings of one subject live and what the preprocessing run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessConfig {
    /// Root of the BIDS tree holding `sub-<code>/eeg/*.vhdr`.
    pub bids_root: PathBuf,
    pub format: RecordingFormat,
    pub task: String,
    /// Recording blocks merged in this order. Empty reads a single file without a run entity.
    pub runs: Vec<String>,
    /// Channel selection used for the diagnostic figures.
    pub plot_info: PathBuf,
    /// Channel selection used for the saved artifacts.
    pub full_info: PathBuf,
    pub figures_dir: PathBuf,
    pub save_images: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            bids_root: PathBuf::from("data/eeg"),
            format: RecordingFormat::BrainVision,
            task: "images".to_string(),
            runs: vec!["1".to_string(), "2".to_string(), "3".to_string()],
            plot_info: PathBuf::from("data/eeg/info.json"),
            full_info: PathBuf::from("data/eeg/info_full.json"),
            figures_dir: PathBuf::from("results/figures"),
            save_images: true,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            form_path: PathBuf::from("data/form-results/form-results.csv"),
            ratings_path: PathBuf::from("data/ratings-results/ratings-results.csv"),
            artifacts_dir: PathBuf::from("data/artifacts"),
            figure_path: None,
            excluded_codes: DEFAULT_EXCLUDED_CODES.iter().map(|s| s.to_string()).collect(),
            eog_marker: "EOG".to_string(),
            drop_eog_channels: false,
            categorical_columns: vec![0, 2, 3],
            scaled_columns: (4..9).collect(),
            scale_divisor: 40.0,
            neutral_threshold: 0.4,
            test_fraction: 0.2,
            holdout_test_fraction: 0.5,
            seed: 42,
            batch_size: 16,
            epochs: 20,
            learning_rate: 0.01,
            temporal_filters: 8,
            depth_multiplier: 2,
            separable_filters: 16,
            kernel_length: 64,
            separable_kernel_length: 16,
            pool_length: 4,
            separable_pool_length: 8,
            dropout: 0.5,
            depthwise_max_norm: 1.0,
            dense_max_norm: 0.25,
            decision_threshold: 0.5,
            preprocessing: PreprocessConfig::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let buf = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let cfg = Self::from_ini_str(&buf)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses an INI document; keys that are absent keep their defaults.
    pub fn from_ini_str(buf: &str) -> Result<Self> {
        let file = Ini::load_from_str(buf)?;
        let mut cfg = Self::default();

        if let Some(paths) = file.section(Some("paths")) {
            if let Some(v) = paths.get("form") {
                cfg.form_path = v.into();
            }
            if let Some(v) = paths.get("ratings") {
                cfg.ratings_path = v.into();
            }
            if let Some(v) = paths.get("artifacts") {
                cfg.artifacts_dir = v.into();
            }
            if let Some(v) = paths.get("figure") {
                cfg.figure_path = Some(v.into()).filter(|p: &PathBuf| !p.as_os_str().is_empty());
            }
        }

        if let Some(subjects) = file.section(Some("subjects")) {
            if let Some(v) = subjects.get("excluded") {
                cfg.excluded_codes = parse_list(v);
            }
        }

        if let Some(features) = file.section(Some("features")) {
            if let Some(v) = features.get("eog_marker") {
                cfg.eog_marker = v.to_string();
            }
            if let Some(v) = features.get("drop_eog_channels") {
                cfg.drop_eog_channels = parse_value("features.drop_eog_channels", v)?;
            }
            if let Some(v) = features.get("categorical_columns") {
                cfg.categorical_columns = parse_indices("features.categorical_columns", v)?;
            }
            if let Some(v) = features.get("scaled_columns") {
                cfg.scaled_columns = parse_indices("features.scaled_columns", v)?;
            }
            if let Some(v) = features.get("scale_divisor") {
                cfg.scale_divisor = parse_value("features.scale_divisor", v)?;
            }
        }

        if let Some(labels) = file.section(Some("labels")) {
            if let Some(v) = labels.get("neutral_threshold") {
                cfg.neutral_threshold = parse_value("labels.neutral_threshold", v)?;
            }
        }

        if let Some(training) = file.section(Some("training")) {
            if let Some(v) = training.get("test_fraction") {
                cfg.test_fraction = parse_value("training.test_fraction", v)?;
            }
            if let Some(v) = training.get("holdout_test_fraction") {
                cfg.holdout_test_fraction = parse_value("training.holdout_test_fraction", v)?;
            }
            if let Some(v) = training.get("seed") {
                cfg.seed = parse_value("training.seed", v)?;
            }
            if let Some(v) = training.get("batch_size") {
                cfg.batch_size = parse_value("training.batch_size", v)?;
            }
            if let Some(v) = training.get("epochs") {
                cfg.epochs = parse_value("training.epochs", v)?;
            }
            if let Some(v) = training.get("learning_rate") {
                cfg.learning_rate = parse_value("training.learning_rate", v)?;
            }
        }

        if let Some(model) = file.section(Some("model")) {
            if let Some(v) = model.get("temporal_filters") {
                cfg.temporal_filters = parse_value("model.temporal_filters", v)?;
            }
            if let Some(v) = model.get("depth_multiplier") {
                cfg.depth_multiplier = parse_value("model.depth_multiplier", v)?;
            }
            if let Some(v) = model.get("separable_filters") {
                cfg.separable_filters = parse_value("model.separable_filters", v)?;
            }
            if let Some(v) = model.get("kernel_length") {
                cfg.kernel_length = parse_value("model.kernel_length", v)?;
            }
            if let Some(v) = model.get("separable_kernel_length") {
                cfg.separable_kernel_length = parse_value("model.separable_kernel_length", v)?;
            }
            if let Some(v) = model.get("pool_length") {
                cfg.pool_length = parse_value("model.pool_length", v)?;
            }
            if let Some(v) = model.get("separable_pool_length") {
                cfg.separable_pool_length = parse_value("model.separable_pool_length", v)?;
            }
            if let Some(v) = model.get("dropout") {
                cfg.dropout = parse_value("model.dropout", v)?;
            }
            if let Some(v) = model.get("depthwise_max_norm") {
                cfg.depthwise_max_norm = parse_value("model.depthwise_max_norm", v)?;
            }
            if let Some(v) = model.get("dense_max_norm") {
                cfg.dense_max_norm = parse_value("model.dense_max_norm", v)?;
            }
        }

        if let Some(evaluation) = file.section(Some("evaluation")) {
            if let Some(v) = evaluation.get("decision_threshold") {
                cfg.decision_threshold = parse_value("evaluation.decision_threshold", v)?;
            }
        }

        if let Some(pre) = file.section(Some("preprocessing")) {
            let out = &mut cfg.preprocessing;
            if let Some(v) = pre.get("bids_root") {
                out.bids_root = v.into();
            }
            if let Some(v) = pre.get("format") {
                out.format = v.parse()?;
            }
            if let Some(v) = pre.get("task") {
                out.task = v.trim().to_string();
            }
            if let Some(v) = pre.get("runs") {
                out.runs = parse_list(v);
            }
            if let Some(v) = pre.get("plot_info") {
                out.plot_info = v.into();
            }
            if let Some(v) = pre.get("full_info") {
                out.full_info = v.into();
            }
            if let Some(v) = pre.get("figures") {
                out.figures_dir = v.into();
            }
            if let Some(v) = pre.get("save_images") {
                out.save_images = parse_value("preprocessing.save_images", v)?;
            }
        }

        Ok(cfg)
    }

    pub fn model(&self) -> ModelConfig {
        ModelConfig::new()
            .with_temporal_filters(self.temporal_filters)
            .with_depth_multiplier(self.depth_multiplier)
            .with_separable_filters(self.separable_filters)
            .with_kernel_length(self.kernel_length)
            .with_separable_kernel_length(self.separable_kernel_length)
            .with_pool_length(self.pool_length)
            .with_separable_pool_length(self.separable_pool_length)
            .with_dropout(self.dropout)
            .with_depthwise_max_norm(self.depthwise_max_norm)
            .with_dense_max_norm(self.dense_max_norm)
    }

    pub fn training(&self) -> TrainingConfig {
        TrainingConfig::new(self.model(), AdamConfig::new().with_epsilon(ADAM_EPSILON))
            .with_num_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_seed(self.seed)
            .with_learning_rate(self.learning_rate)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(msg.to_string()));

        if self.batch_size == 0 {
            return fail("batch_size must be positive");
        }
        if self.epochs == 0 {
            return fail("epochs must be positive");
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail("learning_rate must be positive");
        }
        for (name, fraction) in [
            ("test_fraction", self.test_fraction),
            ("holdout_test_fraction", self.holdout_test_fraction),
        ] {
            if !(fraction > 0.0 && fraction < 1.0) {
                return Err(Error::Config(format!("{} must lie in (0, 1)", name)));
            }
        }
        if !(self.neutral_threshold >= 0.0) {
            return fail("neutral_threshold must be non-negative");
        }
        if self.scale_divisor == 0.0 || !self.scale_divisor.is_finite() {
            return fail("scale_divisor must be a non-zero number");
        }
        if self.eog_marker.is_empty() {
            return fail("eog_marker must not be empty");
        }
        self.model().validate()?;
        if !(self.decision_threshold > 0.0 && self.decision_threshold < 1.0) {
            return fail("decision_threshold must lie in (0, 1)");
        }
        if let Some(col) = self
            .categorical_columns
            .iter()
            .find(|c| self.scaled_columns.contains(c))
        {
            return Err(Error::Config(format!(
                "feature column {} is both categorical and scaled",
                col
            )));
        }
        if self.preprocessing.task.is_empty() {
            return fail("preprocessing.task must not be empty");
        }
        Ok(())
    }
}

fn parse_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_indices(key: &str, v: &str) -> Result<Vec<usize>> {
    parse_list(v)
        .iter()
        .map(|s| parse_value(key, s))
        .collect()
}

fn parse_value<T>(key: &str, v: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    v.trim()
        .parse::<T>()
        .map_err(|e| Error::Config(format!("{}: '{}' ({})", key, v, e)))
}

/// Channel and marker selection for the preprocessing pipeline, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingInfo {
    /// Channels to keep, in order. Empty keeps every channel of the recording.
    pub channels: Vec<String>,
    /// Marker type that opens an epoch; its description is `<image>/<condition>`.
    pub stimulus_type: String,
    /// Epoch window relative to the stimulus, in seconds.
    pub t_min: f64,
    pub t_max: f64,
    /// Subtract the per-channel pre-stimulus mean.
    pub baseline: bool,
    /// Seconds of continuous signal shown in the raw diagnostic plot.
    pub plot_seconds: f64,
}

impl Default for RecordingInfo {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            stimulus_type: "Stimulus".to_string(),
            t_min: -0.2,
            t_max: 1.0,
            baseline: true,
            plot_seconds: 10.0,
        }
    }
}

impl RecordingInfo {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let buf = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let info: RecordingInfo = serde_json::from_str(&buf)?;
        info.validate()?;
        Ok(info)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.t_max > self.t_min) {
            return Err(Error::Config(format!(
                "epoch window t_min={} t_max={} is empty",
                self.t_min, self.t_max
            )));
        }
        if self.stimulus_type.is_empty() {
            return Err(Error::Config("stimulus_type must not be empty".to_string()));
        }
        Ok(())
    }
}
