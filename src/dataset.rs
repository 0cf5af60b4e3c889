//! Joins per-subject epochs with the survey tables.
//!
//! For every selected subject the epochs are z-scored one by one, the subject's form row
//! is repeated once per epoch and each epoch gets the valence/arousal rating of the image
//! named in its label. `info`, `signals` and `ratings` stay positionally aligned.
use std::path::Path;

use ndarray::{Array2, Array3, Axis};

use crate::artifacts;
use crate::config::ExperimentConfig;
use crate::encoding::{InfoMatrix, LabelEncoder};
use crate::epochs::split_label;
use crate::error::{Error, Result};
use crate::labels::quadrant_target;
use crate::normalize::ZScore;
use crate::raw::eeg_channel_indices;
use crate::survey::{select_subjects, FormRecord, RatingsTable, FormTable};

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub info: InfoMatrix,
    pub signals: Vec<Array2<f32>>,
    /// `[valence, arousal]` per epoch.
    pub ratings: Vec<[f64; 2]>,
    /// Subject code of each epoch.
    pub subjects: Vec<String>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn is_aligned(&self) -> bool {
        let n = self.signals.len();
        self.info.len() == n && self.ratings.len() == n && self.subjects.len() == n
    }

    /// `(channels, samples)` shared by every epoch.
    pub fn epoch_shape(&self) -> Result<(usize, usize)> {
        let shape = self.signals.first().ok_or(Error::EmptyDataset)?.dim();
        match self.signals.iter().position(|s| s.dim() != shape) {
            Some(i) => Err(Error::Shape(format!(
                "epoch {} of subject {} is {:?}, expected {:?}",
                i,
                self.subjects[i],
                self.signals[i].dim(),
                shape
            ))),
            None => Ok(shape),
        }
    }

    /// Quadrant targets, `[N, 3]`.
    pub fn targets(&self, threshold: f64) -> Array2<f32> {
        let mut out = Array2::zeros((self.len(), 3));
        for (mut row, &[valence, arousal]) in out.rows_mut().into_iter().zip(self.ratings.iter()) {
            let target = quadrant_target(valence, arousal, threshold);
            row.iter_mut().zip(target).for_each(|(o, t)| *o = t);
        }
        out
    }

    /// Signals stacked as `[N, channels, samples]`.
    pub fn signal_tensor(&self, indices: &[usize]) -> Result<Array3<f32>> {
        let (num_channels, num_samples) = self.epoch_shape()?;
        if indices.is_empty() {
            return Ok(Array3::zeros((0, num_channels, num_samples)));
        }
        let views = indices
            .iter()
            .map(|&i| self.signals[i].view())
            .collect::<Vec<_>>();
        Ok(ndarray::stack(Axis(0), &views)?)
    }

    /// Label-encodes and rescales the configured info columns.
    pub fn encode_features(&mut self, cfg: &ExperimentConfig) -> Result<Vec<LabelEncoder>> {
        let encoders = self.info.encode_categorical(&cfg.categorical_columns)?;
        self.info.scale(&cfg.scaled_columns, cfg.scale_divisor)?;
        Ok(encoders)
    }

    fn extend(&mut self, other: Dataset) {
        self.info.rows.extend(other.info.rows);
        self.signals.extend(other.signals);
        self.ratings.extend(other.ratings);
        self.subjects.extend(other.subjects);
    }
}

/// Loads, normalizes and joins the epochs of one subject.
pub fn load_subject(
    artifacts_dir: &Path,
    form: &FormRecord,
    ratings: &RatingsTable,
    cfg: &ExperimentConfig,
) -> Result<Dataset> {
    let code = form.code.as_str();
    let subject = artifacts::load(artifacts_dir, code)?;

    let eeg_indices = eeg_channel_indices(&subject.info.channels, &cfg.eog_marker);
    let num_eog = subject.info.channels.len() - eeg_indices.len();
    if num_eog > 0 && !cfg.drop_eog_channels {
        log::warn!(
            "Subject {}: {} EOG channel(s) identified but kept in the signal",
            code,
            num_eog
        );
    }

    let subject_ratings = ratings.for_subject(code);
    let mut out = Dataset::default();
    for (epoch, label) in subject.data.into_iter().zip(subject.labels.iter()) {
        let mut epoch = if cfg.drop_eog_channels {
            epoch.select(Axis(0), &eeg_indices)
        } else {
            epoch
        };
        epoch.zscore_inplace();

        let image = split_label(label).map_or(label.as_str(), |(image, _)| image);
        let mut matches = subject_ratings.iter().filter(|r| r.image == image);
        let rating = matches.next().ok_or_else(|| Error::NoMatchingRating {
            code: code.to_string(),
            image: image.to_string(),
        })?;
        if matches.next().is_some() {
            log::warn!(
                "Subject {}: several ratings for image {}, using the first",
                code,
                image
            );
        }

        out.info.rows.push(form.features.clone());
        out.signals.push(epoch);
        out.ratings.push([rating.valence, rating.arousal]);
        out.subjects.push(code.to_string());
    }

    log::info!("Subject {}: {} epochs", code, out.len());
    Ok(out)
}

/// Joins every selected subject. Fails fast on the first missing artifact or rating.
pub fn assemble(
    form: &FormTable,
    ratings: &RatingsTable,
    cfg: &ExperimentConfig,
) -> Result<Dataset> {
    let codes = select_subjects(form, ratings, &cfg.excluded_codes);
    if codes.is_empty() {
        return Err(Error::EmptyDataset);
    }
    log::info!("{} subjects selected", codes.len());

    let mut dataset = Dataset::default();
    for code in &codes {
        let record = form
            .record(code)
            .ok_or_else(|| Error::NoFormRecord(code.clone()))?;
        dataset.extend(load_subject(&cfg.artifacts_dir, record, ratings, cfg)?);
    }

    if dataset.is_empty() {
        return Err(Error::EmptyDataset);
    }
    debug_assert!(dataset.is_aligned());
    Ok(dataset)
}
