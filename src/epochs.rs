//! Stimulus-locked segmentation of a continuous recording.
//!
//! Every marker of the stimulus type opens one epoch covering `[t_min, t_max]` seconds
//! around its position. The marker description, `<image_name>/<condition>`, becomes
//! the epoch label.
use std::collections::BTreeMap;

use ndarray::{s, Array2, Axis};

use crate::config::RecordingInfo;
use crate::error::{Error, Result};
use crate::raw::Raw;

#[derive(Debug, Clone)]
pub struct Epochs {
    pub data: Vec<Array2<f32>>,
    pub labels: Vec<String>,
    pub channels: Vec<String>,
    pub sfreq: f64,
    pub t_min: f64,
}

impl Epochs {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn conditions(&self) -> Vec<String> {
        let mut conditions = self
            .labels
            .iter()
            .filter_map(|l| split_label(l).map(|(_, c)| c.to_string()))
            .collect::<Vec<_>>();
        conditions.sort();
        conditions.dedup();
        conditions
    }

    /// Average of the epochs of each condition, keyed by condition name.
    pub fn evoked(&self) -> BTreeMap<String, Array2<f32>> {
        let mut sums: BTreeMap<String, (Array2<f32>, usize)> = BTreeMap::new();
        for (epoch, label) in self.data.iter().zip(self.labels.iter()) {
            let Some((_, condition)) = split_label(label) else {
                continue;
            };
            let entry = sums
                .entry(condition.to_string())
                .or_insert_with(|| (Array2::zeros(epoch.raw_dim()), 0));
            entry.0 += epoch;
            entry.1 += 1;
        }
        sums.into_iter()
            .map(|(condition, (sum, n))| (condition, sum / n as f32))
            .collect()
    }
}

/// Splits `<image_name>/<condition>` at the first `/`.
pub fn split_label(label: &str) -> Option<(&str, &str)> {
    label.split_once('/')
}

pub fn segment(raw: &Raw, info: &RecordingInfo) -> Result<Epochs> {
    info.validate()?;
    let sfreq = raw.sfreq();
    let start_offset = (info.t_min * sfreq).round() as i64;
    let num_samples = ((info.t_max - info.t_min) * sfreq).round() as usize + 1;
    let baseline_len = if start_offset < 0 {
        (-start_offset) as usize
    } else {
        0
    };

    let mut data = Vec::new();
    let mut labels = Vec::new();
    for marker in raw
        .markers()
        .iter()
        .filter(|m| m.kind == info.stimulus_type)
    {
        if split_label(&marker.description).is_none() {
            return Err(Error::InvalidMarker(format!(
                "'{}' at sample {} is not '<image>/<condition>'",
                marker.description, marker.position
            )));
        }
        let start = marker.position as i64 + start_offset;
        let end = start + num_samples as i64;
        if start < 0 || end > raw.num_samples() as i64 {
            log::warn!(
                "Skipping epoch '{}' at sample {}: window exceeds the recording",
                marker.description,
                marker.position
            );
            continue;
        }

        let mut epoch = raw
            .data()
            .slice(s![.., start as usize..end as usize])
            .to_owned();
        if info.baseline && baseline_len > 0 {
            let baseline = epoch
                .slice(s![.., ..baseline_len])
                .mean_axis(Axis(1))
                .ok_or_else(|| Error::Shape("empty baseline interval".to_string()))?;
            epoch -= &baseline.insert_axis(Axis(1));
        }
        data.push(epoch);
        labels.push(marker.description.clone());
    }

    log::info!(
        "Segmented {} epochs of {} samples ({} stimulus markers)",
        data.len(),
        num_samples,
        raw.markers()
            .iter()
            .filter(|m| m.kind == info.stimulus_type)
            .count()
    );

    Ok(Epochs {
        data,
        labels,
        channels: raw.channels().to_vec(),
        sfreq,
        t_min: info.t_min,
    })
}
