use ndarray::{concatenate, Array2, Axis};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub kind: String,
    pub description: String,
    // 0-based sample index
    pub position: usize,
}

/// A continuous multi-channel recording, `[channels, samples]`.
#[derive(Debug, Clone)]
pub struct Raw {
    data: Array2<f32>,
    channels: Vec<String>,
    sfreq: f64,
    markers: Vec<Marker>,
}

impl Raw {
    pub fn new(
        data: Array2<f32>,
        channels: Vec<String>,
        sfreq: f64,
        markers: Vec<Marker>,
    ) -> Result<Self> {
        if data.nrows() != channels.len() {
            return Err(Error::Shape(format!(
                "{} data rows for {} channel names",
                data.nrows(),
                channels.len()
            )));
        }
        if sfreq <= 0.0 {
            return Err(Error::Shape(format!("invalid sampling rate {}", sfreq)));
        }
        Ok(Self {
            data,
            channels,
            sfreq,
            markers,
        })
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn sfreq(&self) -> f64 {
        self.sfreq
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn num_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Keeps only the named channels, in the given order.
    ///
    /// An empty selection keeps every channel.
    pub fn pick_channels(&self, names: &[String]) -> Result<Raw> {
        if names.is_empty() {
            return Ok(self.clone());
        }
        let indices = names
            .iter()
            .map(|name| {
                self.channels
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| Error::Shape(format!("channel '{}' not in recording", name)))
            })
            .collect::<Result<Vec<usize>>>()?;

        Ok(Raw {
            data: self.data.select(Axis(0), &indices),
            channels: names.to_vec(),
            sfreq: self.sfreq,
            markers: self.markers.clone(),
        })
    }

    /// Appends recording blocks after `self`.
    ///
    /// Marker positions of each appended block are offset by the samples preceding it.
    /// Every block must share the channel list and sampling rate.
    pub fn concatenate(self, others: &[Raw]) -> Result<Raw> {
        let mut markers = self.markers;
        let mut offset = self.data.ncols();
        for other in others {
            if other.channels != self.channels {
                return Err(Error::Shape(
                    "recording blocks have different channel lists".to_string(),
                ));
            }
            if (other.sfreq - self.sfreq).abs() > 1e-6 {
                return Err(Error::Shape(format!(
                    "recording blocks sampled at {} and {} Hz",
                    self.sfreq, other.sfreq
                )));
            }
            markers.extend(other.markers.iter().map(|m| Marker {
                position: m.position + offset,
                ..m.clone()
            }));
            offset += other.data.ncols();
        }

        let views = std::iter::once(self.data.view())
            .chain(others.iter().map(|o| o.data.view()))
            .collect::<Vec<_>>();
        let data = concatenate(Axis(1), &views)?;

        Ok(Raw {
            data,
            channels: self.channels,
            sfreq: self.sfreq,
            markers,
        })
    }
}

/// Indices of the channels whose name does not contain `eog_marker`.
pub fn eeg_channel_indices(channels: &[String], eog_marker: &str) -> Vec<usize> {
    channels
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.contains(eog_marker))
        .map(|(i, _)| i)
        .collect()
}
