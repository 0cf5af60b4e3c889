//! Per-subject epoch artifacts.
//!
//! Each subject is stored as three files in one directory:
//!
//! * `<code>_data.bin`: all epochs as one `[E, C, T]` little-endian f32 tensor, preceded by
//!   an 8-byte header length and a JSON header `{"dtype": "F32", "shape": [E, C, T]}`
//! * `<code>_info.json`: channel names and timing ([`SubjectInfo`])
//! * `<code>_labels.json`: one `<image_name>/<condition>` string per epoch
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::epochs::Epochs;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub channels: Vec<String>,
    pub sfreq: f64,
    pub t_min: f64,
}

#[derive(Debug, Clone)]
pub struct SubjectArtifacts {
    pub data: Vec<Array2<f32>>,
    pub info: SubjectInfo,
    pub labels: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TensorHeader {
    dtype: String,
    shape: Vec<usize>,
}

pub fn data_path(dir: &Path, code: &str) -> PathBuf {
    dir.join(format!("{}_data.bin", code))
}

pub fn info_path(dir: &Path, code: &str) -> PathBuf {
    dir.join(format!("{}_info.json", code))
}

pub fn labels_path(dir: &Path, code: &str) -> PathBuf {
    dir.join(format!("{}_labels.json", code))
}

pub fn save(dir: &Path, code: &str, epochs: &Epochs) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let (num_channels, num_samples) = epochs
        .data
        .first()
        .map(|e| e.dim())
        .unwrap_or((epochs.channels.len(), 0));
    if epochs.data.iter().any(|e| e.dim() != (num_channels, num_samples)) {
        return Err(Error::Shape("epochs of unequal shape".to_string()));
    }

    let header = serde_json::to_vec(&TensorHeader {
        dtype: "F32".to_string(),
        shape: vec![epochs.len(), num_channels, num_samples],
    })?;
    let pad = (8 - header.len() % 8) % 8;
    let header = header
        .into_iter()
        .chain(std::iter::repeat(b' ').take(pad))
        .collect::<Vec<u8>>();

    let path = data_path(dir, code);
    let mut bytes = Vec::with_capacity(8 + header.len() + 4 * epochs.len() * num_channels * num_samples);
    bytes.extend_from_slice(&(header.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&header);
    for epoch in &epochs.data {
        bytes.extend(epoch.iter().flat_map(|v| v.to_le_bytes()));
    }
    let mut f = fs::File::create(&path).map_err(|e| Error::io(&path, e))?;
    f.write_all(&bytes).map_err(|e| Error::io(&path, e))?;

    let info = SubjectInfo {
        channels: epochs.channels.clone(),
        sfreq: epochs.sfreq,
        t_min: epochs.t_min,
    };
    write_json(&info_path(dir, code), &info)?;
    write_json(&labels_path(dir, code), &epochs.labels)?;

    log::info!("Saved {} epochs of subject {} to {}", epochs.len(), code, dir.display());
    Ok(())
}

pub fn load(dir: &Path, code: &str) -> Result<SubjectArtifacts> {
    let data = read_tensor(&data_path(dir, code))?;
    let info: SubjectInfo = read_json(&info_path(dir, code))?;
    let labels: Vec<String> = read_json(&labels_path(dir, code))?;

    if data.len() != labels.len() {
        return Err(Error::artifact(
            labels_path(dir, code),
            format!("{} labels for {} epochs", labels.len(), data.len()),
        ));
    }
    if let Some(epoch) = data.first() {
        if epoch.nrows() != info.channels.len() {
            return Err(Error::artifact(
                info_path(dir, code),
                format!(
                    "{} channel names for {}-channel epochs",
                    info.channels.len(),
                    epoch.nrows()
                ),
            ));
        }
    }

    Ok(SubjectArtifacts { data, info, labels })
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::ArtifactMissing(path.to_path_buf()),
        _ => Error::io(path, e),
    })
}

fn read_tensor(path: &Path) -> Result<Vec<Array2<f32>>> {
    let bytes = read_bytes(path)?;
    if bytes.len() < 8 {
        return Err(Error::artifact(path, "file too small"));
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[..8]);
    let end = usize::try_from(u64::from_le_bytes(len))
        .ok()
        .and_then(|n| n.checked_add(8))
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| Error::artifact(path, "truncated header"))?;
    let header: TensorHeader = serde_json::from_slice(&bytes[8..end])?;
    if header.dtype != "F32" || header.shape.len() != 3 {
        return Err(Error::artifact(
            path,
            format!("expected a 3-D F32 tensor, found {} {:?}", header.dtype, header.shape),
        ));
    }

    let payload = &bytes[end..];
    let expected = header
        .shape
        .iter()
        .try_fold(4usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Error::artifact(path, format!("shape {:?} overflows", header.shape)))?;
    if payload.len() != expected {
        return Err(Error::artifact(
            path,
            format!("{} payload bytes for shape {:?}", payload.len(), header.shape),
        ));
    }
    let values = payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect::<Vec<f32>>();
    let tensor = Array3::from_shape_vec(
        (header.shape[0], header.shape[1], header.shape[2]),
        values,
    )?;

    Ok(tensor.axis_iter(Axis(0)).map(|e| e.to_owned()).collect())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = read_bytes(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(path, json).map_err(|e| Error::io(path, e))
}
