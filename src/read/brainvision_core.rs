// * https://www.brainproducts.com/download/specification-of-brainvision-core-data-format-1-0/

use std::{fs, path::Path, path::PathBuf, str::Split};

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::raw::{Marker, Raw};

mod locked {
    pub(crate) trait Locked {}

    impl Locked for f32 {}
    impl Locked for i16 {}
}

#[derive(Debug, Clone)]
pub struct Header {
    dir: PathBuf,
    data_file: String,
    marker_file: String,
    num_channels: usize,
    // In microseconds
    sampling_interval: f64,
    orientation: DataOrientation,
    binary_format: BinaryFormatType,
    channels: Vec<ChannelInfo>,
    comment: Option<String>,
}

impl Header {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Header> {
        let path = path.as_ref();
        let buf = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

        // The `[Comment]` section is free text and not valid INI
        let (body, comment) = match buf.find("[Comment]") {
            Some(idx) => (
                &buf[..idx],
                Some(buf[idx + "[Comment]".len()..].trim().to_string()),
            ),
            None => (buf.as_str(), None),
        };
        // And skip the first line (identification line)
        let body = body.lines().skip(1).collect::<Vec<&str>>().join("\n");

        let file = ini::Ini::load_from_str(&body)?;
        let section = |name: &str| {
            file.section(Some(name))
                .ok_or_else(|| Error::recording(path, format!("missing [{}] section", name)))
        };

        let common_infos = section("Common Infos")?;
        let channel_infos = section("Channel Infos")?;
        let binary_infos = file.section(Some("Binary Infos"));

        let get = |key: &str| {
            common_infos
                .get(key)
                .ok_or_else(|| Error::recording(path, format!("missing '{}' key", key)))
        };

        let data_file = get("DataFile")?.to_string();
        let marker_file = get("MarkerFile")?.to_string();
        let num_channels = get("NumberOfChannels")?
            .trim()
            .parse::<usize>()
            .map_err(|e| Error::recording(path, format!("NumberOfChannels: {}", e)))?;
        let sampling_interval = get("SamplingInterval")?
            .trim()
            .parse::<f64>()
            .map_err(|e| Error::recording(path, format!("SamplingInterval: {}", e)))?;
        if sampling_interval <= 0.0 {
            return Err(Error::recording(path, "non-positive SamplingInterval"));
        }

        match common_infos.get("DataFormat").unwrap_or("BINARY") {
            "BINARY" => {}
            other => {
                return Err(Error::recording(
                    path,
                    format!("unsupported data format {}", other),
                ))
            }
        }

        let orientation = match common_infos.get("DataOrientation").unwrap_or("MULTIPLEXED") {
            "MULTIPLEXED" => DataOrientation::Multiplexed,
            "VECTORIZED" => DataOrientation::Vectorized,
            other => {
                return Err(Error::recording(
                    path,
                    format!("invalid data orientation {}", other),
                ))
            }
        };

        let binary_format = match binary_infos.and_then(|s| s.get("BinaryFormat")) {
            Some("IEEE_FLOAT_32") => BinaryFormatType::IeeeFloat32,
            Some("INT_16") => BinaryFormatType::Int16,
            Some(other) => {
                return Err(Error::recording(
                    path,
                    format!("invalid binary format {}", other),
                ))
            }
            None => return Err(Error::recording(path, "missing BinaryFormat")),
        };

        let channels = channel_infos
            .iter()
            .map(|(_, v)| ChannelInfo::try_from(v.split(',')))
            .collect::<std::result::Result<Vec<ChannelInfo>, String>>()
            .map_err(|reason| Error::recording(path, reason))?;

        if channels.len() != num_channels {
            return Err(Error::recording(
                path,
                format!(
                    "{} channel entries for NumberOfChannels={}",
                    channels.len(),
                    num_channels
                ),
            ));
        }

        Ok(Header {
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            data_file,
            marker_file,
            num_channels,
            sampling_interval,
            orientation,
            binary_format,
            channels,
            comment,
        })
    }

    pub fn data_file(&self) -> PathBuf {
        self.dir.join(&self.data_file)
    }

    pub fn marker_file(&self) -> PathBuf {
        self.dir.join(&self.marker_file)
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn sfreq(&self) -> f64 {
        1e6 / self.sampling_interval
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    /// Reference electrode of each channel, `Cz` when the header leaves it blank.
    pub fn channel_references(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.ref_name.as_str()).collect()
    }

    pub fn channel_units(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.unit.as_str()).collect()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

pub(crate) trait BinaryFormat: locked::Locked + Sized + Copy {
    const BYTES: usize;

    fn from_bytes(bytes: &[u8]) -> Self;

    fn to_f32(self) -> f32;
}

impl BinaryFormat for f32 {
    const BYTES: usize = 4;

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut rep = [0u8; 4];
        rep.copy_from_slice(bytes);
        f32::from_le_bytes(rep)
    }

    fn to_f32(self) -> f32 {
        self
    }
}

impl BinaryFormat for i16 {
    const BYTES: usize = 2;

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut rep = [0u8; 2];
        rep.copy_from_slice(bytes);
        i16::from_le_bytes(rep)
    }

    fn to_f32(self) -> f32 {
        self as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryFormatType {
    IeeeFloat32,
    Int16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataOrientation {
    Multiplexed,
    Vectorized,
}

#[derive(Debug, Clone)]
struct ChannelInfo {
    name: String,
    ref_name: String,
    resolution: f64,
    unit: String,
}

impl TryFrom<Split<'_, char>> for ChannelInfo {
    type Error = String;

    fn try_from(mut value: Split<char>) -> std::result::Result<Self, String> {
        let name = value
            .next()
            .filter(|s| !s.is_empty())
            .ok_or("channel entry without a name")?
            .to_string();
        let ref_name = value
            .next()
            .map(|s| if s.is_empty() { "Cz" } else { s })
            .unwrap_or("Cz")
            .into();
        let resolution = match value.next().map(|s| s.trim()) {
            None | Some("") => 1.0f64,
            Some(s) => s
                .parse::<f64>()
                .map_err(|e| format!("channel {} resolution: {}", name, e))?,
        };
        let unit = value
            .next()
            .map(|s| if s.is_empty() { "μV" } else { s })
            .unwrap_or("μV")
            .into();

        Ok(Self {
            name,
            ref_name,
            resolution,
            unit,
        })
    }
}

// Decodes the binary file into a `[channels, samples]` array, scaled by each channel resolution
pub(crate) fn decode<T: BinaryFormat>(rawdata: &[u8], header: &Header) -> Result<Array2<f32>> {
    let num_channels = header.num_channels;
    if num_channels == 0 || rawdata.len() % (T::BYTES * num_channels) != 0 {
        return Err(Error::recording(
            header.data_file(),
            format!(
                "{} bytes is not a whole number of {}-channel samples",
                rawdata.len(),
                num_channels
            ),
        ));
    }
    let values = rawdata
        .chunks_exact(T::BYTES)
        .map(|c| T::from_bytes(c).to_f32())
        .collect::<Vec<f32>>();
    let num_samples = values.len() / num_channels;

    let mut data = match header.orientation {
        DataOrientation::Multiplexed => {
            Array2::from_shape_vec((num_samples, num_channels), values)?.reversed_axes()
        }
        DataOrientation::Vectorized => {
            Array2::from_shape_vec((num_channels, num_samples), values)?
        }
    };

    for (mut row, channel) in data.rows_mut().into_iter().zip(header.channels.iter()) {
        let resolution = channel.resolution as f32;
        row.mapv_inplace(|v| v * resolution);
    }

    Ok(data.as_standard_layout().to_owned())
}

// Parses a `.vmrk` marker file
// Positions are 1-based in the file and 0-based in the returned markers
pub fn load_markers<P: AsRef<Path>>(path: P) -> Result<Vec<Marker>> {
    let path = path.as_ref();
    let buf = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let body = buf.lines().skip(1).collect::<Vec<&str>>().join("\n");

    let file = ini::Ini::load_from_str_noescape(&body)?;
    let marker_infos = match file.section(Some("Marker Infos")) {
        Some(section) => section,
        None => return Ok(Vec::new()),
    };

    marker_infos
        .iter()
        .map(|(_, v)| {
            let mut fields = v.split(',');
            let kind = fields.next().unwrap_or_default().trim().to_string();
            let description = fields.next().unwrap_or_default().trim().to_string();
            let position = fields
                .next()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .filter(|&p| p >= 1)
                .ok_or_else(|| Error::recording(path, format!("invalid marker entry '{}'", v)))?;
            Ok(Marker {
                kind,
                description,
                position: position - 1,
            })
        })
        .collect()
}

// Loads the header, data and markers of one recording block
pub fn load_raw<P: AsRef<Path>>(header_path: P) -> Result<Raw> {
    let header = Header::load(header_path)?;
    let data_path = header.data_file();
    let rawdata = fs::read(&data_path).map_err(|e| Error::io(&data_path, e))?;

    let data = match header.binary_format {
        BinaryFormatType::IeeeFloat32 => decode::<f32>(&rawdata, &header)?,
        BinaryFormatType::Int16 => decode::<i16>(&rawdata, &header)?,
    };
    let markers = load_markers(header.marker_file())?;

    log::debug!(
        "Loaded {} channels x {} samples @ {} Hz with {} markers",
        data.nrows(),
        data.ncols(),
        header.sfreq(),
        markers.len()
    );

    Raw::new(data, header.channel_names(), header.sfreq(), markers)
}
