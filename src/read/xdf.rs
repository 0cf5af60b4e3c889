// Extensible Data Format, as written by LabRecorder
//
// "XDF:" followed by chunks, all little-endian:
//
// ┌───────────────────────┬──────────────────────┬─────────┬──────────────────┐
// │ NumLengthBytes: u8    │ Length: 1, 4, 8 bytes │ Tag: u16 │ Length - 2 bytes │
// └───────────────────────┴──────────────────────┴─────────┴──────────────────┘
//
// * https://github.com/sccn/xdf/wiki/Specifications

use std::collections::BTreeMap;
use std::{fs, path::Path};

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::raw::{Marker, Raw};

const MAGIC: &[u8] = b"XDF:";

const TAG_FILE_HEADER: u16 = 1;
const TAG_STREAM_HEADER: u16 = 2;
const TAG_SAMPLES: u16 = 3;
const TAG_CLOCK_OFFSET: u16 = 4;
const TAG_BOUNDARY: u16 = 5;
const TAG_STREAM_FOOTER: u16 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFormat {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Double64,
    String,
}

impl ChannelFormat {
    fn parse(s: &str) -> Option<Self> {
        Some(match s.trim() {
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "float32" => Self::Float32,
            "double64" => Self::Double64,
            "string" => Self::String,
            _ => return None,
        })
    }

    // Bytes per value, `None` for variable-length strings
    fn width(self) -> Option<usize> {
        match self {
            Self::Int8 => Some(1),
            Self::Int16 => Some(2),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Int64 | Self::Double64 => Some(8),
            Self::String => None,
        }
    }

    fn decode(self, b: &[u8]) -> f64 {
        match self {
            Self::Int8 => i8::from_le_bytes([b[0]]) as f64,
            Self::Int16 => i16::from_le_bytes([b[0], b[1]]) as f64,
            Self::Int32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            Self::Float32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            Self::Int64 => i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64,
            Self::Double64 => f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
            Self::String => f64::NAN,
        }
    }
}

/// The `<info>` document opening a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHeader {
    pub name: String,
    /// Content type, `EEG` or `Markers` for the streams used here.
    pub kind: String,
    pub channel_count: usize,
    /// Zero for irregular streams.
    pub nominal_srate: f64,
    pub format: ChannelFormat,
    pub labels: Vec<String>,
}

impl StreamHeader {
    pub fn parse(xml: &str) -> std::result::Result<Self, String> {
        let doc = roxmltree::Document::parse(xml).map_err(|e| e.to_string())?;
        let info = doc.root_element();
        let text = |name: &str| {
            info.children()
                .find(|n| n.has_tag_name(name))
                .and_then(|n| n.text())
                .map(str::trim)
                .unwrap_or_default()
        };

        let channel_count = text("channel_count")
            .parse::<usize>()
            .map_err(|e| format!("channel_count: {}", e))?;
        let nominal_srate = text("nominal_srate")
            .parse::<f64>()
            .map_err(|e| format!("nominal_srate: {}", e))?;
        let format = ChannelFormat::parse(text("channel_format"))
            .ok_or_else(|| format!("unsupported channel_format '{}'", text("channel_format")))?;

        // desc/channels/channel/label, when the source describes its channels
        let labels = info
            .descendants()
            .filter(|n| n.has_tag_name("channel"))
            .filter_map(|n| n.children().find(|c| c.has_tag_name("label")))
            .map(|n| n.text().unwrap_or_default().trim().to_string())
            .collect();

        Ok(Self {
            name: text("name").to_string(),
            kind: text("type").to_string(),
            channel_count,
            nominal_srate,
            format,
            labels,
        })
    }

    fn channel_names(&self) -> Vec<String> {
        if self.labels.len() == self.channel_count {
            self.labels.clone()
        } else {
            (1..=self.channel_count).map(|i| format!("Ch{}", i)).collect()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stream {
    pub header: StreamHeader,
    pub timestamps: Vec<f64>,
    /// Sample-major values of numeric streams.
    pub values: Vec<f64>,
    /// First channel of each sample of string streams.
    pub strings: Vec<String>,
    // (collection time, offset) pairs
    clock_offsets: Vec<(f64, f64)>,
}

impl Stream {
    fn new(header: StreamHeader) -> Self {
        Self {
            header,
            timestamps: Vec::new(),
            values: Vec::new(),
            strings: Vec::new(),
            clock_offsets: Vec::new(),
        }
    }

    pub fn num_samples(&self) -> usize {
        self.timestamps.len()
    }

    /// Moves the timestamps onto the recording clock by the mean of the clock offsets.
    fn synchronize(&mut self) {
        if self.clock_offsets.is_empty() {
            return;
        }
        let mean = self.clock_offsets.iter().map(|(_, o)| o).sum::<f64>() / self.clock_offsets.len() as f64;
        self.timestamps.iter_mut().for_each(|t| *t += mean);
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len())?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Option<f64> {
        self.take(8).map(|b| ChannelFormat::Double64.decode(b))
    }

    // NumLengthBytes then the length itself
    fn varlen(&mut self) -> Option<usize> {
        let value = match self.u8()? {
            1 => self.u8()? as u64,
            4 => self.u32()? as u64,
            8 => {
                let b = self.take(8)?;
                u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
            _ => return None,
        };
        usize::try_from(value).ok()
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

fn read_samples(stream: &mut Stream, chunk: &mut Cursor) -> Option<()> {
    let header = &stream.header;
    let period = if header.nominal_srate > 0.0 {
        1.0 / header.nominal_srate
    } else {
        0.0
    };

    for _ in 0..chunk.varlen()? {
        let timestamp = match chunk.u8()? {
            0 => stream.timestamps.last().map_or(0.0, |t| t + period),
            8 => chunk.f64()?,
            _ => return None,
        };
        stream.timestamps.push(timestamp);

        match header.format.width() {
            Some(width) => {
                for _ in 0..header.channel_count {
                    stream.values.push(header.format.decode(chunk.take(width)?));
                }
            }
            None => {
                for c in 0..header.channel_count {
                    let len = chunk.varlen()?;
                    let value = chunk.take(len)?;
                    if c == 0 {
                        stream.strings.push(String::from_utf8_lossy(value).into_owned());
                    }
                }
            }
        }
    }
    Some(())
}

/// Every stream of an XDF file, keyed by stream id, with clock offsets applied.
pub fn load_streams<P: AsRef<Path>>(path: P) -> Result<BTreeMap<u32, Stream>> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    if !bytes.starts_with(MAGIC) {
        return Err(Error::recording(path, "missing XDF: magic"));
    }

    let mut cursor = Cursor { bytes: &bytes, pos: MAGIC.len() };
    let mut streams = BTreeMap::new();

    while !cursor.is_empty() {
        let chunk = cursor
            .varlen()
            .filter(|&len| len >= 2)
            .and_then(|len| cursor.take(len))
            .ok_or_else(|| Error::recording(path, format!("truncated chunk at byte {}", cursor.pos)))?;
        let mut chunk = Cursor { bytes: chunk, pos: 0 };
        let truncated = |tag: u16| Error::recording(path, format!("truncated chunk with tag {}", tag));

        let tag = chunk.u16().ok_or_else(|| truncated(0))?;
        match tag {
            TAG_STREAM_HEADER => {
                let id = chunk.u32().ok_or_else(|| truncated(tag))?;
                let xml = String::from_utf8_lossy(&chunk.bytes[chunk.pos..]);
                let header = StreamHeader::parse(&xml)
                    .map_err(|e| Error::recording(path, format!("stream {}: {}", id, e)))?;
                log::debug!("Stream {} '{}' of type '{}'", id, header.name, header.kind);
                streams.insert(id, Stream::new(header));
            }
            TAG_SAMPLES => {
                let id = chunk.u32().ok_or_else(|| truncated(tag))?;
                let stream = streams
                    .get_mut(&id)
                    .ok_or_else(|| Error::recording(path, format!("samples for undeclared stream {}", id)))?;
                read_samples(stream, &mut chunk).ok_or_else(|| truncated(tag))?;
            }
            TAG_CLOCK_OFFSET => {
                let id = chunk.u32().ok_or_else(|| truncated(tag))?;
                let pair = chunk.f64().zip(chunk.f64()).ok_or_else(|| truncated(tag))?;
                if let Some(stream) = streams.get_mut(&id) {
                    stream.clock_offsets.push(pair);
                }
            }
            TAG_FILE_HEADER | TAG_BOUNDARY | TAG_STREAM_FOOTER => {}
            other => log::debug!("Skipping chunk with unknown tag {}", other),
        }
    }

    streams.values_mut().for_each(Stream::synchronize);
    Ok(streams)
}

// Index of the sample whose timestamp is closest to `t`
fn nearest_sample(timestamps: &[f64], t: f64) -> usize {
    let i = timestamps.partition_point(|&s| s < t);
    if i == 0 {
        0
    } else if i == timestamps.len() || t - timestamps[i - 1] <= timestamps[i] - t {
        i - 1
    } else {
        i
    }
}

/// Reads the `EEG` stream of an XDF file with the string streams as markers.
///
/// A marker's kind is the name of its stream and its description the sample text.
/// Markers outside the EEG time range are dropped.
pub fn load_raw<P: AsRef<Path>>(path: P) -> Result<Raw> {
    let path = path.as_ref();
    let streams = load_streams(path)?;

    let eeg = streams
        .values()
        .find(|s| s.header.kind.eq_ignore_ascii_case("EEG") && s.header.format != ChannelFormat::String)
        .ok_or_else(|| Error::recording(path, "no EEG stream"))?;
    if eeg.header.nominal_srate <= 0.0 {
        return Err(Error::recording(path, "EEG stream without a nominal sampling rate"));
    }
    if eeg.num_samples() == 0 {
        return Err(Error::recording(path, "EEG stream without samples"));
    }

    let (c, n) = (eeg.header.channel_count, eeg.num_samples());
    let data = Array2::from_shape_fn((c, n), |(ch, t)| eeg.values[t * c + ch] as f32);

    let half_period = 0.5 / eeg.header.nominal_srate;
    let (first, last) = (eeg.timestamps[0], eeg.timestamps[n - 1]);
    let mut markers = streams
        .values()
        .filter(|s| s.header.format == ChannelFormat::String)
        .flat_map(|s| {
            s.timestamps
                .iter()
                .zip(&s.strings)
                .map(move |(&t, text)| (s.header.name.as_str(), t, text))
        })
        .filter(|&(_, t, _)| t >= first - half_period && t <= last + half_period)
        .map(|(kind, t, text)| Marker {
            kind: kind.to_string(),
            description: text.clone(),
            position: nearest_sample(&eeg.timestamps, t),
        })
        .collect::<Vec<Marker>>();
    markers.sort_by_key(|m| m.position);

    log::debug!(
        "Loaded {} channels x {} samples @ {} Hz with {} markers",
        c,
        n,
        eeg.header.nominal_srate,
        markers.len()
    );

    Raw::new(data, eeg.header.channel_names(), eeg.header.nominal_srate, markers)
}
