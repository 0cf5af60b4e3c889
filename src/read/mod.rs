use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::raw::Raw;

pub mod brainvision_core;
pub mod xdf;

/// On-disk layout of the recording blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingFormat {
    /// `.vhdr` header with `.vmrk` markers and `.eeg` samples.
    #[default]
    BrainVision,
    Xdf,
}

impl RecordingFormat {
    pub fn extension(self) -> &'static str {
        match self {
            RecordingFormat::BrainVision => "vhdr",
            RecordingFormat::Xdf => "xdf",
        }
    }

    pub fn load_raw<P: AsRef<Path>>(self, path: P) -> Result<Raw> {
        match self {
            RecordingFormat::BrainVision => brainvision_core::load_raw(path),
            RecordingFormat::Xdf => xdf::load_raw(path),
        }
    }
}

impl FromStr for RecordingFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brainvision" => Ok(RecordingFormat::BrainVision),
            "xdf" => Ok(RecordingFormat::Xdf),
            other => Err(Error::Config(format!("unknown recording format '{}'", other))),
        }
    }
}

// The path to a BIDS-compliant data recording root
// Each recording block is uniquely identified by a `root`, `subject`, `task` and `run`
// and points to a header (or XDF) file:
//
// sub-<subject>/
//     -> [ses-<ses>]/
//         -> eeg/
//             -> sub-<subject>[_ses-<ses>]_task-<task>[_run-<run>]_eeg.<vhdr|xdf>
//
// <https://bids-specification.readthedocs.io/en/stable/modality-specific-files/electroencephalography.html>
#[derive(Debug, Clone)]
pub struct BIDSPath<'a> {
    dir: PathBuf,
    subject: &'a str,
    session: Option<&'a str>,
    datatype: &'a str,
}

impl<'a> BIDSPath<'a> {
    pub fn new<P: AsRef<Path>>(
        root: P,
        subject: &'a str,
        session: Option<&'a str>,
        datatype: &'a str,
    ) -> Self {
        let mut dir = root.as_ref().join(format!("sub-{}", subject));
        if let Some(session) = session {
            dir.push(format!("ses-{}", session));
        }
        dir.push(datatype);

        Self {
            dir,
            subject,
            session,
            datatype,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn subject(&self) -> &str {
        self.subject
    }

    // Header (or XDF) file of one recording block
    pub fn recording_file(&self, task: &str, run: Option<&str>, format: RecordingFormat) -> PathBuf {
        self.dir.join(format!(
            "sub-{}{}_task-{}{}_{}.{}",
            self.subject,
            self.session
                .map(|s| format!("_ses-{}", s))
                .unwrap_or_default(),
            task,
            run.map(|r| format!("_run-{}", r)).unwrap_or_default(),
            self.datatype,
            format.extension()
        ))
    }
}
