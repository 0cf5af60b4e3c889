use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("INI parse error: {0}")]
    Ini(#[from] ini::ParseError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Malformed recording {path}: {reason}")]
    Recording { path: PathBuf, reason: String },

    #[error("Invalid stimulus marker: {0}")]
    InvalidMarker(String),

    #[error("Subject artifact missing: {0}")]
    ArtifactMissing(PathBuf),

    #[error("Malformed artifact {path}: {reason}")]
    Artifact { path: PathBuf, reason: String },

    #[error("Missing column '{column}' in {table}")]
    MissingColumn { table: String, column: String },

    #[error("Invalid value '{value}' in {table}, row {row}, column '{column}'")]
    InvalidValue {
        table: String,
        row: usize,
        column: String,
        value: String,
    },

    #[error("No matching rating for subject '{code}', image '{image}'")]
    NoMatchingRating { code: String, image: String },

    #[error("No form record for subject '{0}'")]
    NoFormRecord(String),

    #[error("Empty dataset after filtering")]
    EmptyDataset,

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Non-numeric value '{value}' in feature column {column}")]
    NonNumericFeature { column: usize, value: String },

    #[error("Tensor data error: {0}")]
    Tensor(String),

    #[error("Plotting error: {0}")]
    Plot(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn recording(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Recording {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Artifact {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Shape(err.to_string())
    }
}

impl<E: std::error::Error + Send + Sync> From<plotters::drawing::DrawingAreaErrorKind<E>> for Error {
    fn from(err: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        Error::Plot(err.to_string())
    }
}
