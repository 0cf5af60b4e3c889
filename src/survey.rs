//! Survey tables: the demographic/personality form and the per-image ratings.
use std::collections::BTreeSet;
use std::path::Path;

use crate::encoding::Feature;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct FormRecord {
    pub code: String,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Default)]
pub struct FormTable {
    /// Names of the feature columns, `code` excluded.
    pub columns: Vec<String>,
    pub records: Vec<FormRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    pub code: String,
    pub image: String,
    pub valence: f64,
    pub arousal: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RatingsTable {
    pub ratings: Vec<Rating>,
}

fn column(headers: &csv::StringRecord, table: &str, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| Error::MissingColumn {
            table: table.to_string(),
            column: name.to_string(),
        })
}

impl FormTable {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let rdr = csv::Reader::from_path(path)?;
        Self::from_reader(rdr, &path.display().to_string())
    }

    /// Reads a form table. A leading column with an empty header is a row index and is
    /// dropped along with `code`; every other column is a feature.
    pub fn from_reader<R: std::io::Read>(mut rdr: csv::Reader<R>, table: &str) -> Result<Self> {
        let headers = rdr.headers()?.clone();
        let i_code = column(&headers, table, "code")?;
        let skip_index = headers.get(0).map_or(false, |h| h.trim().is_empty());

        let feature_indices = (0..headers.len())
            .filter(|&i| i != i_code && !(skip_index && i == 0))
            .collect::<Vec<usize>>();
        let columns = feature_indices
            .iter()
            .map(|&i| headers[i].trim().to_string())
            .collect();

        let mut records = Vec::new();
        for result in rdr.records() {
            let record = result?;
            records.push(FormRecord {
                code: record[i_code].trim().to_string(),
                features: feature_indices
                    .iter()
                    .map(|&i| Feature::parse(&record[i]))
                    .collect(),
            });
        }

        Ok(Self { columns, records })
    }

    pub fn codes(&self) -> BTreeSet<String> {
        self.records.iter().map(|r| r.code.clone()).collect()
    }

    /// The first record of `code`.
    pub fn record(&self, code: &str) -> Option<&FormRecord> {
        self.records.iter().find(|r| r.code == code)
    }
}

impl RatingsTable {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let rdr = csv::Reader::from_path(path)?;
        Self::from_reader(rdr, &path.display().to_string())
    }

    pub fn from_reader<R: std::io::Read>(mut rdr: csv::Reader<R>, table: &str) -> Result<Self> {
        let headers = rdr.headers()?.clone();
        let i_code = column(&headers, table, "code")?;
        let i_image = column(&headers, table, "img_name")?;
        let i_valence = column(&headers, table, "valence")?;
        let i_arousal = column(&headers, table, "arousal")?;

        let parse = |value: &str, name: &str, row: usize| {
            value.trim().parse::<f64>().map_err(|_| Error::InvalidValue {
                table: table.to_string(),
                row,
                column: name.to_string(),
                value: value.to_string(),
            })
        };

        let mut ratings = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let record = result?;
            ratings.push(Rating {
                code: record[i_code].trim().to_string(),
                image: record[i_image].trim().to_string(),
                valence: parse(&record[i_valence], "valence", row)?,
                arousal: parse(&record[i_arousal], "arousal", row)?,
            });
        }

        Ok(Self { ratings })
    }

    pub fn codes(&self) -> BTreeSet<String> {
        self.ratings.iter().map(|r| r.code.clone()).collect()
    }

    pub fn for_subject(&self, code: &str) -> Vec<&Rating> {
        self.ratings.iter().filter(|r| r.code == code).collect()
    }
}

/// Codes present in both tables and absent from `excluded`, sorted.
pub fn select_subjects(
    form: &FormTable,
    ratings: &RatingsTable,
    excluded: &[String],
) -> Vec<String> {
    let rated = ratings.codes();
    form.codes()
        .into_iter()
        .filter(|code| rated.contains(code))
        .filter(|code| !excluded.contains(code))
        .collect()
}
