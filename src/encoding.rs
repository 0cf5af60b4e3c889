//! Column transforms over the assembled info matrix.
use std::cmp::Ordering;
use std::fmt;

use ndarray::Array2;

use crate::error::{Error, Result};

/// A single form cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    Number(f64),
    Text(String),
}

impl Feature {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.parse::<f64>() {
            Ok(number) => Feature::Number(number),
            Err(_) => Feature::Text(value.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Feature::Number(n) => Some(*n),
            Feature::Text(_) => None,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Number(n) => write!(f, "{}", n),
            Feature::Text(s) => f.write_str(s),
        }
    }
}

/// Sorted-class label encoder, fitted on one column.
///
/// Numbers sort before text, numbers numerically and text lexicographically.
#[derive(Debug, Clone, Default)]
pub struct LabelEncoder {
    classes: Vec<Feature>,
}

fn class_order(a: &Feature, b: &Feature) -> Ordering {
    match (a, b) {
        (Feature::Number(x), Feature::Number(y)) => x.total_cmp(y),
        (Feature::Number(_), Feature::Text(_)) => Ordering::Less,
        (Feature::Text(_), Feature::Number(_)) => Ordering::Greater,
        (Feature::Text(x), Feature::Text(y)) => x.cmp(y),
    }
}

impl LabelEncoder {
    pub fn fit<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a Feature>,
    {
        let mut classes = values.into_iter().cloned().collect::<Vec<Feature>>();
        classes.sort_by(class_order);
        classes.dedup_by(|a, b| class_order(a, b) == Ordering::Equal);
        Self { classes }
    }

    pub fn classes(&self) -> &[Feature] {
        &self.classes
    }

    pub fn transform(&self, value: &Feature) -> Option<usize> {
        self.classes
            .binary_search_by(|class| class_order(class, value))
            .ok()
    }
}

/// Row-major info matrix: one row of form features per epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoMatrix {
    pub rows: Vec<Vec<Feature>>,
}

impl InfoMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_columns(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    fn check_column(&self, column: usize) -> Result<()> {
        if column >= self.num_columns() {
            return Err(Error::Config(format!(
                "feature column {} out of range ({} columns)",
                column,
                self.num_columns()
            )));
        }
        Ok(())
    }

    /// Replaces each listed column by its label-encoded integer codes.
    ///
    /// The encoder is fitted over the whole column, so codes are only stable within one
    /// assembled dataset.
    pub fn encode_categorical(&mut self, columns: &[usize]) -> Result<Vec<LabelEncoder>> {
        columns
            .iter()
            .map(|&column| {
                self.check_column(column)?;
                let encoder = LabelEncoder::fit(self.rows.iter().map(|r| &r[column]));
                for row in &mut self.rows {
                    let code = encoder.transform(&row[column]).ok_or_else(|| {
                        Error::Shape(format!("unfitted value in feature column {}", column))
                    })?;
                    row[column] = Feature::Number(code as f64);
                }
                Ok(encoder)
            })
            .collect()
    }

    /// Divides each listed column by `divisor`.
    pub fn scale(&mut self, columns: &[usize], divisor: f64) -> Result<()> {
        for &column in columns {
            self.check_column(column)?;
            for row in &mut self.rows {
                let value = row[column].as_number().ok_or_else(|| Error::NonNumericFeature {
                    column,
                    value: row[column].to_string(),
                })?;
                row[column] = Feature::Number(value / divisor);
            }
        }
        Ok(())
    }

    /// The matrix as numbers; fails on any text cell left unencoded.
    pub fn to_array(&self) -> Result<Array2<f64>> {
        let num_columns = self.num_columns();
        let mut out = Array2::zeros((self.len(), num_columns));
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != num_columns {
                return Err(Error::Shape(format!(
                    "info row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    num_columns
                )));
            }
            for (j, cell) in row.iter().enumerate() {
                out[[i, j]] = cell.as_number().ok_or_else(|| Error::NonNumericFeature {
                    column: j,
                    value: cell.to_string(),
                })?;
            }
        }
        Ok(out)
    }

    pub fn select(&self, indices: &[usize]) -> InfoMatrix {
        InfoMatrix {
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}
