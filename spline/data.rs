//! # Data Loading and Validation Module
//!
//! The [`Dataset`] type is how observations enter the regression core. Files on
//! disk are read here as well, with a strict schema:
//!
//! - Observations: delimited text with the columns `t` (the x coordinate) and
//!   `y_observed`. Other columns are ignored.
//! - Query points: delimited text with a `t` column.
//!
//! Failures are assumed to be user-input errors, so `DataError` says which row
//! and column is at fault.

use ndarray::{Array1, ArrayView1};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to read delimited data: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The required column '{0}' was not found in the input file. Please check spelling and case.")]
    ColumnNotFound(&'static str),
    #[error("Non-finite value (NaN or Infinity) in column '{column}' at data row {row}.")]
    NonFiniteValue { column: &'static str, row: usize },
    #[error("x and y must have the same length, found {x_len} and {y_len}.")]
    LengthMismatch { x_len: usize, y_len: usize },
    #[error("The input contains no observations.")]
    Empty,
}

/// An ordered set of `(x, y)` observations, all finite.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Array1<f64>,
    y: Array1<f64>,
}

impl Dataset {
    pub fn new(x: Array1<f64>, y: Array1<f64>) -> Result<Self, DataError> {
        if x.len() != y.len() {
            return Err(DataError::LengthMismatch {
                x_len: x.len(),
                y_len: y.len(),
            });
        }
        if x.is_empty() {
            return Err(DataError::Empty);
        }
        internal::validate_is_finite(x.view(), "x")?;
        internal::validate_is_finite(y.view(), "y")?;
        Ok(Self { x, y })
    }

    pub fn from_pairs(points: &[(f64, f64)]) -> Result<Self, DataError> {
        let x = points.iter().map(|&(x, _)| x).collect();
        let y = points.iter().map(|&(_, y)| y).collect();
        Self::new(x, y)
    }

    pub fn x(&self) -> ArrayView1<'_, f64> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView1<'_, f64> {
        self.y.view()
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// `(min x, max x)`.
    pub fn x_range(&self) -> (f64, f64) {
        let min_val = self.x.iter().copied().fold(f64::INFINITY, f64::min);
        let max_val = self.x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (min_val, max_val)
    }
}

/// Loads observations from a file with `t` and `y_observed` columns. The delimiter
/// is a tab for `.tsv` files and a comma otherwise.
pub fn load_observations(path: impl AsRef<Path>) -> Result<Dataset, DataError> {
    #[derive(Deserialize)]
    struct Record {
        t: f64,
        y_observed: f64,
    }

    let mut reader = internal::open(path.as_ref())?;
    internal::require_columns(&mut reader, &["t", "y_observed"])?;

    let mut x = Vec::new();
    let mut y = Vec::new();
    for (row, record) in reader.deserialize::<Record>().enumerate() {
        let record = record?;
        if !record.t.is_finite() {
            return Err(DataError::NonFiniteValue { column: "t", row: row + 1 });
        }
        if !record.y_observed.is_finite() {
            return Err(DataError::NonFiniteValue {
                column: "y_observed",
                row: row + 1,
            });
        }
        x.push(record.t);
        y.push(record.y_observed);
    }
    log::info!("Loaded {} observations from {}", x.len(), path.as_ref().display());
    Dataset::new(Array1::from_vec(x), Array1::from_vec(y))
}

/// Loads query points from a file with a `t` column.
pub fn load_query_points(path: impl AsRef<Path>) -> Result<Array1<f64>, DataError> {
    #[derive(Deserialize)]
    struct Record {
        t: f64,
    }

    let mut reader = internal::open(path.as_ref())?;
    internal::require_columns(&mut reader, &["t"])?;

    let mut points = Vec::new();
    for (row, record) in reader.deserialize::<Record>().enumerate() {
        let record = record?;
        if !record.t.is_finite() {
            return Err(DataError::NonFiniteValue { column: "t", row: row + 1 });
        }
        points.push(record.t);
    }
    if points.is_empty() {
        return Err(DataError::Empty);
    }
    Ok(Array1::from_vec(points))
}

mod internal {
    use super::*;
    use std::fs::File;

    pub(super) fn validate_is_finite(
        values: ArrayView1<f64>,
        column: &'static str,
    ) -> Result<(), DataError> {
        match values.iter().position(|v| !v.is_finite()) {
            Some(pos) => Err(DataError::NonFiniteValue {
                column,
                row: pos + 1,
            }),
            None => Ok(()),
        }
    }

    pub(super) fn open(path: &Path) -> Result<csv::Reader<File>, DataError> {
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
            _ => b',',
        };
        let file = File::open(path)?;
        Ok(csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(file))
    }

    pub(super) fn require_columns(
        reader: &mut csv::Reader<File>,
        columns: &[&'static str],
    ) -> Result<(), DataError> {
        let headers = reader.headers()?;
        for &column in columns {
            if !headers.iter().any(|h| h == column) {
                return Err(DataError::ColumnNotFound(column));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::fs;

    #[test]
    fn dataset_validation() {
        assert!(Dataset::from_pairs(&[(0.0, 1.0), (1.0, 2.0)]).is_ok());
        assert!(matches!(Dataset::from_pairs(&[]), Err(DataError::Empty)));
        assert!(matches!(
            Dataset::new(array![0.0, 1.0], array![1.0]),
            Err(DataError::LengthMismatch { x_len: 2, y_len: 1 })
        ));
        assert!(matches!(
            Dataset::from_pairs(&[(0.0, 1.0), (1.0, f64::NAN)]),
            Err(DataError::NonFiniteValue { column: "y", row: 2 })
        ));
    }

    #[test]
    fn x_range_ignores_order() {
        let data = Dataset::from_pairs(&[(3.0, 0.0), (-1.0, 0.0), (2.0, 0.0)]).unwrap();
        assert_eq!(data.x_range(), (-1.0, 3.0));
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn loads_csv_with_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulated_data.csv");
        fs::write(&path, "id,t,y_observed\n1,0.0,0.5\n2,0.5, -0.25\n3,1.0,1e-1\n").unwrap();

        let data = load_observations(&path).unwrap();
        assert_eq!(data.x().to_vec(), vec![0.0, 0.5, 1.0]);
        assert_eq!(data.y().to_vec(), vec![0.5, -0.25, 0.1]);
    }

    #[test]
    fn loads_tsv_query_points() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.tsv");
        fs::write(&path, "t\n0.25\n0.75\n").unwrap();
        assert_eq!(load_query_points(&path).unwrap().to_vec(), vec![0.25, 0.75]);
    }

    #[test]
    fn missing_column_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "t,y\n0.0,1.0\n").unwrap();
        match load_observations(&path) {
            Err(DataError::ColumnNotFound(column)) => assert_eq!(column, "y_observed"),
            other => panic!("Expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_and_non_finite_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let text_path = dir.path().join("text.csv");
        fs::write(&text_path, "t,y_observed\n0.0,abc\n").unwrap();
        assert!(matches!(load_observations(&text_path), Err(DataError::CsvError(_))));

        let nan_path = dir.path().join("nan.csv");
        fs::write(&nan_path, "t,y_observed\n0.0,1.0\nNaN,2.0\n").unwrap();
        assert!(matches!(
            load_observations(&nan_path),
            Err(DataError::NonFiniteValue { column: "t", row: 2 })
        ));
    }
}
