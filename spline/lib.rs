#![deny(dead_code)]
#![deny(unused_imports)]

//! Penalized B-spline (P-spline) regression with automatic selection of the
//! smoothing parameter and the basis size by Generalized Cross-Validation.
//!
//! The pipeline runs strictly downward:
//! observations → [`knots`] → [`basis`] → [`penalty`] → [`pls`] → [`gcv`] →
//! [`search`] → [`model::SelectedModel`] → predictions.
//!
//! ```no_run
//! let points = [(0.0, 0.1), (1.0, 0.9), (2.0, 0.2), (3.0, 1.1), (4.0, 0.0), (5.0, 0.8)];
//! let model = gcvspline::fit(&points, 3, &[4, 5], &[0.01, 0.1, 1.0]).unwrap();
//! let curve = gcvspline::predict(&model, &[0.5, 1.5, 2.5]).unwrap();
//! assert_eq!(curve.len(), 3);
//! ```

pub mod basis;
pub mod config;
pub mod data;
pub mod gcv;
pub mod knots;
pub mod model;
pub mod penalty;
pub mod pls;
pub mod search;

pub use config::{BasisGrid, SearchConfig, SmoothingGrid};
pub use data::Dataset;
pub use knots::{KnotBoundary, KnotStrategy, KnotVector};
pub use model::{PredictError, SelectedModel};
pub use search::{FitError, SearchReport};

use ndarray::ArrayView1;

/// Fits a P-spline to `(x, y)` pairs, searching every combination of the given
/// basis sizes and smoothing parameters. Knot placement, penalty order and the
/// remaining options take their defaults from [`SearchConfig`].
pub fn fit(
    points: &[(f64, f64)],
    degree: usize,
    basis_candidates: &[usize],
    smoothing_candidates: &[f64],
) -> Result<SelectedModel, FitError> {
    let dataset = Dataset::from_pairs(points)?;
    let config = SearchConfig {
        degree,
        basis_sizes: BasisGrid::Explicit(basis_candidates.to_vec()),
        smoothing: SmoothingGrid::Explicit(smoothing_candidates.to_vec()),
        ..SearchConfig::default()
    };
    search::fit_dataset(&dataset, &config)
}

/// Evaluates a fitted model at `query_points`.
pub fn predict(model: &SelectedModel, query_points: &[f64]) -> Result<Vec<f64>, PredictError> {
    let predictions = model.predict(ArrayView1::from(query_points))?;
    Ok(predictions.to_vec())
}
