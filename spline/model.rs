use crate::basis::{self, BasisError};
use crate::knots::KnotVector;
use crate::pls::PenalizedFit;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Query point {index} is not finite: {value}")]
    NonFiniteQuery { index: usize, value: f64 },

    #[error("The model is internally inconsistent: {0}")]
    MalformedModel(String),

    #[error("Basis evaluation failed: {0}")]
    Basis(#[from] BasisError),
}

/// The GCV-optimal fit. Self-contained: it keeps the knots and coefficients it
/// needs for prediction and a summary of the selection, but nothing from the
/// training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedModel {
    knots: KnotVector,
    coefficients: Array1<f64>,
    lambda: f64,
    basis_size: usize,
    penalty_order: usize,
    gcv: f64,
    rss: f64,
    edf: f64,
    num_observations: usize,
    x_range: (f64, f64),
}

impl SelectedModel {
    pub(crate) fn from_fit(
        knots: KnotVector,
        penalty_order: usize,
        fit: &PenalizedFit,
        gcv: f64,
        x_range: (f64, f64),
    ) -> Self {
        Self {
            knots,
            coefficients: fit.coefficients.clone(),
            lambda: fit.lambda,
            basis_size: fit.basis_size,
            penalty_order,
            gcv,
            rss: fit.rss,
            edf: fit.edf,
            num_observations: fit.num_observations(),
            x_range,
        }
    }

    /// Evaluates the fitted curve at each query point. Points outside the
    /// observed range are extrapolated with the boundary polynomial pieces.
    pub fn predict(&self, query: ArrayView1<f64>) -> Result<Array1<f64>, PredictError> {
        if let Some((index, &value)) = query.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(PredictError::NonFiniteQuery { index, value });
        }
        self.check_consistency()?;

        let basis = basis::basis_matrix(&self.knots, query)?;
        Ok(basis.dot(&self.coefficients))
    }

    /// Evaluates the curve at `num_points` evenly spaced points spanning the
    /// observed x-range. Returns `(grid, predictions)`.
    pub fn predict_grid(&self, num_points: usize) -> Result<(Array1<f64>, Array1<f64>), PredictError> {
        let (lo, hi) = self.x_range;
        let grid = Array1::linspace(lo, hi, num_points);
        let predictions = self.predict(grid.view())?;
        Ok((grid, predictions))
    }

    /// Only reachable through deserialized models. The knot vector validates
    /// itself on deserialization; the coefficients are checked against it here.
    fn check_consistency(&self) -> Result<(), PredictError> {
        if self.coefficients.len() != self.knots.num_basis() {
            return Err(PredictError::MalformedModel(format!(
                "{} coefficients for a basis of size {}",
                self.coefficients.len(),
                self.knots.num_basis()
            )));
        }
        if self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(PredictError::MalformedModel(
                "non-finite coefficient".to_string(),
            ));
        }
        Ok(())
    }

    pub fn knots(&self) -> &KnotVector {
        &self.knots
    }

    pub fn degree(&self) -> usize {
        self.knots.degree()
    }

    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coefficients.view()
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn basis_size(&self) -> usize {
        self.basis_size
    }

    pub fn penalty_order(&self) -> usize {
        self.penalty_order
    }

    pub fn gcv(&self) -> f64 {
        self.gcv
    }

    pub fn rss(&self) -> f64 {
        self.rss
    }

    /// Effective degrees of freedom, `tr(S)`.
    pub fn edf(&self) -> f64 {
        self.edf
    }

    pub fn num_observations(&self) -> usize {
        self.num_observations
    }

    pub fn x_range(&self) -> (f64, f64) {
        self.x_range
    }
}
