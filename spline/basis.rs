use crate::knots::KnotVector;
use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

/// Knot spans narrower than this are treated as zero-width.
const ZERO_SPAN: f64 = 1e-12;

/// A comprehensive error type for knot placement, basis evaluation and penalty construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BasisError {
    #[error("Basis size {basis_size} is invalid for a degree-{degree} spline: {reason}.")]
    InvalidBasisSize {
        basis_size: usize,
        degree: usize,
        reason: String,
    },

    #[error("The x domain [{lo}, {hi}] is degenerate; at least two distinct x values are required.")]
    DegenerateDomain { lo: f64, hi: f64 },

    #[error("Cannot place knots without any observations.")]
    EmptyData,

    #[error("Invalid knot vector: {0}.")]
    InvalidKnotVector(String),

    #[error("Non-finite value in {what} at position {index}.")]
    NonFinite { what: &'static str, index: usize },

    #[error("Penalty order ({order}) must be less than the number of basis functions ({num_basis}).")]
    InvalidPenaltyOrder { order: usize, num_basis: usize },
}

/// Evaluates every basis function defined by `knots` at each of `points`.
///
/// Returns the design matrix of shape `[points.len(), knots.num_basis()]`, where
/// entry `(i, j)` is the j-th B-spline evaluated at `points[i]`. Inside the knot
/// domain the entries are non-negative and every row sums to one.
///
/// Points outside the domain are evaluated on the polynomial piece of the nearest
/// boundary span. This never fails, but the curve there is an extrapolation with
/// no accuracy guarantee.
pub fn basis_matrix(knots: &KnotVector, points: ArrayView1<f64>) -> Result<Array2<f64>, BasisError> {
    if let Some(index) = points.iter().position(|v| !v.is_finite()) {
        return Err(BasisError::NonFinite {
            what: "evaluation points",
            index,
        });
    }

    let num_basis = knots.num_basis();
    let degree = knots.degree();
    let mut matrix = Array2::zeros((points.len(), num_basis));

    // Each row only has `degree + 1` non-zero entries, starting at `span - degree`.
    let mut local = vec![0.0; degree + 1];
    let mut left = vec![0.0; degree + 1];
    let mut right = vec![0.0; degree + 1];
    for (i, &x) in points.iter().enumerate() {
        let span = internal::find_span(x, knots);
        internal::nonzero_basis(x, span, degree, knots.view(), &mut local, &mut left, &mut right);
        let mut row = matrix.row_mut(i);
        for (offset, &value) in local.iter().enumerate() {
            row[span - degree + offset] = value;
        }
    }

    Ok(matrix)
}

/// Evaluates all basis functions at a single point. Shorthand for a one-row [`basis_matrix`].
pub fn evaluate_point(knots: &KnotVector, x: f64) -> Result<Array1<f64>, BasisError> {
    let matrix = basis_matrix(knots, ArrayView1::from(std::slice::from_ref(&x)))?;
    Ok(matrix.row(0).to_owned())
}

mod internal {
    use super::*;

    /// Finds the span index `mu` in `[degree, num_basis - 1]` whose interval
    /// `[knots[mu], knots[mu + 1])` has positive width and is the one to use for `x`.
    ///
    /// The right end of the domain belongs to the last non-empty span, and points
    /// beyond either end are assigned to the outermost non-empty span.
    pub(super) fn find_span(x: f64, knots: &KnotVector) -> usize {
        let t = knots.view();
        let degree = knots.degree();
        let last = knots.num_basis() - 1;
        let (lo, hi) = knots.domain();

        if x >= hi {
            return (degree..=last)
                .rev()
                .find(|&mu| t[mu + 1] > t[mu])
                .unwrap_or(last);
        }
        if x < lo {
            return (degree..=last)
                .find(|&mu| t[mu + 1] > t[mu])
                .unwrap_or(degree);
        }
        // knots[degree] <= x < knots[last + 1], so the last knot <= x in this
        // range always starts a span of positive width.
        (degree..=last).rev().find(|&mu| t[mu] <= x).unwrap_or(degree)
    }

    /// Cox-de Boor triangular scheme: fills `out[0..=degree]` with the values of
    /// the basis functions `span - degree ..= span` at `x`.
    ///
    /// `left[j] = x - t[span + 1 - j]`, `right[j] = t[span + j] - x`; a zero-width
    /// denominator contributes nothing.
    pub(super) fn nonzero_basis(
        x: f64,
        span: usize,
        degree: usize,
        t: ArrayView1<f64>,
        out: &mut [f64],
        left: &mut [f64],
        right: &mut [f64],
    ) {
        out.fill(0.0);
        out[0] = 1.0;
        for j in 1..=degree {
            left[j] = x - t[span + 1 - j];
            right[j] = t[span + j] - x;
            let mut saved = 0.0;
            for r in 0..j {
                let denom = right[r + 1] + left[j - r];
                let temp = if denom.abs() > ZERO_SPAN {
                    out[r] / denom
                } else {
                    0.0
                };
                out[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            out[j] = saved;
        }
    }
}
