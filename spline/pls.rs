//! # Penalized Least Squares
//!
//! Solves the ridge-type problem
//!
//! ```text
//! c = argmin ||y - B c||^2 + lambda * c' P c  =  (B'B + lambda P)^-1 B'y
//! ```
//!
//! through a Cholesky factorization of the penalized normal matrix. Alongside the
//! coefficients it reports the residual sum of squares and the effective degrees
//! of freedom `trace(S)`, where `S = B (B'B + lambda P)^-1 B'` is the smoother
//! ("hat") matrix. Both feed the GCV criterion.
//!
//! `lambda = 0` is ordinary least squares on the same basis; no special case is
//! taken for it.

use crate::search::FitError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::cholesky::{CholeskyFactorized, FactorizeC, InverseC, SolveC};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{OperationNorm, UPLO};

/// Penalized systems whose 1-norm reciprocal condition number falls below this
/// are treated as singular.
pub const RCOND_FLOOR: f64 = 1e-12;

/// The result of one penalized fit for a fixed basis and smoothing parameter.
#[derive(Debug, Clone)]
pub struct PenalizedFit {
    /// Spline coefficients, one per basis function.
    pub coefficients: Array1<f64>,
    /// `B c` at the training points.
    pub fitted: Array1<f64>,
    /// `y - B c`.
    pub residuals: Array1<f64>,
    /// Residual sum of squares.
    pub rss: f64,
    /// Effective degrees of freedom, `trace(S)`.
    pub edf: f64,
    pub lambda: f64,
    pub basis_size: usize,
}

impl PenalizedFit {
    pub fn num_observations(&self) -> usize {
        self.fitted.len()
    }
}

/// Fits coefficients for a fixed smoothing parameter.
///
/// # Arguments
/// * `basis`: the `n x k` design matrix `B`.
/// * `y`: the `n` targets.
/// * `penalty`: the `k x k` penalty matrix `P`.
/// * `lambda`: the smoothing parameter, finite and non-negative.
///
/// # Errors
/// `ShapeMismatch` or `InvalidSmoothing` on bad inputs; `SingularSystem` if
/// `B'B + lambda P` cannot be factorized or is too ill-conditioned to trust.
pub fn fit_penalized(
    basis: ArrayView2<f64>,
    y: ArrayView1<f64>,
    penalty: ArrayView2<f64>,
    lambda: f64,
) -> Result<PenalizedFit, FitError> {
    internal::validate_shapes(basis, y, penalty, lambda)?;
    let k = basis.ncols();

    let gram = basis.t().dot(&basis);
    let system = &gram + &(&penalty * lambda);
    let (factor, inverse) = internal::factorize_and_invert(&system, lambda)?;

    let rhs = basis.t().dot(&y);
    let coefficients = factor
        .solvec(&rhs)
        .map_err(|e| internal::singular(k, lambda, format!("back-substitution failed: {e}")))?;

    // trace(B A^-1 B') = trace(A^-1 B'B); both factors are symmetric, so the
    // trace of the product is the sum of their elementwise product.
    let edf = (&inverse * &gram).sum();

    let fitted = basis.dot(&coefficients);
    let residuals = &y - &fitted;
    let rss = residuals.dot(&residuals);

    if !rss.is_finite() || !edf.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
        return Err(internal::singular(k, lambda, "non-finite solution".to_string()));
    }

    log::trace!("PLS fit k={k}, lambda={lambda:.3e}: rss={rss:.6e}, edf={edf:.4}");

    Ok(PenalizedFit {
        coefficients,
        fitted,
        residuals,
        rss,
        edf,
        lambda,
        basis_size: k,
    })
}

/// Builds the full `n x n` smoother matrix `S = B (B'B + lambda P)^-1 B'`.
/// Its trace is the `edf` reported by [`fit_penalized`].
pub fn smoother_matrix(
    basis: ArrayView2<f64>,
    penalty: ArrayView2<f64>,
    lambda: f64,
) -> Result<Array2<f64>, FitError> {
    let zeros = Array1::zeros(basis.nrows());
    internal::validate_shapes(basis, zeros.view(), penalty, lambda)?;

    let system = &basis.t().dot(&basis) + &(&penalty * lambda);
    let (_, inverse) = internal::factorize_and_invert(&system, lambda)?;
    Ok(basis.dot(&inverse).dot(&basis.t()))
}

mod internal {
    use super::*;
    use ndarray::OwnedRepr;

    pub(super) fn singular(basis_size: usize, lambda: f64, reason: String) -> FitError {
        FitError::SingularSystem {
            basis_size,
            lambda,
            reason,
        }
    }

    pub(super) fn validate_shapes(
        basis: ArrayView2<f64>,
        y: ArrayView1<f64>,
        penalty: ArrayView2<f64>,
        lambda: f64,
    ) -> Result<(), FitError> {
        let (n, k) = basis.dim();
        if y.len() != n {
            return Err(FitError::ShapeMismatch(format!(
                "basis has {n} rows but the target vector has {} entries",
                y.len()
            )));
        }
        if penalty.dim() != (k, k) {
            return Err(FitError::ShapeMismatch(format!(
                "basis has {k} columns but the penalty is {}x{}",
                penalty.nrows(),
                penalty.ncols()
            )));
        }
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(FitError::InvalidSmoothing(lambda));
        }
        Ok(())
    }

    /// Cholesky-factorizes and inverts the penalized normal matrix `system`,
    /// rejecting it when it is not positive definite or when its reciprocal
    /// condition number falls below `RCOND_FLOOR`.
    pub(super) fn factorize_and_invert(
        system: &Array2<f64>,
        lambda: f64,
    ) -> Result<(CholeskyFactorized<OwnedRepr<f64>>, Array2<f64>), FitError> {
        let k = system.nrows();
        let factor = system
            .factorizec(UPLO::Lower)
            .map_err(|e| singular(k, lambda, format!("Cholesky factorization failed: {e}")))?;
        let inverse = factor
            .invc()
            .map_err(|e| singular(k, lambda, format!("inversion failed: {e}")))?;

        let rcond = reciprocal_condition(system, &inverse)
            .map_err(|e| singular(k, lambda, format!("norm evaluation failed: {e}")))?;
        if !(rcond >= RCOND_FLOOR) {
            return Err(singular(
                k,
                lambda,
                format!("reciprocal condition number {rcond:.3e} is below {RCOND_FLOOR:.0e}"),
            ));
        }
        Ok((factor, inverse))
    }

    /// `1 / (||A||_1 * ||A^-1||_1)`, the exact 1-norm reciprocal condition
    /// number given an accurate inverse.
    pub(super) fn reciprocal_condition(
        system: &Array2<f64>,
        inverse: &Array2<f64>,
    ) -> Result<f64, LinalgError> {
        let cond = system.opnorm_one()? * inverse.opnorm_one()?;
        Ok(if cond.is_finite() && cond > 0.0 { 1.0 / cond } else { 0.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::basis_matrix;
    use crate::knots::{KnotBoundary, KnotStrategy, place_knots};
    use crate::penalty::difference_penalty;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, array};
    use ndarray_linalg::Solve;

    fn wavy_problem(n: usize, k: usize) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
        let x = Array::linspace(0.0, 1.0, n);
        let y = x.mapv(|v: f64| (6.0 * v).sin() + 0.1 * (37.0 * v).cos());
        let knots =
            place_knots(x.view(), k, 3, KnotStrategy::Uniform, KnotBoundary::Clamped).unwrap();
        let basis = basis_matrix(&knots, x.view()).unwrap();
        let penalty = difference_penalty(k, 2).unwrap();
        (basis, y, penalty)
    }

    #[test]
    fn zero_lambda_is_ordinary_least_squares() {
        let (basis, y, penalty) = wavy_problem(40, 8);
        let fit = fit_penalized(basis.view(), y.view(), penalty.view(), 0.0).unwrap();

        let normal = basis.t().dot(&basis);
        let ols = normal.solve(&basis.t().dot(&y)).unwrap();
        for (a, b) in fit.coefficients.iter().zip(ols.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
        // OLS edf is the number of columns.
        assert_abs_diff_eq!(fit.edf, 8.0, epsilon = 1e-8);
    }

    #[test]
    fn edf_matches_smoother_trace() {
        let (basis, y, penalty) = wavy_problem(30, 10);
        let lambda = 0.5;
        let fit = fit_penalized(basis.view(), y.view(), penalty.view(), lambda).unwrap();
        let s = smoother_matrix(basis.view(), penalty.view(), lambda).unwrap();
        assert_eq!(s.shape(), &[30, 30]);
        assert_abs_diff_eq!(s.diag().sum(), fit.edf, epsilon = 1e-9);

        let fitted_via_s = s.dot(&y);
        for (a, b) in fitted_via_s.iter().zip(fit.fitted.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn heavy_smoothing_approaches_null_space_dimension() {
        let (basis, y, penalty) = wavy_problem(50, 12);
        let light = fit_penalized(basis.view(), y.view(), penalty.view(), 1e-6).unwrap();
        let heavy = fit_penalized(basis.view(), y.view(), penalty.view(), 1e8).unwrap();
        assert!(heavy.edf < light.edf);
        // A second-order penalty leaves straight lines unpenalized.
        assert!(heavy.edf > 1.9 && heavy.edf < 2.1, "edf = {}", heavy.edf);
        assert!(heavy.rss > light.rss);
    }

    #[test]
    fn residuals_are_consistent() {
        let (basis, y, penalty) = wavy_problem(25, 7);
        let fit = fit_penalized(basis.view(), y.view(), penalty.view(), 0.1).unwrap();
        assert_eq!(fit.num_observations(), 25);
        assert_eq!(fit.basis_size, 7);
        assert_abs_diff_eq!(fit.rss, fit.residuals.dot(&fit.residuals), epsilon = 1e-14);
        for i in 0..25 {
            assert_abs_diff_eq!(fit.fitted[i] + fit.residuals[i], y[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn rank_deficient_system_is_singular() {
        // Two distinct x values cannot determine five coefficients without a penalty.
        let x = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let y = array![0.0, 0.1, -0.1, 1.0, 1.1, 0.9];
        let knots =
            place_knots(x.view(), 5, 3, KnotStrategy::Uniform, KnotBoundary::Clamped).unwrap();
        let basis = basis_matrix(&knots, x.view()).unwrap();
        let penalty = difference_penalty(5, 2).unwrap();

        match fit_penalized(basis.view(), y.view(), penalty.view(), 0.0) {
            Err(FitError::SingularSystem {
                basis_size, lambda, ..
            }) => {
                assert_eq!(basis_size, 5);
                assert_eq!(lambda, 0.0);
            }
            other => panic!("Expected SingularSystem, got {other:?}"),
        }
        // The penalty's null space (lines) is pinned down by the two x values.
        assert!(fit_penalized(basis.view(), y.view(), penalty.view(), 1.0).is_ok());
    }

    #[test]
    fn reciprocal_condition_of_known_matrices() {
        let identity = Array2::<f64>::eye(4);
        assert_abs_diff_eq!(
            internal::reciprocal_condition(&identity, &identity).unwrap(),
            1.0,
            epsilon = 1e-15
        );
        let scaled = array![[1.0, 0.0], [0.0, 1e-6]];
        let inverse = array![[1.0, 0.0], [0.0, 1e6]];
        assert_abs_diff_eq!(
            internal::reciprocal_condition(&scaled, &inverse).unwrap(),
            1e-6,
            epsilon = 1e-18
        );
    }

    #[test]
    fn ill_conditioned_system_is_singular() {
        // Two columns that differ by 1e-9 are collinear for all practical
        // purposes, even though the Cholesky factorization itself succeeds.
        let basis = array![
            [1.0, 1.0],
            [1.0, 1.0 + 1e-9],
            [0.5, 0.5],
            [2.0, 2.0 - 1e-9]
        ];
        let y = array![1.0, 2.0, 0.5, 1.5];
        let penalty = Array2::<f64>::zeros((2, 2));
        assert!(matches!(
            fit_penalized(basis.view(), y.view(), penalty.view(), 0.0),
            Err(FitError::SingularSystem { basis_size: 2, .. })
        ));
        // A ridge penalty restores a well-conditioned system.
        let ridge = Array2::<f64>::eye(2);
        assert!(fit_penalized(basis.view(), y.view(), ridge.view(), 1.0).is_ok());
    }

    #[test]
    fn rejects_bad_inputs() {
        let (basis, y, penalty) = wavy_problem(20, 6);
        assert!(matches!(
            fit_penalized(basis.view(), y.view(), penalty.view(), -1.0),
            Err(FitError::InvalidSmoothing(_))
        ));
        assert!(matches!(
            fit_penalized(basis.view(), y.view(), penalty.view(), f64::NAN),
            Err(FitError::InvalidSmoothing(_))
        ));
        let short_y = Array1::zeros(19);
        assert!(matches!(
            fit_penalized(basis.view(), short_y.view(), penalty.view(), 1.0),
            Err(FitError::ShapeMismatch(_))
        ));
        let wrong_penalty = difference_penalty(5, 2).unwrap();
        assert!(matches!(
            fit_penalized(basis.view(), y.view(), wrong_penalty.view(), 1.0),
            Err(FitError::ShapeMismatch(_))
        ));
    }
}
