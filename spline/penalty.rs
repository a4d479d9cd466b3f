use crate::basis::BasisError;
use ndarray::{Array2, s};

/// Default order of the difference penalty (second differences).
pub const DEFAULT_PENALTY_ORDER: usize = 2;

/// Builds the `(num_basis - order) x num_basis` matrix `D` of `order`-th forward
/// differences. Order zero is the identity.
pub fn difference_matrix(num_basis: usize, order: usize) -> Result<Array2<f64>, BasisError> {
    if order >= num_basis {
        return Err(BasisError::InvalidPenaltyOrder { order, num_basis });
    }

    let mut d = Array2::<f64>::eye(num_basis);
    // Each differencing pass removes one row.
    for _ in 0..order {
        d = &d.slice(s![1.., ..]) - &d.slice(s![..-1, ..]);
    }
    Ok(d)
}

/// Creates the P-spline roughness penalty `S = D' D` for `num_basis` coefficients,
/// penalizing the squared `order`-th differences of adjacent coefficients.
///
/// The result is symmetric positive semi-definite with a null space of dimension
/// `order` (polynomials of degree `order - 1` in the coefficient index). With
/// `order = 0` this is the identity, i.e. a plain ridge penalty.
pub fn difference_penalty(num_basis: usize, order: usize) -> Result<Array2<f64>, BasisError> {
    let d = difference_matrix(num_basis, order)?;
    Ok(d.t().dot(&d))
}
