use crate::basis::BasisError;
use ndarray::{Array, Array1, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Defines the strategy for placing the interior knots of a spline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnotStrategy {
    /// Place knots uniformly across the observed x range.
    Uniform,
    /// Place knots at the quantiles of the observed x values.
    /// This adapts to the data's distribution and is the default for fitting.
    #[default]
    Quantile,
}

/// Defines how the knot vector is closed off at the two ends of the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnotBoundary {
    /// Repeat each boundary knot `degree + 1` times (open/clamped knot vector).
    #[default]
    Clamped,
    /// Continue the outermost interior spacing for `degree` knots beyond each
    /// boundary, so every knot is simple.
    Extended,
}

/// An ordered knot sequence together with the spline degree it was built for.
///
/// Invariants, enforced by [`KnotVector::new`]:
/// * every knot is finite and the sequence is non-decreasing;
/// * there are at least `2 * (degree + 1)` knots, so `num_basis() >= degree + 1`;
/// * the domain `knots[degree]..knots[num_basis]` has positive width.
///
/// Deserialization goes through the same checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawKnotVector")]
pub struct KnotVector {
    knots: Array1<f64>,
    degree: usize,
}

#[derive(Deserialize)]
struct RawKnotVector {
    knots: Array1<f64>,
    degree: usize,
}

impl TryFrom<RawKnotVector> for KnotVector {
    type Error = BasisError;

    fn try_from(raw: RawKnotVector) -> Result<Self, Self::Error> {
        KnotVector::new(raw.knots, raw.degree)
    }
}

impl KnotVector {
    /// Validates and wraps a raw knot sequence.
    pub fn new(knots: Array1<f64>, degree: usize) -> Result<Self, BasisError> {
        if let Some(pos) = knots.iter().position(|k| !k.is_finite()) {
            return Err(BasisError::NonFinite {
                what: "knot vector",
                index: pos,
            });
        }
        let min_len = degree.saturating_add(1).saturating_mul(2);
        if knots.len() < min_len {
            return Err(BasisError::InvalidKnotVector(format!(
                "degree {degree} requires at least {min_len} knots, found {}",
                knots.len()
            )));
        }
        if let Some(pos) = knots.windows(2).into_iter().position(|w| w[1] < w[0]) {
            return Err(BasisError::InvalidKnotVector(format!(
                "knots decrease between positions {pos} and {}",
                pos + 1
            )));
        }

        let num_basis = knots.len() - degree - 1;
        let (lo, hi) = (knots[degree], knots[num_basis]);
        if lo >= hi {
            return Err(BasisError::DegenerateDomain { lo, hi });
        }
        Ok(Self { knots, degree })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of B-spline basis functions: `len - degree - 1`.
    pub fn num_basis(&self) -> usize {
        self.knots.len() - self.degree - 1
    }

    /// The interval on which the basis forms a partition of unity.
    pub fn domain(&self) -> (f64, f64) {
        (self.knots[self.degree], self.knots[self.num_basis()])
    }

    pub fn len(&self) -> usize {
        self.knots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    pub fn view(&self) -> ArrayView1<'_, f64> {
        self.knots.view()
    }
}

/// Builds the knot vector for a basis of `basis_size` functions of the given
/// `degree` over the observed `x` values.
///
/// The result always has `basis_size + degree + 1` knots and its domain is
/// exactly `[min(x), max(x)]`.
///
/// # Errors
/// * `InvalidBasisSize` if `basis_size < degree + 1`.
/// * `DegenerateDomain` if `x` has a single distinct value, `EmptyData` if it is empty.
/// * `NonFinite` if any `x` is NaN or infinite.
pub fn place_knots(
    x: ArrayView1<f64>,
    basis_size: usize,
    degree: usize,
    strategy: KnotStrategy,
    boundary: KnotBoundary,
) -> Result<KnotVector, BasisError> {
    if basis_size < degree + 1 {
        return Err(BasisError::InvalidBasisSize {
            basis_size,
            degree,
            reason: format!("a degree-{degree} basis needs at least {} functions", degree + 1),
        });
    }
    if x.is_empty() {
        return Err(BasisError::EmptyData);
    }
    if let Some(index) = x.iter().position(|v| !v.is_finite()) {
        return Err(BasisError::NonFinite {
            what: "x values",
            index,
        });
    }

    let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if lo >= hi {
        return Err(BasisError::DegenerateDomain { lo, hi });
    }

    let num_interior = basis_size - degree - 1;
    let interior = match strategy {
        KnotStrategy::Uniform => internal::uniform_interior(lo, hi, num_interior),
        KnotStrategy::Quantile => internal::quantiles(x, num_interior),
    };

    let knots = match boundary {
        KnotBoundary::Clamped => {
            let lower = Array1::from_elem(degree + 1, lo);
            let upper = Array1::from_elem(degree + 1, hi);
            ndarray::concatenate(Axis(0), &[lower.view(), interior.view(), upper.view()])
                .map_err(|e| BasisError::InvalidKnotVector(e.to_string()))?
        }
        KnotBoundary::Extended => internal::extend_boundaries(lo, hi, interior.view(), degree),
    };

    log::trace!(
        "Placed {} knots for basis size {basis_size}, degree {degree}: {:?}",
        knots.len(),
        knots.to_vec()
    );
    KnotVector::new(knots, degree)
}

mod internal {
    use super::*;

    pub(super) fn uniform_interior(lo: f64, hi: f64, count: usize) -> Array1<f64> {
        let h = (hi - lo) / (count as f64 + 1.0);
        Array::from_iter((1..=count).map(|i| lo + i as f64 * h))
    }

    /// Quantiles at probabilities j/(count+1), j = 1..count, with linear
    /// interpolation between order statistics (Type 7 in R).
    pub(super) fn quantiles(data: ArrayView1<f64>, count: usize) -> Array1<f64> {
        if count == 0 {
            return Array1::from_vec(vec![]);
        }

        let mut sorted = data.to_vec();
        sorted.sort_unstable_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        (1..=count)
            .map(|j| {
                let p = j as f64 / (count as f64 + 1.0);
                let float_idx = (n as f64 - 1.0) * p;
                let lower = float_idx.floor() as usize;
                let upper = float_idx.ceil() as usize;
                if lower == upper {
                    sorted[lower]
                } else {
                    let fraction = float_idx - lower as f64;
                    sorted[lower] * (1.0 - fraction) + sorted[upper] * fraction
                }
            })
            .collect()
    }

    /// `[lo - d*h0, .., lo - h0, lo, interior.., hi, hi + h1, .., hi + d*h1]`
    /// where `h0`/`h1` are the first and last gaps of `[lo, interior.., hi]`.
    pub(super) fn extend_boundaries(
        lo: f64,
        hi: f64,
        interior: ArrayView1<f64>,
        degree: usize,
    ) -> Array1<f64> {
        let first_inner = interior.first().copied().unwrap_or(hi);
        let last_inner = interior.last().copied().unwrap_or(lo);
        let spacing_start = first_inner - lo;
        let spacing_end = hi - last_inner;

        let mut knots = Vec::with_capacity(interior.len() + 2 * degree + 2);
        knots.extend((1..=degree).rev().map(|i| lo - i as f64 * spacing_start));
        knots.push(lo);
        knots.extend(interior.iter().copied());
        knots.push(hi);
        knots.extend((1..=degree).map(|i| hi + i as f64 * spacing_end));
        Array1::from_vec(knots)
    }
}
