//! # Hyperparameter Search via Generalized Cross-Validation
//!
//! This module orchestrates model selection. For every candidate basis size `k`
//! it builds the knot vector, the design matrix and the difference penalty once,
//! then fits every candidate smoothing parameter `lambda` against them:
//!
//! 1.  **Grid evaluation:** each `(k, lambda)` pair runs the penalized fitter and
//!     the GCV scorer. Pairs are independent and are evaluated on the rayon pool
//!     when `SearchConfig::parallel` is set.
//!
//! 2.  **Selection:** the lowest GCV is found first. Every candidate within
//!     `tie_tolerance` (relative) of that minimum is tied with it, and the
//!     simplest of them wins: smaller `k` first, then larger `lambda`. Parallel
//!     and sequential runs therefore always select the same model.
//!
//! 3.  **Refinement (optional):** BFGS over `log(lambda)` for the winning `k`,
//!     started from the winning `lambda`. The refined fit is only kept if it has a
//!     strictly lower GCV.
//!
//! Per-candidate numerical failures (`SingularSystem`, `DegenerateFit`) are logged
//! and skipped. Structural problems with the request (`InvalidBasisSize`,
//! `InsufficientData`) and an exhausted grid (`NoFeasibleModel`) fail the search.

use wolfe_bfgs::{Bfgs, BfgsError, BfgsSolution};

use crate::basis::{self, BasisError};
use crate::config::{BasisGrid, ConfigError, SearchConfig, SmoothingGrid};
use crate::data::{DataError, Dataset};
use crate::gcv::gcv_score;
use crate::knots::{KnotVector, place_knots};
use crate::model::SelectedModel;
use crate::penalty::difference_penalty;
use crate::pls::{PenalizedFit, fit_penalized};

use itertools::iproduct;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, array};
use rayon::prelude::*;
use thiserror::Error;

/// A comprehensive error type for fitting and model selection.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("Basis size {basis_size} cannot be used with degree {degree}: {reason}")]
    InvalidBasisSize {
        basis_size: usize,
        degree: usize,
        reason: String,
    },

    #[error(
        "The penalized normal equations are singular or ill-conditioned for basis size {basis_size} and lambda {lambda:e}: {reason}"
    )]
    SingularSystem {
        basis_size: usize,
        lambda: f64,
        reason: String,
    },

    #[error(
        "The fit is saturated: effective degrees of freedom {edf:.6} leave no residual degrees of freedom for {n} observations."
    )]
    DegenerateFit { n: usize, edf: f64 },

    #[error(
        "No candidate produced a valid fit: {evaluated} evaluated, {singular} singular, {degenerate} degenerate."
    )]
    NoFeasibleModel {
        evaluated: usize,
        singular: usize,
        degenerate: usize,
        /// Every candidate with the reason it was skipped, in grid order.
        evaluations: Vec<CandidateEvaluation>,
    },

    #[error(
        "Only {n} observations were provided, but at least {} are needed for the smallest basis size {basis_size}.", .basis_size + 1
    )]
    InsufficientData { n: usize, basis_size: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Smoothing parameter must be finite and non-negative, got {0}.")]
    InvalidSmoothing(f64),

    #[error("No {0} were given to search over.")]
    EmptyCandidates(&'static str),

    #[error("Invalid search configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Invalid input data: {0}")]
    InvalidData(#[from] DataError),

    #[error("Basis construction failed: {0}")]
    Basis(#[from] BasisError),
}

impl FitError {
    /// Whether the error only disqualifies a single `(k, lambda)` candidate.
    pub fn is_candidate_failure(&self) -> bool {
        matches!(
            self,
            FitError::SingularSystem { .. } | FitError::DegenerateFit { .. }
        )
    }
}

/// What happened to one `(k, lambda)` candidate.
#[derive(Debug)]
pub enum CandidateOutcome {
    Scored { gcv: f64, rss: f64, edf: f64 },
    Skipped(FitError),
}

#[derive(Debug)]
pub struct CandidateEvaluation {
    pub basis_size: usize,
    pub lambda: f64,
    pub outcome: CandidateOutcome,
}

impl CandidateEvaluation {
    pub fn gcv(&self) -> Option<f64> {
        match self.outcome {
            CandidateOutcome::Scored { gcv, .. } => Some(gcv),
            CandidateOutcome::Skipped(_) => None,
        }
    }
}

/// The selected model together with every candidate that was evaluated, in grid
/// order (`k` ascending, then `lambda` ascending).
#[derive(Debug)]
pub struct SearchReport {
    pub model: SelectedModel,
    pub evaluations: Vec<CandidateEvaluation>,
    /// Whether BFGS refinement replaced the grid winner.
    pub refined: bool,
}

/// Runs the search and returns only the selected model.
pub fn fit_dataset(dataset: &Dataset, config: &SearchConfig) -> Result<SelectedModel, FitError> {
    search(dataset, config).map(|report| report.model)
}

/// The main entry point for model selection. Evaluates the whole `(k, lambda)`
/// grid described by `config` and returns the GCV-optimal model.
pub fn search(dataset: &Dataset, config: &SearchConfig) -> Result<SearchReport, FitError> {
    let (basis_sizes, lambdas) = internal::candidates(config)?;
    let n = dataset.len();

    // `candidates()` never returns an empty list.
    let smallest = basis_sizes[0];
    if n <= smallest {
        return Err(FitError::InsufficientData {
            n,
            basis_size: smallest,
        });
    }

    log::info!(
        "Starting GCV search over {} basis sizes x {} smoothing values ({} candidates), {} observations.",
        basis_sizes.len(),
        lambdas.len(),
        basis_sizes.len() * lambdas.len(),
        n
    );

    // 1. Build the lambda-independent pieces once per basis size.
    let prepared = basis_sizes
        .iter()
        .map(|&k| internal::prepare_basis(dataset, k, config))
        .collect::<Result<Vec<_>, _>>()?;

    // 2. Evaluate the grid.
    let grid: Vec<(usize, f64)> = iproduct!(0..prepared.len(), lambdas.iter().copied()).collect();
    let y = dataset.y();
    let evaluate =
        |&(idx, lambda): &(usize, f64)| internal::evaluate_candidate(&prepared[idx], y, lambda);
    let mut evaluated: Vec<internal::Evaluated> = if config.parallel {
        grid.par_iter().map(evaluate).collect()
    } else {
        grid.iter().map(evaluate).collect()
    };

    // 3. Deterministic selection.
    let (mut singular, mut degenerate) = (0usize, 0usize);
    for candidate in &evaluated {
        match &candidate.evaluation.outcome {
            CandidateOutcome::Skipped(FitError::SingularSystem { .. }) => singular += 1,
            CandidateOutcome::Skipped(_) => degenerate += 1,
            CandidateOutcome::Scored { .. } => {}
        }
    }

    if singular + degenerate > 0 {
        log::info!(
            "Skipped {} of {} candidates ({singular} singular, {degenerate} degenerate).",
            singular + degenerate,
            evaluated.len()
        );
    }

    let best = internal::select_best(
        evaluated.iter().map(|e| &e.evaluation),
        config.tie_tolerance,
    );
    let Some(best) = best else {
        return Err(FitError::NoFeasibleModel {
            evaluated: evaluated.len(),
            singular,
            degenerate,
            evaluations: evaluated.into_iter().map(|e| e.evaluation).collect(),
        });
    };

    let (best_idx, _) = grid[best];
    let basis = &prepared[best_idx];
    let (Some(mut winner), Some(mut winner_gcv)) =
        (evaluated[best].fit.take(), evaluated[best].evaluation.gcv())
    else {
        unreachable!("only scored candidates are selected")
    };

    log::info!(
        "Grid search selected basis size {} with lambda {:.6e} (GCV {:.6e}, edf {:.3}).",
        winner.basis_size,
        winner.lambda,
        winner_gcv,
        winner.edf
    );

    // 4. Optional continuous refinement of lambda.
    let mut refined = false;
    if config.refine_lambda {
        if let Some((fit, gcv)) = internal::refine_lambda(basis, y, &winner, winner_gcv, config) {
            log::info!(
                "Refined lambda {:.6e} -> {:.6e} (GCV {:.6e} -> {:.6e}).",
                winner.lambda,
                fit.lambda,
                winner_gcv,
                gcv
            );
            winner = fit;
            winner_gcv = gcv;
            refined = true;
        }
    }

    let model = SelectedModel::from_fit(
        basis.knots.clone(),
        config.penalty_order,
        &winner,
        winner_gcv,
        dataset.x_range(),
    );

    Ok(SearchReport {
        model,
        evaluations: evaluated.into_iter().map(|e| e.evaluation).collect(),
        refined,
    })
}

/// Internal module for search implementation details.
mod internal {
    use super::*;

    /// Above this `|log(lambda)|` the refinement stops moving.
    const RHO_BOUND: f64 = 30.0;
    /// Step for the central-difference gradient of log-GCV in log-lambda.
    const RHO_STEP: f64 = 1e-4;
    const REFINE_TOLERANCE: f64 = 1e-8;
    /// BFGS needs finite samples, so failed evaluations report this cost.
    const FAILED_COST: f64 = 1e10;

    /// The lambda-independent parts of one basis size.
    pub(super) struct PreparedBasis {
        pub(super) knots: KnotVector,
        pub(super) design: Array2<f64>,
        pub(super) penalty: Array2<f64>,
    }

    pub(super) struct Evaluated {
        pub(super) evaluation: CandidateEvaluation,
        pub(super) fit: Option<PenalizedFit>,
    }

    pub(super) fn candidates(config: &SearchConfig) -> Result<(Vec<usize>, Vec<f64>), FitError> {
        if matches!(&config.basis_sizes, BasisGrid::Explicit(sizes) if sizes.is_empty()) {
            return Err(FitError::EmptyCandidates("basis sizes"));
        }
        if matches!(&config.smoothing, SmoothingGrid::Explicit(lambdas) if lambdas.is_empty()) {
            return Err(FitError::EmptyCandidates("smoothing parameters"));
        }
        Ok((config.basis_sizes.candidates()?, config.smoothing.candidates()?))
    }

    /// Structural problems are reported against the basis size that caused them.
    fn structural(basis_size: usize, degree: usize, err: BasisError) -> FitError {
        let reason = match err {
            BasisError::InvalidBasisSize { reason, .. } => reason,
            other => other.to_string(),
        };
        FitError::InvalidBasisSize {
            basis_size,
            degree,
            reason,
        }
    }

    pub(super) fn prepare_basis(
        dataset: &Dataset,
        basis_size: usize,
        config: &SearchConfig,
    ) -> Result<PreparedBasis, FitError> {
        let degree = config.degree;
        let knots = place_knots(
            dataset.x(),
            basis_size,
            degree,
            config.knot_strategy,
            config.knot_boundary,
        )
        .map_err(|e| structural(basis_size, degree, e))?;
        let design = basis::basis_matrix(&knots, dataset.x())?;
        let penalty = difference_penalty(basis_size, config.penalty_order)
            .map_err(|e| structural(basis_size, degree, e))?;

        log::debug!(
            "Prepared basis k={basis_size}: {} knots, design {:?}, domain {:?}",
            knots.len(),
            design.dim(),
            knots.domain()
        );
        Ok(PreparedBasis {
            knots,
            design,
            penalty,
        })
    }

    fn fit_and_score(
        design: ArrayView2<f64>,
        penalty: ArrayView2<f64>,
        y: ArrayView1<f64>,
        lambda: f64,
    ) -> Result<(PenalizedFit, f64), FitError> {
        let fit = fit_penalized(design, y, penalty, lambda)?;
        let gcv = gcv_score(fit.rss, y.len(), fit.edf)?;
        Ok((fit, gcv))
    }

    pub(super) fn evaluate_candidate(
        prepared: &PreparedBasis,
        y: ArrayView1<f64>,
        lambda: f64,
    ) -> Evaluated {
        let basis_size = prepared.knots.num_basis();
        match fit_and_score(prepared.design.view(), prepared.penalty.view(), y, lambda) {
            Ok((fit, gcv)) => {
                log::debug!(
                    "k={basis_size}, lambda={lambda:.3e}: GCV={gcv:.6e}, rss={:.6e}, edf={:.3}",
                    fit.rss,
                    fit.edf
                );
                Evaluated {
                    evaluation: CandidateEvaluation {
                        basis_size,
                        lambda,
                        outcome: CandidateOutcome::Scored {
                            gcv,
                            rss: fit.rss,
                            edf: fit.edf,
                        },
                    },
                    fit: Some(fit),
                }
            }
            Err(e) => {
                log::debug!("Skipping candidate k={basis_size}, lambda={lambda:.3e}: {e}");
                Evaluated {
                    evaluation: CandidateEvaluation {
                        basis_size,
                        lambda,
                        outcome: CandidateOutcome::Skipped(e),
                    },
                    fit: None,
                }
            }
        }
    }

    /// Index of the winning candidate: among the scored candidates within a
    /// relative `tie_tolerance` of the lowest GCV, the one with the smallest `k`,
    /// then the largest `lambda`. Ties are always measured against the minimum,
    /// so the result does not depend on evaluation order.
    pub(super) fn select_best<'a>(
        evaluations: impl Iterator<Item = &'a CandidateEvaluation> + Clone,
        tie_tolerance: f64,
    ) -> Option<usize> {
        let lowest = evaluations
            .clone()
            .filter_map(CandidateEvaluation::gcv)
            .min_by(f64::total_cmp)?;
        let threshold = lowest + tie_tolerance * lowest.abs();
        evaluations
            .enumerate()
            .filter(|(_, e)| e.gcv().is_some_and(|gcv| gcv <= threshold))
            .min_by(|(_, a), (_, b)| {
                a.basis_size
                    .cmp(&b.basis_size)
                    .then(b.lambda.total_cmp(&a.lambda))
            })
            .map(|(i, _)| i)
    }

    /// BFGS on `rho = log(lambda)` minimizing `log(GCV)` for a fixed basis.
    /// Returns the refined fit only if it improves on `start_gcv` beyond the tie
    /// tolerance.
    pub(super) fn refine_lambda(
        prepared: &PreparedBasis,
        y: ArrayView1<f64>,
        start: &PenalizedFit,
        start_gcv: f64,
        config: &SearchConfig,
    ) -> Option<(PenalizedFit, f64)> {
        if start.lambda <= 0.0 || start_gcv <= 0.0 {
            log::debug!("Skipping lambda refinement: it needs a positive lambda and GCV.");
            return None;
        }

        let design = prepared.design.clone();
        let penalty = prepared.penalty.clone();
        let response = y.to_owned();
        let log_gcv = move |rho: f64| -> f64 {
            let lambda = rho.clamp(-RHO_BOUND, RHO_BOUND).exp();
            match fit_and_score(design.view(), penalty.view(), response.view(), lambda) {
                Ok((_, gcv)) if gcv > 0.0 => gcv.ln(),
                Ok(_) => -FAILED_COST,
                Err(_) => FAILED_COST,
            }
        };
        let cost_and_grad = move |rho: &Array1<f64>| -> (f64, Array1<f64>) {
            let r = rho[0].clamp(-RHO_BOUND, RHO_BOUND);
            let cost = log_gcv(r);
            let grad = (log_gcv(r + RHO_STEP) - log_gcv(r - RHO_STEP)) / (2.0 * RHO_STEP);
            let grad = if grad.is_finite() { grad } else { 0.0 };
            (cost, array![grad])
        };

        let solution = Bfgs::new(array![start.lambda.ln()], cost_and_grad)
            .with_tolerance(REFINE_TOLERANCE)
            .with_max_iterations(config.refine_max_iterations)
            .run();
        let BfgsSolution {
            final_point,
            iterations,
            ..
        } = match solution {
            Ok(solution) => solution,
            Err(BfgsError::MaxIterationsReached { last_solution })
            | Err(BfgsError::LineSearchFailed { last_solution, .. }) => {
                log::debug!("Lambda refinement stopped early; using the best point found.");
                *last_solution
            }
            Err(e) => {
                log::warn!("Lambda refinement failed, keeping the grid winner: {e:?}");
                return None;
            }
        };
        log::debug!("Lambda refinement finished after {iterations} BFGS iterations.");

        let lambda = final_point[0].clamp(-RHO_BOUND, RHO_BOUND).exp();
        match fit_and_score(prepared.design.view(), prepared.penalty.view(), y, lambda) {
            Ok((fit, gcv)) if gcv < start_gcv - config.tie_tolerance * start_gcv => Some((fit, gcv)),
            Ok((_, gcv)) => {
                log::debug!(
                    "Refined lambda {lambda:.6e} (GCV {gcv:.6e}) does not improve on {start_gcv:.6e}."
                );
                None
            }
            Err(e) => {
                log::warn!("Refined lambda {lambda:.6e} could not be refitted: {e}");
                None
            }
        }
    }
}
