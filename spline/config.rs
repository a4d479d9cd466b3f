//! Search configuration.
//!
//! Every knob of the hyperparameter search lives in [`SearchConfig`], which can be
//! built in code or read from a TOML file. All fields are optional in TOML:
//!
//! ```toml
//! degree = 3
//! penalty_order = 2
//! knot_strategy = "quantile"
//! basis_sizes = { range = { min = 6, max = 16 } }
//! smoothing = { log_grid = { min = 1e-4, max = 1e2, steps = 13 } }
//! ```

use crate::knots::{KnotBoundary, KnotStrategy};
use crate::penalty::DEFAULT_PENALTY_ORDER;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid basis size grid: {0}")]
    InvalidBasisGrid(String),
    #[error("Invalid smoothing grid: {0}")]
    InvalidSmoothingGrid(String),
}

/// The candidate basis sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasisGrid {
    /// Every size from `min` to `max`, inclusive.
    Range { min: usize, max: usize },
    Explicit(Vec<usize>),
}

impl BasisGrid {
    /// Distinct basis sizes in ascending order.
    pub fn candidates(&self) -> Result<Vec<usize>, ConfigError> {
        let mut sizes = match self {
            BasisGrid::Range { min, max } => {
                if min > max {
                    return Err(ConfigError::InvalidBasisGrid(format!(
                        "range minimum {min} exceeds maximum {max}"
                    )));
                }
                (*min..=*max).collect::<Vec<_>>()
            }
            BasisGrid::Explicit(sizes) => sizes.clone(),
        };
        sizes.sort_unstable();
        sizes.dedup();
        if sizes.is_empty() {
            return Err(ConfigError::InvalidBasisGrid(
                "no basis sizes to search".to_string(),
            ));
        }
        Ok(sizes)
    }
}

impl Default for BasisGrid {
    fn default() -> Self {
        BasisGrid::Range { min: 4, max: 20 }
    }
}

/// The candidate smoothing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingGrid {
    /// `steps` values evenly spaced in log10 between `min` and `max`, inclusive.
    LogGrid { min: f64, max: f64, steps: usize },
    Explicit(Vec<f64>),
}

impl SmoothingGrid {
    /// Distinct smoothing parameters in ascending order. Every value is finite and
    /// non-negative.
    pub fn candidates(&self) -> Result<Vec<f64>, ConfigError> {
        let mut lambdas = match self {
            SmoothingGrid::LogGrid { min, max, steps } => log_grid(*min, *max, *steps)?,
            SmoothingGrid::Explicit(values) => values.clone(),
        };
        if let Some(bad) = lambdas.iter().find(|l| !l.is_finite() || **l < 0.0) {
            return Err(ConfigError::InvalidSmoothingGrid(format!(
                "smoothing parameters must be finite and non-negative, found {bad}"
            )));
        }
        lambdas.sort_unstable_by(f64::total_cmp);
        lambdas.dedup();
        if lambdas.is_empty() {
            return Err(ConfigError::InvalidSmoothingGrid(
                "no smoothing parameters to search".to_string(),
            ));
        }
        Ok(lambdas)
    }
}

impl Default for SmoothingGrid {
    fn default() -> Self {
        SmoothingGrid::LogGrid {
            min: 1e-6,
            max: 1e3,
            steps: 19,
        }
    }
}

fn log_grid(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, ConfigError> {
    if !(min > 0.0 && max >= min && max.is_finite()) {
        return Err(ConfigError::InvalidSmoothingGrid(format!(
            "log grid needs 0 < min <= max, got min={min}, max={max}"
        )));
    }
    match steps {
        0 => Err(ConfigError::InvalidSmoothingGrid(
            "log grid needs at least one step".to_string(),
        )),
        1 => Ok(vec![min]),
        _ => {
            let (lo, hi) = (min.log10(), max.log10());
            let h = (hi - lo) / (steps - 1) as f64;
            Ok((0..steps)
                .map(|i| {
                    if i == steps - 1 {
                        max
                    } else {
                        10f64.powf(lo + i as f64 * h)
                    }
                })
                .collect())
        }
    }
}

/// The complete configuration of a GCV search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Polynomial degree of the B-splines.
    pub degree: usize,
    /// Order of the difference penalty. Zero gives a plain ridge penalty.
    pub penalty_order: usize,
    pub basis_sizes: BasisGrid,
    pub smoothing: SmoothingGrid,
    pub knot_strategy: KnotStrategy,
    pub knot_boundary: KnotBoundary,
    /// Relative tolerance under which two GCV scores count as tied.
    pub tie_tolerance: f64,
    /// Evaluate candidates on the rayon thread pool.
    pub parallel: bool,
    /// After the grid search, continue optimizing log(lambda) for the winning
    /// basis size with BFGS.
    pub refine_lambda: bool,
    /// Iteration cap for the BFGS refinement.
    pub refine_max_iterations: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            degree: 3,
            penalty_order: DEFAULT_PENALTY_ORDER,
            basis_sizes: BasisGrid::default(),
            smoothing: SmoothingGrid::default(),
            knot_strategy: KnotStrategy::default(),
            knot_boundary: KnotBoundary::default(),
            tie_tolerance: 1e-9,
            parallel: true,
            refine_lambda: false,
            refine_max_iterations: 100,
        }
    }
}

impl SearchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SearchConfig = toml::from_str(text)?;
        config.basis_sizes.candidates()?;
        config.smoothing.candidates()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
