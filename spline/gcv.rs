use crate::search::FitError;

/// Fits whose residual degrees of freedom `n - edf` fall below this fraction of
/// `n` are treated as saturated.
pub const SATURATION_TOLERANCE: f64 = 1e-8;

/// Generalized Cross-Validation score
///
/// ```text
/// GCV = n * RSS / (n - edf)^2
/// ```
///
/// Lower is better. Fails with `DegenerateFit` when the model uses up all the
/// degrees of freedom in the data (`n - edf <= 0`, up to rounding), or when the
/// inputs themselves are not meaningful.
pub fn gcv_score(rss: f64, n: usize, edf: f64) -> Result<f64, FitError> {
    let n_f = n as f64;
    let residual_df = n_f - edf;
    if n == 0
        || !rss.is_finite()
        || rss < 0.0
        || !edf.is_finite()
        || residual_df <= SATURATION_TOLERANCE * n_f
    {
        return Err(FitError::DegenerateFit { n, edf });
    }
    Ok(n_f * rss / (residual_df * residual_df))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn matches_formula() {
        // 10 * 2.5 / (10 - 4)^2
        assert_relative_eq!(gcv_score(2.5, 10, 4.0).unwrap(), 25.0 / 36.0);
        assert_eq!(gcv_score(0.0, 10, 3.0).unwrap(), 0.0);
    }

    #[test]
    fn invariant_under_smoothing_reparameterization() {
        // The same (rss, edf) reached through lambda or through rho = ln(lambda)
        // scores identically.
        let by_lambda = |lambda: f64| (1.0 + lambda, 8.0 / (1.0 + lambda));
        let by_rho = |rho: f64| by_lambda(rho.exp());
        for lambda in [1e-3_f64, 1.0, 1e3] {
            let (rss_a, edf_a) = by_lambda(lambda);
            let (rss_b, edf_b) = by_rho(lambda.ln());
            assert_relative_eq!(
                gcv_score(rss_a, 40, edf_a).unwrap(),
                gcv_score(rss_b, 40, edf_b).unwrap(),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn saturated_fit_is_degenerate() {
        for edf in [5.0, 5.0 - 1e-12, 6.0] {
            match gcv_score(0.0, 5, edf) {
                Err(FitError::DegenerateFit { n, .. }) => assert_eq!(n, 5),
                other => panic!("Expected DegenerateFit for edf={edf}, got {other:?}"),
            }
        }
        assert!(gcv_score(1.0, 0, 0.0).is_err());
        assert!(gcv_score(f64::NAN, 5, 1.0).is_err());
    }

    #[test]
    fn score_grows_as_edf_approaches_n() {
        let scores: Vec<f64> = [1.0, 3.0, 4.5, 4.99]
            .iter()
            .map(|&edf| gcv_score(1.0, 5, edf).unwrap())
            .collect();
        assert!(scores.windows(2).all(|w| w[1] > w[0]));
    }
}
