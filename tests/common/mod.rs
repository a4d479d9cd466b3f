//! Shared fixtures for the integration tests.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

/// The smooth curve behind the synthetic observations.
pub fn true_curve(t: f64) -> f64 {
    0.3 * (t - 1.0).sin() + 0.5 * (2.0 * t).cos()
}

/// Builds noisy observations of [`true_curve`] on evenly spaced points.
pub struct SyntheticDataBuilder {
    n_samples: usize,
    range: (f64, f64),
    noise_sd: f64,
    seed: u64,
}

impl Default for SyntheticDataBuilder {
    fn default() -> Self {
        Self {
            n_samples: 100,
            range: (0.0, 10.0),
            noise_sd: 0.3,
            seed: 42,
        }
    }
}

#[allow(dead_code)]
impl SyntheticDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_samples(mut self, n: usize) -> Self {
        self.n_samples = n;
        self
    }

    pub fn noise_sd(mut self, sd: f64) -> Self {
        self.noise_sd = sd;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(&self) -> Vec<(f64, f64)> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let noise = Normal::new(0.0, self.noise_sd).expect("noise sd must be positive");
        let t = Array1::linspace(self.range.0, self.range.1, self.n_samples);
        t.iter()
            .map(|&t| (t, true_curve(t) + rng.sample(noise)))
            .collect()
    }
}
