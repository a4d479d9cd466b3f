// ========================================================================================
//
//                      GCV SEARCH PERFORMANCE BENCHMARK
//
// ========================================================================================
//
// Measures a full (basis size x lambda) grid search at several dataset sizes, once on
// the rayon pool and once on a single thread.
//
// ========================================================================================

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use gcvspline::search;
use gcvspline::{BasisGrid, Dataset, SearchConfig};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

fn noisy_curve(n: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(0x5EED_0000 + n as u64);
    let noise = Normal::new(0.0, 0.3).unwrap();
    let x: Array1<f64> = Array1::linspace(0.0, 10.0, n);
    let y = x.mapv(|t| 0.3 * (t - 1.0).sin() + 0.5 * (2.0 * t).cos() + rng.sample(noise));
    Dataset::new(x, y).unwrap()
}

fn benchmark_search(c: &mut Criterion) {
    let sizes = [100_usize, 1_000, 10_000];
    let datasets: Vec<_> = sizes.iter().map(|&n| (n, noisy_curve(n))).collect();
    let parallel = SearchConfig {
        basis_sizes: BasisGrid::Range { min: 4, max: 20 },
        ..SearchConfig::default()
    };
    let sequential = SearchConfig {
        parallel: false,
        ..parallel.clone()
    };

    let mut group = c.benchmark_group("gcv_search");
    group.sample_size(10);
    for (n, dataset) in datasets.iter() {
        group.throughput(Throughput::Elements(*n as u64));

        group.bench_with_input(BenchmarkId::new("parallel", n), dataset, |b, input| {
            b.iter(|| black_box(search::fit_dataset(black_box(input), &parallel).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("sequential", n), dataset, |b, input| {
            b.iter(|| black_box(search::fit_dataset(black_box(input), &sequential).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(search_benchmark, benchmark_search);
criterion_main!(search_benchmark);
