// ========================================================================================
//
//                          THE COMMAND-LINE FRONT END: GCVSPLINE
//
// ========================================================================================
//
// Loads observations from disk, assembles a `SearchConfig` from an optional TOML file
// plus command-line overrides, and hands the work to the library. Two subcommands:
//
// 1.  **fit:** runs the search, prints a TOML summary of the selected model and writes
//     the fitted curve to a TSV file, either over an even grid across the observed
//     range or at the query points read from a file.
//
// 2.  **scan:** runs the same search and prints the GCV score of every candidate.

use clap::{Args, Parser, Subcommand};
use gcvspline::config::{BasisGrid, SearchConfig, SmoothingGrid};
use gcvspline::data::{load_observations, load_query_points};
use gcvspline::search::{self, CandidateEvaluation, CandidateOutcome, FitError};
use gcvspline::{Dataset, SelectedModel};
use ndarray::Array1;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(
    name = "gcvspline",
    about = "Fit penalized B-splines with GCV-selected smoothing",
    long_about = "Fits a P-spline (B-spline basis with a difference penalty) to (t, y_observed) \
                 observations, choosing the basis size and the smoothing parameter by \
                 Generalized Cross-Validation."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select and fit a model, then write its predictions
    #[command(about = "Fit the GCV-optimal P-spline (outputs: predictions.tsv)")]
    Fit {
        #[command(flatten)]
        search: SearchArgs,

        /// File with a `t` column of query points. Without it, predictions are
        /// written over an even grid across the observed range.
        #[arg(long, value_name = "FILE")]
        query: Option<PathBuf>,

        /// Number of grid points when no query file is given
        #[arg(long, default_value = "200")]
        grid_points: usize,

        /// Where to write the `t\tprediction` table
        #[arg(long, default_value = "predictions.tsv")]
        output: PathBuf,
    },
    /// Print the GCV score of every (basis size, lambda) candidate
    Scan {
        #[command(flatten)]
        search: SearchArgs,
    },
}

#[derive(Args)]
struct SearchArgs {
    /// Observations with `t` and `y_observed` columns (.csv, or .tsv for tabs)
    data: PathBuf,

    /// TOML file with search settings. Flags below override it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Polynomial degree of the B-splines
    #[arg(long)]
    degree: Option<usize>,

    /// Order of the difference penalty (0 is a ridge penalty)
    #[arg(long)]
    penalty_order: Option<usize>,

    /// Smallest basis size to try
    #[arg(long, requires = "max_basis")]
    min_basis: Option<usize>,

    /// Largest basis size to try
    #[arg(long, requires = "min_basis")]
    max_basis: Option<usize>,

    /// Smallest smoothing parameter of the log grid
    #[arg(long, requires_all = ["lambda_max", "lambda_steps"])]
    lambda_min: Option<f64>,

    /// Largest smoothing parameter of the log grid
    #[arg(long, requires_all = ["lambda_min", "lambda_steps"])]
    lambda_max: Option<f64>,

    /// Number of log-spaced smoothing parameters
    #[arg(long, requires_all = ["lambda_min", "lambda_max"])]
    lambda_steps: Option<usize>,

    /// Refine the winning lambda with BFGS after the grid search
    #[arg(long)]
    refine: bool,

    /// Evaluate candidates on a single thread
    #[arg(long)]
    sequential: bool,
}

impl SearchArgs {
    fn to_config(&self) -> Result<SearchConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => SearchConfig::load(path)?,
            None => SearchConfig::default(),
        };
        if let Some(degree) = self.degree {
            config.degree = degree;
        }
        if let Some(order) = self.penalty_order {
            config.penalty_order = order;
        }
        if let (Some(min), Some(max)) = (self.min_basis, self.max_basis) {
            config.basis_sizes = BasisGrid::Range { min, max };
        }
        if let (Some(min), Some(max), Some(steps)) =
            (self.lambda_min, self.lambda_max, self.lambda_steps)
        {
            config.smoothing = SmoothingGrid::LogGrid { min, max, steps };
        }
        config.refine_lambda |= self.refine;
        config.parallel &= !self.sequential;
        Ok(config)
    }

    fn prepare(&self) -> Result<(Dataset, SearchConfig), Box<dyn std::error::Error>> {
        let config = self.to_config()?;
        let dataset = load_observations(&self.data)?;
        println!(
            "Searching {} observations (degree {}, penalty order {})...",
            dataset.len(),
            config.degree,
            config.penalty_order
        );
        Ok((dataset, config))
    }
}

/// The printed description of a selected model.
#[derive(Serialize)]
struct FitSummary {
    basis_size: usize,
    degree: usize,
    penalty_order: usize,
    lambda: f64,
    gcv: f64,
    rss: f64,
    edf: f64,
    num_observations: usize,
    x_min: f64,
    x_max: f64,
    refined: bool,
}

impl FitSummary {
    fn new(model: &SelectedModel, refined: bool) -> Self {
        let (x_min, x_max) = model.x_range();
        Self {
            basis_size: model.basis_size(),
            degree: model.degree(),
            penalty_order: model.penalty_order(),
            lambda: model.lambda(),
            gcv: model.gcv(),
            rss: model.rss(),
            edf: model.edf(),
            num_observations: model.num_observations(),
            x_min,
            x_max,
            refined,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Fit {
            search,
            query,
            grid_points,
            output,
        } => fit_command(&search, query.as_deref(), grid_points, &output),
        Commands::Scan { search } => scan_command(&search),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn fit_command(
    args: &SearchArgs,
    query: Option<&Path>,
    grid_points: usize,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let (dataset, config) = args.prepare()?;
    let report = search::search(&dataset, &config)?;
    let model = &report.model;

    println!("{}", toml::to_string(&FitSummary::new(model, report.refined))?);

    let (points, predictions) = match query {
        Some(path) => {
            let points = load_query_points(path)?;
            let predictions = model.predict(points.view())?;
            (points, predictions)
        }
        None => model.predict_grid(grid_points)?,
    };

    save_predictions(&points, &predictions, output)?;
    println!("Predictions saved to: {}", output.display());
    Ok(())
}

fn scan_command(args: &SearchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (dataset, config) = args.prepare()?;
    let report = match search::search(&dataset, &config) {
        Ok(report) => report,
        Err(FitError::NoFeasibleModel { evaluations, .. }) => {
            print_candidates(&evaluations);
            return Err("every candidate was skipped; see the table above".into());
        }
        Err(e) => return Err(e.into()),
    };

    print_candidates(&report.evaluations);
    println!(
        "Selected basis size {} with lambda {:.6e} (GCV {:.6e})",
        report.model.basis_size(),
        report.model.lambda(),
        report.model.gcv()
    );
    Ok(())
}

fn print_candidates(evaluations: &[CandidateEvaluation]) {
    println!("basis_size\tlambda\tgcv\tedf\trss");
    for evaluation in evaluations {
        match &evaluation.outcome {
            CandidateOutcome::Scored { gcv, rss, edf } => println!(
                "{}\t{:.6e}\t{:.6e}\t{:.4}\t{:.6e}",
                evaluation.basis_size, evaluation.lambda, gcv, edf, rss
            ),
            CandidateOutcome::Skipped(reason) => println!(
                "{}\t{:.6e}\tskipped: {}",
                evaluation.basis_size, evaluation.lambda, reason
            ),
        }
    }
}

/// Save the fitted curve to a two-column TSV file.
fn save_predictions(
    points: &Array1<f64>,
    predictions: &Array1<f64>,
    output_path: &Path,
) -> Result<(), std::io::Error> {
    let mut writer = BufWriter::new(File::create(output_path)?);
    writeln!(writer, "t\tprediction")?;
    for (t, pred) in points.iter().zip(predictions) {
        writeln!(writer, "{}\t{:.6}", t, pred)?;
    }
    writer.flush()
}
