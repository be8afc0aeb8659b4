use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use densemm::config::{DEFAULT_ABS_TOLERANCE, DEFAULT_BLOCK_SIZE, DEFAULT_REL_TOLERANCE};
use densemm::{run, Algorithm, Cluster, Config, Matrix, Optimization, Outcome, ParallelMode};

/// Multiplies two random square matrices and reports the timing.
#[derive(Debug, Parser)]
#[command(name = "densemm")]
#[command(version)]
#[command(about = "Dense matrix multiplication benchmark and verification tool")]
struct Args {
    /// naive, strassen or reference
    #[arg(short, long, default_value = "naive")]
    algorithm: Algorithm,

    /// sequential, shared-memory, distributed or hybrid
    #[arg(short, long, default_value = "sequential")]
    mode: ParallelMode,

    /// Edge length of the square input matrices
    #[arg(short = 'n', long, default_value_t = 100)]
    size: usize,

    /// Threads per worker in shared-memory and hybrid modes
    #[arg(short, long, default_value_t = 1)]
    threads: usize,

    /// Workers in distributed and hybrid modes
    #[arg(short, long, default_value_t = 1)]
    workers: usize,

    /// Tile the naive kernel
    #[arg(long)]
    cache_friendly: bool,

    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    #[arg(long, default_value_t = DEFAULT_ABS_TOLERANCE)]
    abs_tol: f64,

    #[arg(long, default_value_t = DEFAULT_REL_TOLERANCE)]
    rel_tol: f64,

    /// Check the result against the reference product
    #[arg(long)]
    validate: bool,

    /// Run the listed algorithms and compare every pair, e.g.
    /// `--verify naive,strassen,reference`
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    verify: Vec<Algorithm>,

    /// Seed for the input generator
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config::new(self.algorithm, self.mode)
            .with_size(self.size)
            .with_threads(self.threads)
            .with_optimization(Optimization {
                cache_friendly: self.cache_friendly,
                block_size: self.block_size,
            })
            .with_tolerance(self.abs_tol, self.rel_tol)
            .with_validation(self.validate);
        if !self.verify.is_empty() {
            config = config.with_verification(self.verify.iter().copied());
        }
        config
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    setup_logging();

    let args = Args::parse();
    let config = args.config();
    config.validate().context("invalid configuration")?;
    let cluster = Cluster::new(args.workers).context("invalid worker count")?;

    info!(size = config.matrix_size, "generating random matrices");
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    let a = Matrix::random(config.matrix_size, 0.0..10.0, &mut rng);
    let b = Matrix::random(config.matrix_size, 0.0..10.0, &mut rng);

    let outcome = run(&config, &cluster, &a, &b)?;
    println!("{outcome}");

    let passed = match &outcome {
        Outcome::Run(report) => report.passed(),
        Outcome::Suite(report) => report.all_passed,
    };
    if !passed {
        warn!("results disagree");
        bail!("verification failed");
    }
    Ok(())
}
