//! Run configuration consumed by the strategies and the verification engine.
//!
//! The record is filled by whatever front end drives the crate (the bundled
//! binary, a test, or another program) and is only read by the core.

use std::fmt;
use std::str::FromStr;

use crate::error::{configuration_error, MatmulError, Result};

/// Default tile edge for the cache-blocked naive kernel.
pub const DEFAULT_BLOCK_SIZE: usize = 64;
/// Default absolute tolerance for result comparison.
pub const DEFAULT_ABS_TOLERANCE: f64 = 1e-8;
/// Default relative tolerance for result comparison.
pub const DEFAULT_REL_TOLERANCE: f64 = 1e-5;

/// Multiplication algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Naive,
    Strassen,
    /// Trusted library routine, used as a correctness oracle.
    Reference,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Naive, Algorithm::Strassen, Algorithm::Reference];
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Algorithm::Naive => "Naive",
            Algorithm::Strassen => "Strassen",
            Algorithm::Reference => "Reference",
        };
        f.write_str(label)
    }
}

impl FromStr for Algorithm {
    type Err = MatmulError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "naive" => Ok(Algorithm::Naive),
            "strassen" => Ok(Algorithm::Strassen),
            "reference" | "blas" | "openblas" => Ok(Algorithm::Reference),
            other => Err(configuration_error(format!("unknown algorithm `{other}`"))),
        }
    }
}

/// Parallelization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParallelMode {
    Sequential,
    /// Threads sharing one address space.
    SharedMemory,
    /// Cooperating workers exchanging data through collectives.
    Distributed,
    /// Distributed workers, each running a thread pool.
    Hybrid,
}

impl ParallelMode {
    /// Whether this mode needs a worker context to run.
    pub fn is_distributed(self) -> bool {
        matches!(self, ParallelMode::Distributed | ParallelMode::Hybrid)
    }

    /// Whether this mode uses a thread pool.
    pub fn is_threaded(self) -> bool {
        matches!(self, ParallelMode::SharedMemory | ParallelMode::Hybrid)
    }
}

impl fmt::Display for ParallelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ParallelMode::Sequential => "Sequential",
            ParallelMode::SharedMemory => "Shared-memory",
            ParallelMode::Distributed => "Distributed",
            ParallelMode::Hybrid => "Hybrid (distributed + threads)",
        };
        f.write_str(label)
    }
}

impl FromStr for ParallelMode {
    type Err = MatmulError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(ParallelMode::Sequential),
            "shared-memory" | "shared" | "threads" | "openmp" => Ok(ParallelMode::SharedMemory),
            "distributed" | "mpi" => Ok(ParallelMode::Distributed),
            "hybrid" => Ok(ParallelMode::Hybrid),
            other => Err(configuration_error(format!("unknown parallel mode `{other}`"))),
        }
    }
}

/// Loop tiling options for the naive kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Optimization {
    pub cache_friendly: bool,
    pub block_size: usize,
}

impl Optimization {
    /// Tiled kernel with the given edge length.
    pub fn blocked(block_size: usize) -> Self {
        Self {
            cache_friendly: true,
            block_size,
        }
    }

    /// The tile edge when blocking is active.
    pub fn tile(&self) -> Option<usize> {
        (self.cache_friendly && self.block_size > 0).then_some(self.block_size)
    }
}

impl Default for Optimization {
    fn default() -> Self {
        Self {
            cache_friendly: false,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Combined absolute + relative comparison tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub abs: f64,
    pub rel: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            abs: DEFAULT_ABS_TOLERANCE,
            rel: DEFAULT_REL_TOLERANCE,
        }
    }
}

/// Everything a run needs besides the two operands and the worker count.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub algorithm: Algorithm,
    pub mode: ParallelMode,
    /// Edge of the randomly generated square inputs.
    pub matrix_size: usize,
    /// Thread count for shared-memory and hybrid modes.
    pub threads: usize,
    pub optimization: Optimization,
    pub tolerance: Tolerance,
    /// Run every algorithm in `verify_algorithms` and compare all pairs.
    pub verification_mode: bool,
    pub verify_algorithms: Vec<Algorithm>,
    /// Check a single run against the reference product.
    pub validate_against_reference: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Naive,
            mode: ParallelMode::Sequential,
            matrix_size: 100,
            threads: 1,
            optimization: Optimization::default(),
            tolerance: Tolerance::default(),
            verification_mode: false,
            verify_algorithms: Vec::new(),
            validate_against_reference: false,
        }
    }
}

impl Config {
    pub fn new(algorithm: Algorithm, mode: ParallelMode) -> Self {
        Self {
            algorithm,
            mode,
            ..Self::default()
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_mode(mut self, mode: ParallelMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_size(mut self, matrix_size: usize) -> Self {
        self.matrix_size = matrix_size;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_optimization(mut self, optimization: Optimization) -> Self {
        self.optimization = optimization;
        self
    }

    pub fn with_tolerance(mut self, abs: f64, rel: f64) -> Self {
        self.tolerance = Tolerance { abs, rel };
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_against_reference = enabled;
        self
    }

    /// Switches to suite mode over the given algorithms.
    pub fn with_verification<I>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = Algorithm>,
    {
        self.verification_mode = true;
        self.verify_algorithms = algorithms.into_iter().collect();
        self
    }

    /// Rejects values no strategy can run with.
    pub fn validate(&self) -> Result<()> {
        if self.matrix_size == 0 {
            return Err(configuration_error("matrix size must be at least 1"));
        }
        if self.mode.is_threaded() && self.threads == 0 {
            return Err(configuration_error("thread count must be at least 1"));
        }
        if self.optimization.cache_friendly && self.optimization.block_size == 0 {
            return Err(configuration_error(
                "block size must be at least 1 when cache-friendly mode is on",
            ));
        }
        let Tolerance { abs, rel } = self.tolerance;
        if !(abs.is_finite() && abs >= 0.0 && rel.is_finite() && rel >= 0.0) {
            return Err(configuration_error(format!(
                "tolerances must be finite and non-negative (abs {abs}, rel {rel})"
            )));
        }
        if self.verification_mode && self.verify_algorithms.is_empty() {
            return Err(configuration_error(
                "verification mode needs at least one algorithm",
            ));
        }
        Ok(())
    }
}
