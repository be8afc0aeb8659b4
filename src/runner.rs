//! End-to-end execution of one configured run.
//!
//! [`run`] validates the configuration, picks the strategy, times the
//! multiplication and optionally checks the product against the reference.
//! Distributed strategies run on every worker of the given [`Cluster`]; the
//! root alone validates and builds the report.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::cluster::{Cluster, Communicator, ROOT};
use crate::config::{Algorithm, Config, Optimization, ParallelMode};
use crate::dispatch::{self, Strategy};
use crate::error::{communication_error, Result};
use crate::matrix::Matrix;
use crate::verification::{self, SuiteReport, Validation};

const RULE: &str = "========================================";

/// Summary of a single multiplication.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub algorithm: Algorithm,
    pub mode: ParallelMode,
    pub threads: usize,
    pub workers: usize,
    /// Shape of the product.
    pub shape: (usize, usize),
    pub optimization: Optimization,
    pub elapsed: Duration,
    /// Present when the run was checked against the reference.
    pub validation: Option<Validation>,
    pub result: Matrix,
}

impl RunReport {
    /// False only when a validation ran and failed.
    pub fn passed(&self) -> bool {
        self.validation.as_ref().map_or(true, |v| v.passed)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{RULE}")?;
        writeln!(f, "         Matrix Multiplication")?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "Algorithm:       {}", self.algorithm)?;
        writeln!(f, "Execution Mode:  {}", self.mode)?;
        if self.mode.is_threaded() {
            writeln!(f, "Threads:         {}", self.threads)?;
        }
        if self.mode.is_distributed() {
            writeln!(f, "Workers:         {}", self.workers)?;
        }
        writeln!(f, "Matrix Size:     {}x{}", self.shape.0, self.shape.1)?;
        match self.optimization.tile() {
            Some(block) => writeln!(f, "Optimization:    Cache-friendly (block size: {block})")?,
            None => writeln!(f, "Optimization:    None")?,
        }
        writeln!(f, "{RULE}")?;
        writeln!(f, "Execution Time:  {:.6} seconds", self.elapsed.as_secs_f64())?;
        write!(f, "{RULE}")?;
        if let Some(validation) = &self.validation {
            let status = if validation.passed { "PASSED" } else { "FAILED" };
            write!(f, "\nValidation Status: {status}")?;
        }
        Ok(())
    }
}

/// What a call to [`run`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Run(RunReport),
    Suite(SuiteReport),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Run(report) => write!(f, "{report}"),
            Outcome::Suite(report) => write!(f, "{report}"),
        }
    }
}

fn validate(result: &Matrix, a: &Matrix, b: &Matrix, config: &Config) -> Result<Option<Validation>> {
    if !config.validate_against_reference {
        return Ok(None);
    }
    let validation = verification::validate_against_reference(result, a, b, config.algorithm, config)?;
    if !validation.passed {
        warn!("validation failed, results differ from the reference");
    }
    Ok(Some(validation))
}

fn run_local(config: &Config, a: &Matrix, b: &Matrix) -> Result<RunReport> {
    info!("computing matrix multiplication");
    let start = Instant::now();
    let result = dispatch::multiply(a, b, config, None)?;
    let elapsed = start.elapsed();

    let validation = validate(&result, a, b, config)?;
    Ok(RunReport {
        algorithm: config.algorithm,
        mode: config.mode,
        threads: config.threads,
        workers: 1,
        shape: result.shape(),
        optimization: config.optimization,
        elapsed,
        validation,
        result,
    })
}

/// Body executed by every worker of a distributed run.
fn run_worker(
    comm: &mut Communicator,
    config: &Config,
    a: &Matrix,
    b: &Matrix,
) -> Result<Option<RunReport>> {
    // Workers only trust what the root sends them.
    let (config, a, b) = comm.broadcast(
        ROOT,
        comm.is_root().then(|| (config.clone(), a.clone(), b.clone())),
    )?;

    if comm.is_root() {
        info!(workers = comm.size(), "computing matrix multiplication");
    }
    let start = Instant::now();
    let result = dispatch::multiply(&a, &b, &config, Some(&mut *comm))?;
    let elapsed = start.elapsed();

    if !comm.is_root() {
        return Ok(None);
    }
    let validation = validate(&result, &a, &b, &config)?;
    Ok(Some(RunReport {
        algorithm: config.algorithm,
        mode: config.mode,
        threads: config.threads,
        workers: comm.size(),
        shape: result.shape(),
        optimization: config.optimization,
        elapsed,
        validation,
        result,
    }))
}

/// Runs `config` on `a * b`.
///
/// In verification mode the suite runs instead of a single algorithm.
/// Distributed and hybrid modes use `cluster`; the other modes ignore it.
pub fn run(config: &Config, cluster: &Cluster, a: &Matrix, b: &Matrix) -> Result<Outcome> {
    config.validate()?;

    if config.verification_mode {
        return verification::run_verification_suite(a, b, config).map(Outcome::Suite);
    }

    match dispatch::select(config.algorithm, config.mode)? {
        Strategy::Local(_) => run_local(config, a, b).map(Outcome::Run),
        Strategy::Distributed(_) => {
            let reports = cluster.launch(|comm| run_worker(comm, config, a, b))?;
            reports
                .into_iter()
                .next()
                .flatten()
                .map(Outcome::Run)
                .ok_or_else(|| communication_error(ROOT, "root produced no report"))
        }
    }
}
