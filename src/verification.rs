//! Result comparison, reference validation and the multi-algorithm suite.
//!
//! Comparisons never fail: a disagreement is a [`ComparisonResult`] with
//! `all_close == false`, rendered through [`ComparisonReport`]. Errors are
//! reserved for runs that could not produce a result at all.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::algorithms::reference;
use crate::config::{Algorithm, Config, ParallelMode, Tolerance};
use crate::dispatch;
use crate::error::{configuration_error, Result};
use crate::matrix::{ComparisonResult, Matrix};

const RULE: &str = "========================================";
const THIN_RULE: &str = "----------------------------------------";
const WIDE_RULE: &str = "================================================";

/// Label used for the reference product in reports.
pub const REFERENCE_LABEL: &str = "Reference";

/// Elementwise comparison of `x` against `y` with a combined tolerance.
pub fn compare(x: &Matrix, y: &Matrix, tolerance: Tolerance) -> ComparisonResult {
    x.compare(y, tolerance.abs, tolerance.rel)
}

/// A comparison together with the labels of the two sides.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    pub label_a: String,
    pub label_b: String,
    pub result: ComparisonResult,
}

impl ComparisonReport {
    pub fn new(label_a: impl Into<String>, label_b: impl Into<String>, result: ComparisonResult) -> Self {
        Self {
            label_a: label_a.into(),
            label_b: label_b.into(),
            result,
        }
    }

    pub fn passed(&self) -> bool {
        self.result.all_close
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.result;
        writeln!(f, "{RULE}")?;
        writeln!(f, "      Comparison Report")?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "Algorithm 1:     {}", self.label_a)?;
        writeln!(f, "Algorithm 2:     {}", self.label_b)?;
        writeln!(f, "{THIN_RULE}")?;
        if r.all_close {
            writeln!(f, "Status:          PASSED")?;
        } else {
            writeln!(f, "Status:          FAILED")?;
            writeln!(
                f,
                "Failures:        {} / {} ({:.2}%)",
                r.num_failures, r.num_elements, r.failure_rate
            )?;
        }

        writeln!(f, "{THIN_RULE}")?;
        writeln!(f, "Error Statistics:")?;
        writeln!(f, "  Max Absolute:  {:.6e}", r.max_abs_error)?;
        writeln!(f, "  Mean Absolute: {:.6e}", r.mean_abs_error)?;
        writeln!(f, "  RMS Error:     {:.6e}", r.rms_error)?;
        writeln!(f, "  Max Relative:  {:.6}%", r.max_rel_error * 100.0)?;
        writeln!(f, "  Mean Relative: {:.6}%", r.mean_rel_error * 100.0)?;

        writeln!(f, "{THIN_RULE}")?;
        writeln!(f, "Tolerances:")?;
        writeln!(f, "  Absolute:      {:.3e}", r.abs_tolerance)?;
        writeln!(f, "  Relative:      {:.3e}", r.rel_tolerance)?;

        if let Some(worst) = &r.worst {
            writeln!(f, "{THIN_RULE}")?;
            writeln!(f, "Worst Error Location:")?;
            writeln!(f, "  Position:      [{}, {}]", worst.row, worst.col)?;
            writeln!(f, "  {}:  {:.10e}", self.label_a, worst.this_value)?;
            writeln!(f, "  {}:  {:.10e}", self.label_b, worst.other_value)?;
            writeln!(
                f,
                "  Difference:    {:.10e}",
                worst.this_value - worst.other_value
            )?;
        }
        write!(f, "{RULE}")
    }
}

fn log_report(report: &ComparisonReport) {
    if report.passed() {
        info!("\n{report}");
    } else {
        warn!("\n{report}");
    }
}

/// Compares two results, logs the report and returns whether they agree.
pub fn compare_and_report(
    x: &Matrix,
    y: &Matrix,
    label_x: &str,
    label_y: &str,
    abs_tol: f64,
    rel_tol: f64,
) -> bool {
    let report = ComparisonReport::new(label_x, label_y, x.compare(y, abs_tol, rel_tol));
    log_report(&report);
    report.passed()
}

/// Outcome of checking one result against the reference product.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub passed: bool,
    pub report: ComparisonReport,
}

/// Recomputes `a * b` with the reference algorithm and compares `result`
/// against it using the configured tolerances.
pub fn validate_against_reference(
    result: &Matrix,
    a: &Matrix,
    b: &Matrix,
    algorithm: Algorithm,
    config: &Config,
) -> Result<Validation> {
    info!("computing reference result");
    let expected = reference::multiply(a, b)?;

    info!("comparing {algorithm} against {REFERENCE_LABEL}");
    let report = ComparisonReport::new(
        algorithm.to_string(),
        REFERENCE_LABEL,
        compare(result, &expected, config.tolerance),
    );
    log_report(&report);

    Ok(Validation {
        passed: report.passed(),
        report,
    })
}

/// Progress of a verification suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteStage {
    Idle,
    /// Running the algorithm at this index of the selection.
    RunningAlgorithm(usize),
    PairwiseComparing,
    Summarized,
}

/// One algorithm's result and how long it took.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmRun {
    pub algorithm: Algorithm,
    pub elapsed: Duration,
    pub result: Matrix,
}

/// Everything a verification suite produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteReport {
    pub rows: usize,
    pub cols: usize,
    pub mode: ParallelMode,
    pub runs: Vec<AlgorithmRun>,
    /// One entry per unordered pair of runs, in selection order.
    pub comparisons: Vec<ComparisonReport>,
    pub all_passed: bool,
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{WIDE_RULE}")?;
        writeln!(f, "       VERIFICATION SUITE")?;
        writeln!(f, "{WIDE_RULE}")?;
        writeln!(f, "Matrix Size:     {}x{}", self.rows, self.cols)?;
        let names: Vec<String> = self.runs.iter().map(|r| r.algorithm.to_string()).collect();
        writeln!(f, "Algorithms:      {}", names.join(", "))?;
        writeln!(f, "Execution Mode:  {}", self.mode)?;
        writeln!(f, "{WIDE_RULE}")?;
        writeln!(f)?;

        writeln!(f, "{WIDE_RULE}")?;
        writeln!(f, "       PAIRWISE COMPARISONS")?;
        writeln!(f, "{WIDE_RULE}")?;
        for comparison in &self.comparisons {
            writeln!(f)?;
            writeln!(f, "{comparison}")?;
        }
        writeln!(f)?;

        writeln!(f, "{WIDE_RULE}")?;
        writeln!(f, "       VERIFICATION SUMMARY")?;
        writeln!(f, "{WIDE_RULE}")?;
        writeln!(f)?;
        writeln!(f, "Execution Times:")?;
        for run in &self.runs {
            writeln!(
                f,
                "  {:>12}: {:.6} s",
                run.algorithm.to_string(),
                run.elapsed.as_secs_f64()
            )?;
        }
        writeln!(f)?;
        let status = if self.all_passed {
            "ALL TESTS PASSED"
        } else {
            "SOME TESTS FAILED"
        };
        writeln!(f, "Overall Status:  {status}")?;
        write!(f, "{WIDE_RULE}")
    }
}

fn advance(stage: &mut SuiteStage, next: SuiteStage) {
    let current = *stage;
    debug!(from = ?current, to = ?next, "verification suite");
    *stage = next;
}

/// Runs every algorithm in `config.verify_algorithms` on `a * b` in the
/// configured mode and compares all pairs of results.
///
/// Only the sequential and shared-memory modes are supported. The first
/// algorithm that fails aborts the suite with its error.
pub fn run_verification_suite(a: &Matrix, b: &Matrix, config: &Config) -> Result<SuiteReport> {
    if config.mode.is_distributed() {
        return Err(configuration_error(format!(
            "the verification suite cannot run in {} mode",
            config.mode
        )));
    }
    if config.verify_algorithms.is_empty() {
        return Err(configuration_error(
            "verification suite needs at least one algorithm",
        ));
    }

    let mut stage = SuiteStage::Idle;
    info!(
        rows = a.rows(),
        cols = b.cols(),
        mode = %config.mode,
        algorithms = config.verify_algorithms.len(),
        "starting verification suite"
    );

    let mut runs = Vec::with_capacity(config.verify_algorithms.len());
    for (index, &algorithm) in config.verify_algorithms.iter().enumerate() {
        advance(&mut stage, SuiteStage::RunningAlgorithm(index));
        let algo_config = config.clone().with_algorithm(algorithm);

        let start = Instant::now();
        let result = dispatch::multiply(a, b, &algo_config, None)?;
        let elapsed = start.elapsed();
        info!("{algorithm} finished in {:.6} s", elapsed.as_secs_f64());

        runs.push(AlgorithmRun {
            algorithm,
            elapsed,
            result,
        });
    }

    advance(&mut stage, SuiteStage::PairwiseComparing);
    let mut comparisons = Vec::new();
    for (i, first) in runs.iter().enumerate() {
        for second in &runs[i + 1..] {
            let report = ComparisonReport::new(
                first.algorithm.to_string(),
                second.algorithm.to_string(),
                compare(&first.result, &second.result, config.tolerance),
            );
            if !report.passed() {
                warn!(
                    "{} and {} disagree on {} elements",
                    report.label_a, report.label_b, report.result.num_failures
                );
            }
            comparisons.push(report);
        }
    }
    let all_passed = comparisons.iter().all(ComparisonReport::passed);

    advance(&mut stage, SuiteStage::Summarized);
    if all_passed {
        info!("verification suite passed");
    } else {
        warn!("verification suite found disagreeing results");
    }

    Ok(SuiteReport {
        rows: a.rows(),
        cols: b.cols(),
        mode: config.mode,
        runs,
        comparisons,
        all_passed,
    })
}
