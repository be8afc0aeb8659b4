//! Maps an (algorithm, mode) pair to the function that runs it.

use std::fmt;

use tracing::debug;

use crate::algorithms::{naive, reference, strassen};
use crate::cluster::Communicator;
use crate::config::{Algorithm, Config, ParallelMode};
use crate::error::{configuration_error, Result};
use crate::matrix::Matrix;

/// A strategy that runs entirely on the calling thread (and its pool).
pub type LocalFn = fn(&Matrix, &Matrix, &Config) -> Result<Matrix>;

/// A strategy that runs on every worker of a cluster.
pub type DistributedFn = fn(&mut Communicator, &Matrix, &Matrix, &Config) -> Result<Matrix>;

/// The multiplication function selected for a configuration.
#[derive(Clone, Copy)]
pub enum Strategy {
    Local(LocalFn),
    /// Needs a [`Communicator`]; every worker must call it.
    Distributed(DistributedFn),
}

impl Strategy {
    pub fn is_distributed(&self) -> bool {
        matches!(self, Strategy::Distributed(_))
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Local(_) => f.write_str("Strategy::Local"),
            Strategy::Distributed(_) => f.write_str("Strategy::Distributed"),
        }
    }
}

fn naive_sequential(a: &Matrix, b: &Matrix, config: &Config) -> Result<Matrix> {
    naive::sequential(a, b, &config.optimization)
}

fn naive_shared(a: &Matrix, b: &Matrix, config: &Config) -> Result<Matrix> {
    naive::shared_memory(a, b, &config.optimization, config.threads)
}

fn naive_distributed(comm: &mut Communicator, a: &Matrix, b: &Matrix, config: &Config) -> Result<Matrix> {
    naive::distributed(comm, a, b, &config.optimization)
}

fn naive_hybrid(comm: &mut Communicator, a: &Matrix, b: &Matrix, config: &Config) -> Result<Matrix> {
    naive::hybrid(comm, a, b, &config.optimization, config.threads)
}

fn strassen_sequential(a: &Matrix, b: &Matrix, _config: &Config) -> Result<Matrix> {
    strassen::sequential(a, b)
}

fn strassen_shared(a: &Matrix, b: &Matrix, config: &Config) -> Result<Matrix> {
    strassen::shared_memory(a, b, config.threads)
}

fn strassen_distributed(
    comm: &mut Communicator,
    a: &Matrix,
    b: &Matrix,
    _config: &Config,
) -> Result<Matrix> {
    strassen::distributed(comm, a, b)
}

fn strassen_hybrid(comm: &mut Communicator, a: &Matrix, b: &Matrix, config: &Config) -> Result<Matrix> {
    strassen::hybrid(comm, a, b, config.threads)
}

fn reference_local(a: &Matrix, b: &Matrix, _config: &Config) -> Result<Matrix> {
    reference::multiply(a, b)
}

/// Picks the strategy for `algorithm` under `mode`.
///
/// The reference product is only defined for the sequential and
/// shared-memory modes; it always runs single-threaded.
pub fn select(algorithm: Algorithm, mode: ParallelMode) -> Result<Strategy> {
    use Algorithm::*;
    use ParallelMode::*;

    let strategy = match (algorithm, mode) {
        (Naive, Sequential) => Strategy::Local(naive_sequential),
        (Naive, SharedMemory) => Strategy::Local(naive_shared),
        (Naive, ParallelMode::Distributed) => Strategy::Distributed(naive_distributed),
        (Naive, Hybrid) => Strategy::Distributed(naive_hybrid),
        (Strassen, Sequential) => Strategy::Local(strassen_sequential),
        (Strassen, SharedMemory) => Strategy::Local(strassen_shared),
        (Strassen, ParallelMode::Distributed) => Strategy::Distributed(strassen_distributed),
        (Strassen, Hybrid) => Strategy::Distributed(strassen_hybrid),
        (Reference, Sequential | SharedMemory) => Strategy::Local(reference_local),
        (Reference, mode @ (ParallelMode::Distributed | Hybrid)) => {
            return Err(configuration_error(format!(
                "the reference algorithm cannot run in {mode} mode"
            )))
        }
    };
    debug!(%algorithm, %mode, ?strategy, "strategy selected");
    Ok(strategy)
}

/// Multiplies `a` by `b` with the strategy `config` selects.
///
/// Distributed strategies need `comm`; every worker of the cluster must make
/// the same call.
pub fn multiply(
    a: &Matrix,
    b: &Matrix,
    config: &Config,
    comm: Option<&mut Communicator>,
) -> Result<Matrix> {
    match (select(config.algorithm, config.mode)?, comm) {
        (Strategy::Local(run), _) => run(a, b, config),
        (Strategy::Distributed(run), Some(comm)) => run(comm, a, b, config),
        (Strategy::Distributed(_), None) => Err(configuration_error(format!(
            "{} mode needs a worker context",
            config.mode
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;

    #[test]
    fn test_every_pair_except_distributed_reference_is_mapped() {
        for algorithm in Algorithm::ALL {
            for mode in [
                ParallelMode::Sequential,
                ParallelMode::SharedMemory,
                ParallelMode::Distributed,
                ParallelMode::Hybrid,
            ] {
                let selected = select(algorithm, mode);
                if algorithm == Algorithm::Reference && mode.is_distributed() {
                    assert!(selected.unwrap_err().is_configuration());
                } else {
                    assert_eq!(selected.unwrap().is_distributed(), mode.is_distributed());
                }
            }
        }
    }

    #[test]
    fn test_distributed_without_context() {
        let config = Config::new(Algorithm::Naive, ParallelMode::Distributed);
        let a = Matrix::square(2);
        let err = multiply(&a, &a, &config, None).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_local_ignores_context() {
        let a = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let config = Config::new(Algorithm::Strassen, ParallelMode::Sequential);
        let results = Cluster::single()
            .launch(|comm| multiply(&a, &a, &config, Some(comm)))
            .unwrap();
        assert_eq!(results[0].as_slice(), &[7.0, 10.0, 15.0, 22.0]);
    }
}
