//! Multiplication strategies.
//!
//! Each algorithm module exposes one function per parallel mode:
//! `sequential`, `shared_memory`, `distributed` and `hybrid`. The
//! distributed variants share [`row_distributed`], which broadcasts `B`,
//! computes this worker's row slice of `A × B` and all-gathers the slices.

pub mod naive;
pub mod reference;
pub mod strassen;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::cluster::{Communicator, RowPartition, ROOT};
use crate::error::{configuration_error, shape_mismatch, thread_pool_error, Result};
use crate::matrix::Matrix;

/// Fails unless `A × B` is defined.
pub(crate) fn check_multipliable(a: &Matrix, b: &Matrix) -> Result<()> {
    if a.cols() != b.rows() {
        return Err(shape_mismatch("multiply", a.shape(), b.shape()));
    }
    Ok(())
}

/// Fails unless `a` and `b` are square and of equal size.
pub(crate) fn check_square_pair(a: &Matrix, b: &Matrix) -> Result<()> {
    if !a.is_square() || !b.is_square() || a.rows() != b.rows() {
        return Err(configuration_error(format!(
            "Strassen requires square matrices of the same size, got {}x{} and {}x{}",
            a.rows(),
            a.cols(),
            b.rows(),
            b.cols()
        )));
    }
    Ok(())
}

/// Builds the per-call pool used by the shared-memory strategies.
pub(crate) fn thread_pool(threads: usize) -> Result<ThreadPool> {
    if threads == 0 {
        return Err(configuration_error("thread count must be at least 1"));
    }
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|index| format!("densemm-{index}"))
        .build()
        .map_err(|e| thread_pool_error(e.to_string()))
}

/// Row-partitioned execution shared by every distributed strategy.
///
/// `B` is broadcast from the root, so only the root's copy matters; `A` is
/// read locally, each worker slicing out the rows its rank owns. The caller
/// validates shapes before calling, which keeps a bad input from ever
/// reaching a collective.
pub(crate) fn row_distributed<F>(
    comm: &mut Communicator,
    a: &Matrix,
    b: &Matrix,
    local: F,
) -> Result<Matrix>
where
    F: FnOnce(&Matrix, &Matrix) -> Result<Matrix>,
{
    let b = comm.broadcast(ROOT, comm.is_root().then(|| b.clone()))?;
    if b.rows() != a.cols() {
        return Err(shape_mismatch("multiply", a.shape(), b.shape()));
    }

    let partition = RowPartition::new(a.rows(), comm.size())?;
    let range = partition.range(comm.rank());
    debug!(
        rank = comm.rank(),
        rows = ?range,
        "computing local row slice"
    );

    let a_local = a.row_block(range.start, range.len())?;
    let c_local = local(&a_local, &b)?;
    comm.all_gather_rows(c_local, &partition)
}
