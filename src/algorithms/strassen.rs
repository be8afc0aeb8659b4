//! Strassen's recursive product for square matrices.
//!
//! Each level splits both operands into quadrants and forms the seven
//! products
//!
//! ```text
//! M1 = (A11 + A22)(B11 + B22)    M5 = (A11 + A12) B22
//! M2 = (A21 + A22) B11           M6 = (A21 - A11)(B11 + B12)
//! M3 = A11 (B12 - B22)           M7 = (A12 - A22)(B21 + B22)
//! M4 = A22 (B21 - B11)
//! ```
//!
//! which combine into `C11 = M1 + M4 - M5 + M7`, `C12 = M3 + M5`,
//! `C21 = M2 + M4` and `C22 = M1 - M2 + M3 + M6`. Sizes at or below
//! [`THRESHOLD`] fall through to the naive kernel. Odd sizes are padded
//! with one zero row and column and the result is cut back afterwards.

use tracing::debug;

use crate::algorithms::naive::{multiply_unchecked, par_multiply_unchecked};
use crate::algorithms::{check_square_pair, row_distributed, thread_pool};
use crate::cluster::Communicator;
use crate::config::Optimization;
use crate::error::{configuration_error, Result};
use crate::matrix::Matrix;

/// Largest size handled by the naive base case.
pub const THRESHOLD: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exec {
    Sequential,
    /// Fork the seven products on the current rayon pool.
    Parallel,
}

fn base_case(a: &Matrix, b: &Matrix, exec: Exec) -> Matrix {
    let opt = Optimization::default();
    match exec {
        Exec::Sequential => multiply_unchecked(a, b, &opt),
        Exec::Parallel => par_multiply_unchecked(a, b, &opt),
    }
}

struct Quadrants {
    q11: Matrix,
    q12: Matrix,
    q21: Matrix,
    q22: Matrix,
}

fn split(m: &Matrix) -> Result<Quadrants> {
    let n = m.rows();
    let h = n / 2;
    Ok(Quadrants {
        q11: m.submatrix(0, 0, h, h)?,
        q12: m.submatrix(0, h, h, n)?,
        q21: m.submatrix(h, 0, n, h)?,
        q22: m.submatrix(h, h, n, n)?,
    })
}

fn pad_to_even(m: &Matrix) -> Result<Matrix> {
    let n = m.rows() + 1;
    let mut padded = Matrix::square(n);
    padded.set_submatrix(0, 0, m)?;
    Ok(padded)
}

/// Multiplies two equally sized square matrices.
fn recurse(a: &Matrix, b: &Matrix, exec: Exec) -> Result<Matrix> {
    let n = a.rows();
    if n <= THRESHOLD {
        return Ok(base_case(a, b, exec));
    }

    if n % 2 == 1 {
        let c = recurse(&pad_to_even(a)?, &pad_to_even(b)?, exec)?;
        return c.submatrix(0, 0, n, n);
    }

    let Quadrants {
        q11: a11,
        q12: a12,
        q21: a21,
        q22: a22,
    } = split(a)?;
    let Quadrants {
        q11: b11,
        q12: b12,
        q21: b21,
        q22: b22,
    } = split(b)?;

    let operands = [
        (a11.add(&a22)?, b11.add(&b22)?),
        (a21.add(&a22)?, b11.clone()),
        (a11.clone(), b12.sub(&b22)?),
        (a22.clone(), b21.sub(&b11)?),
        (a11.add(&a12)?, b22.clone()),
        (a21.sub(&a11)?, b11.add(&b12)?),
        (a12.sub(&a22)?, b21.add(&b22)?),
    ];

    let [m1, m2, m3, m4, m5, m6, m7] = match exec {
        Exec::Sequential => {
            let mut products = Vec::with_capacity(operands.len());
            for (x, y) in &operands {
                products.push(recurse(x, y, exec)?);
            }
            seven(products)?
        }
        Exec::Parallel => {
            let product = |i: usize| {
                let (x, y) = &operands[i];
                recurse(x, y, exec)
            };
            let (((p1, p2), (p3, p4)), ((p5, p6), p7)) = rayon::join(
                || {
                    rayon::join(
                        || rayon::join(|| product(0), || product(1)),
                        || rayon::join(|| product(2), || product(3)),
                    )
                },
                || {
                    rayon::join(
                        || rayon::join(|| product(4), || product(5)),
                        || product(6),
                    )
                },
            );
            [p1?, p2?, p3?, p4?, p5?, p6?, p7?]
        }
    };

    let mut c11 = m1.add(&m4)?;
    c11.sub_assign(&m5)?;
    c11.add_assign(&m7)?;
    let c12 = m3.add(&m5)?;
    let c21 = m2.add(&m4)?;
    let mut c22 = m1.sub(&m2)?;
    c22.add_assign(&m3)?;
    c22.add_assign(&m6)?;

    let h = n / 2;
    let mut c = Matrix::square(n);
    c.set_submatrix(0, 0, &c11)?;
    c.set_submatrix(0, h, &c12)?;
    c.set_submatrix(h, 0, &c21)?;
    c.set_submatrix(h, h, &c22)?;
    Ok(c)
}

fn seven(products: Vec<Matrix>) -> Result<[Matrix; 7]> {
    let count = products.len();
    products.try_into().map_err(|_| {
        configuration_error(format!("expected 7 Strassen products, got {count}"))
    })
}

/// Runs Strassen on a worker's slice when it is square, naive otherwise.
fn local_slice(a_local: &Matrix, b: &Matrix, exec: Exec) -> Result<Matrix> {
    if a_local.is_square() && a_local.rows() == b.rows() {
        recurse(a_local, b, exec)
    } else {
        debug!(
            rows = a_local.rows(),
            cols = a_local.cols(),
            "slice is not square, using the naive kernel"
        );
        Ok(base_case(a_local, b, exec))
    }
}

/// Single-threaded Strassen.
pub fn sequential(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    check_square_pair(a, b)?;
    recurse(a, b, Exec::Sequential)
}

/// Strassen with the seven products of every level forked on a pool of
/// `threads` workers.
pub fn shared_memory(a: &Matrix, b: &Matrix, threads: usize) -> Result<Matrix> {
    check_square_pair(a, b)?;
    let pool = thread_pool(threads)?;
    pool.install(|| recurse(a, b, Exec::Parallel))
}

/// Row-partitioned Strassen.
///
/// With more than one worker every slice is rectangular, so the local
/// product is the naive kernel and the result matches the naive
/// distributed strategy exactly.
pub fn distributed(comm: &mut Communicator, a: &Matrix, b: &Matrix) -> Result<Matrix> {
    check_square_pair(a, b)?;
    row_distributed(comm, a, b, |a_local, b_local| {
        local_slice(a_local, b_local, Exec::Sequential)
    })
}

/// Like [`distributed`], with each worker's slice computed on a pool of
/// `threads` workers.
pub fn hybrid(comm: &mut Communicator, a: &Matrix, b: &Matrix, threads: usize) -> Result<Matrix> {
    check_square_pair(a, b)?;
    let pool = thread_pool(threads)?;
    row_distributed(comm, a, b, |a_local, b_local| {
        pool.install(|| local_slice(a_local, b_local, Exec::Parallel))
    })
}
