//! Iterative triple-loop product.
//!
//! The plain kernel walks the output in (row, column) order and reduces over
//! the shared dimension innermost. The cache-blocked kernel tiles all three
//! loops by `block_size` and carries each cell's running sum through the
//! output between `k` tiles. Both add the products of a cell in ascending `k`
//! order, so every variant here produces bit-identical results.
//!
//! The threaded variants split the output into rectangular tiles, both
//! across rows and across columns, and hand the tiles to rayon. Each output
//! cell belongs to exactly one tile.

use std::ops::Range;

use rayon::prelude::*;

use crate::algorithms::{check_multipliable, row_distributed, thread_pool};
use crate::cluster::Communicator;
use crate::config::Optimization;
use crate::error::Result;
use crate::matrix::Matrix;

/// Region of the output computed by one task.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Tile {
    rows: Range<usize>,
    cols: Range<usize>,
}

impl Tile {
    fn area(&self) -> usize {
        self.rows.len() * self.cols.len()
    }
}

/// Covers an `m x n` output with `height x width` tiles in row-major order.
fn tile_grid(m: usize, n: usize, height: usize, width: usize) -> Vec<Tile> {
    let (height, width) = (height.max(1), width.max(1));
    (0..m)
        .step_by(height)
        .flat_map(|ii| {
            (0..n).step_by(width).map(move |jj| Tile {
                rows: ii..(ii + height).min(m),
                cols: jj..(jj + width).min(n),
            })
        })
        .collect()
}

/// Column width for the one-row tiles of the plain kernel.
///
/// Whole rows when there are at least as many rows as threads, otherwise
/// rows are cut into enough column strips to occupy every thread.
fn plain_tile_width(m: usize, n: usize, threads: usize) -> usize {
    if m == 0 || m >= threads {
        return n;
    }
    n.div_ceil(threads.div_ceil(m)).max(1)
}

/// Adds `A[tile.rows, :] * B[:, tile.cols]` into `out`, whose row stride is
/// `stride` and whose first element is the tile's top-left cell.
///
/// The shared dimension is walked in chunks of `k_block`; within a cell the
/// products are always summed in ascending `k` order.
#[allow(clippy::too_many_arguments)]
fn compute_tile(
    a: &[f64],
    b: &[f64],
    k: usize,
    n: usize,
    tile: &Tile,
    k_block: usize,
    out: &mut [f64],
    stride: usize,
) {
    let (r0, c0) = (tile.rows.start, tile.cols.start);
    for kk in (0..k).step_by(k_block.max(1)) {
        let k_max = (kk + k_block).min(k);
        for i in tile.rows.clone() {
            let a_row = &a[i * k..(i + 1) * k];
            let out_row = &mut out[(i - r0) * stride..];
            for j in tile.cols.clone() {
                let cell = &mut out_row[j - c0];
                let mut sum = *cell;
                for (p, &a_ip) in a_row.iter().enumerate().take(k_max).skip(kk) {
                    sum += a_ip * b[p * n + j];
                }
                *cell = sum;
            }
        }
    }
}

/// `c = a * b` over the rows held in `c`.
///
/// `a` holds the same rows as `c` with `k` columns, `b` is `k x n`.
fn kernel_rows(a: &[f64], b: &[f64], c: &mut [f64], k: usize, n: usize) {
    for (a_row, c_row) in a.chunks_exact(k).zip(c.chunks_exact_mut(n)) {
        for (j, c_ij) in c_row.iter_mut().enumerate() {
            let mut sum = 0.0;
            for (p, &a_ip) in a_row.iter().enumerate() {
                sum += a_ip * b[p * n + j];
            }
            *c_ij = sum;
        }
    }
}

/// Computes `tiles` in parallel and writes them into `c` (zeroed, `m x n`).
fn par_tiles(
    a: &[f64],
    b: &[f64],
    c: &mut [f64],
    k: usize,
    n: usize,
    tiles: Vec<Tile>,
    k_block: usize,
) {
    let computed: Vec<(Tile, Vec<f64>)> = tiles
        .into_par_iter()
        .map(|tile| {
            let width = tile.cols.len();
            let mut buf = vec![0.0; tile.area()];
            compute_tile(a, b, k, n, &tile, k_block, &mut buf, width);
            (tile, buf)
        })
        .collect();

    for (tile, buf) in computed {
        let width = tile.cols.len();
        for (row, i) in buf.chunks_exact(width).zip(tile.rows.clone()) {
            let start = i * n + tile.cols.start;
            c[start..start + width].copy_from_slice(row);
        }
    }
}

/// Multiplies on the current thread. Shapes must already be validated.
pub(crate) fn multiply_unchecked(a: &Matrix, b: &Matrix, opt: &Optimization) -> Matrix {
    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    let mut c = Matrix::new(m, n);
    if m == 0 || n == 0 || k == 0 {
        return c;
    }

    let (a, b) = (a.as_slice(), b.as_slice());
    match opt.tile() {
        Some(block) => {
            let out = c.as_mut_slice();
            for tile in tile_grid(m, n, block, block) {
                let offset = tile.rows.start * n + tile.cols.start;
                compute_tile(a, b, k, n, &tile, block, &mut out[offset..], n);
            }
        }
        None => kernel_rows(a, b, c.as_mut_slice(), k, n),
    }
    c
}

/// Multiplies on the current rayon pool. Shapes must already be validated.
///
/// Blocked mode hands out `block x block` output tiles. Plain mode hands out
/// rows, split further into column strips when the pool has more threads
/// than the output has rows.
pub(crate) fn par_multiply_unchecked(a: &Matrix, b: &Matrix, opt: &Optimization) -> Matrix {
    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    let mut c = Matrix::new(m, n);
    if m == 0 || n == 0 || k == 0 {
        return c;
    }

    let (a, b) = (a.as_slice(), b.as_slice());
    match opt.tile() {
        Some(block) => {
            let tiles = tile_grid(m, n, block, block);
            par_tiles(a, b, c.as_mut_slice(), k, n, tiles, block);
        }
        None => {
            let width = plain_tile_width(m, n, rayon::current_num_threads());
            if width == n {
                c.as_mut_slice()
                    .par_chunks_mut(n)
                    .zip(a.par_chunks(k))
                    .for_each(|(c_row, a_row)| kernel_rows(a_row, b, c_row, k, n));
            } else {
                let tiles = tile_grid(m, n, 1, width);
                par_tiles(a, b, c.as_mut_slice(), k, n, tiles, k);
            }
        }
    }
    c
}

/// Single-threaded product.
pub fn sequential(a: &Matrix, b: &Matrix, opt: &Optimization) -> Result<Matrix> {
    check_multipliable(a, b)?;
    Ok(multiply_unchecked(a, b, opt))
}

/// Product computed by a pool of `threads` workers.
pub fn shared_memory(a: &Matrix, b: &Matrix, opt: &Optimization, threads: usize) -> Result<Matrix> {
    check_multipliable(a, b)?;
    let pool = thread_pool(threads)?;
    Ok(pool.install(|| par_multiply_unchecked(a, b, opt)))
}

/// Rows of `A` split across the workers of `comm`, each slice computed
/// sequentially.
pub fn distributed(comm: &mut Communicator, a: &Matrix, b: &Matrix, opt: &Optimization) -> Result<Matrix> {
    check_multipliable(a, b)?;
    row_distributed(comm, a, b, |a_local, b_local| {
        Ok(multiply_unchecked(a_local, b_local, opt))
    })
}

/// Like [`distributed`], with each worker's slice computed by a pool of
/// `threads` workers.
pub fn hybrid(
    comm: &mut Communicator,
    a: &Matrix,
    b: &Matrix,
    opt: &Optimization,
    threads: usize,
) -> Result<Matrix> {
    check_multipliable(a, b)?;
    let pool = thread_pool(threads)?;
    row_distributed(comm, a, b, |a_local, b_local| {
        Ok(pool.install(|| par_multiply_unchecked(a_local, b_local, opt)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn random(rows: usize, cols: usize, seed: u64) -> Matrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut m = Matrix::new(rows, cols);
        m.randomize_with(&mut rng, -1.0..1.0);
        m
    }

    #[test]
    fn test_sequential_2x3_times_3x2() {
        let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Matrix::from_vec(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = sequential(&a, &b, &Optimization::default()).unwrap();
        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let a = Matrix::new(2, 3);
        let b = Matrix::new(2, 3);
        assert!(sequential(&a, &b, &Optimization::default())
            .unwrap_err()
            .is_configuration());
        assert!(shared_memory(&a, &b, &Optimization::default(), 2).is_err());
    }

    #[test]
    fn test_blocked_matches_plain() {
        let a = random(37, 29, 1);
        let b = random(29, 41, 2);
        let plain = sequential(&a, &b, &Optimization::default()).unwrap();
        for block in [1, 4, 7, 64] {
            let blocked = sequential(&a, &b, &Optimization::blocked(block)).unwrap();
            assert_eq!(plain, blocked, "block size {block}");
        }
    }

    #[test]
    fn test_shared_memory_is_bit_identical() {
        let a = random(53, 31, 3);
        let b = random(31, 19, 4);
        for opt in [Optimization::default(), Optimization::blocked(8)] {
            let expected = sequential(&a, &b, &opt).unwrap();
            for threads in [1, 2, 5] {
                let actual = shared_memory(&a, &b, &opt, threads).unwrap();
                assert_eq!(actual, expected, "threads {threads}, {opt:?}");
            }
        }
    }

    #[test]
    fn test_tile_grid_splits_both_dimensions() {
        // A single row stripe of 32 rows still yields four 64-wide tiles.
        assert_eq!(tile_grid(32, 256, 64, 64).len(), 4);
        let tiles = tile_grid(100, 100, 64, 64);
        assert_eq!(tiles.len(), 4);
        assert_eq!(
            tiles[3],
            Tile {
                rows: 64..100,
                cols: 64..100
            }
        );
        for (m, n, h, w) in [(37, 41, 8, 8), (1, 100, 1, 25), (5, 3, 64, 64)] {
            let covered: usize = tile_grid(m, n, h, w).iter().map(Tile::area).sum();
            assert_eq!(covered, m * n, "{m}x{n} in {h}x{w} tiles");
        }
    }

    #[test]
    fn test_plain_tiles_split_columns_when_rows_are_scarce() {
        assert_eq!(plain_tile_width(64, 100, 4), 100);
        assert_eq!(plain_tile_width(1, 100, 4), 25);
        assert_eq!(tile_grid(1, 100, 1, plain_tile_width(1, 100, 4)).len(), 4);
        assert_eq!(tile_grid(3, 10, 1, plain_tile_width(3, 10, 8)).len(), 9);
        assert_eq!(plain_tile_width(2, 1, 8), 1);
    }

    #[test]
    fn test_few_rows_are_bit_identical_across_threads() {
        let b = random(23, 100, 5);
        for m in [1, 3, 40] {
            let a = random(m, 23, 6 + m as u64);
            let opts = [
                Optimization::default(),
                Optimization::blocked(64),
                Optimization::blocked(16),
            ];
            for opt in opts {
                let expected = sequential(&a, &b, &opt).unwrap();
                let actual = shared_memory(&a, &b, &opt, 4).unwrap();
                assert_eq!(actual, expected, "m = {m}, {opt:?}");
            }
        }
    }

    #[test]
    fn test_empty_dimensions() {
        let a = Matrix::new(3, 0);
        let b = Matrix::new(0, 4);
        let c = shared_memory(&a, &b, &Optimization::default(), 2).unwrap();
        assert_eq!(c.shape(), (3, 4));
        assert!(c.as_slice().iter().all(|&v| v == 0.0));
    }
}
