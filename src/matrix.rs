//! Row-major dense matrix of `f64` values.
//!
//! [`Matrix`] owns its storage: cloning duplicates the buffer, and
//! submatrix extraction returns an independent copy. Element `(i, j)` lives
//! at `data[i * cols + j]`.

use std::fmt;
use std::ops::{Index, IndexMut, Range};

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use crate::error::{configuration_error, shape_mismatch, Result};

/// Maximum number of rows and columns shown by the `Display` impl.
const DISPLAY_LIMIT: usize = 10;

/// Dense row-major matrix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

/// Position and values of the element with the largest absolute error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorstElement {
    pub row: usize,
    pub col: usize,
    /// Value taken from the matrix `compare` was called on.
    pub this_value: f64,
    /// Value taken from the matrix passed to `compare`.
    pub other_value: f64,
}

/// Outcome of comparing two matrices element by element.
///
/// Produced fresh by [`Matrix::compare`]; the statistics are only
/// meaningful when the shapes matched (`num_elements > 0`).
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    pub all_close: bool,
    pub num_elements: usize,
    pub num_failures: usize,
    /// Percentage of elements outside tolerance.
    pub failure_rate: f64,
    pub max_abs_error: f64,
    pub mean_abs_error: f64,
    pub max_rel_error: f64,
    pub mean_rel_error: f64,
    pub rms_error: f64,
    pub abs_tolerance: f64,
    pub rel_tolerance: f64,
    /// `None` when the shapes differed or every element matched exactly.
    pub worst: Option<WorstElement>,
}

impl ComparisonResult {
    fn empty(abs_tolerance: f64, rel_tolerance: f64) -> Self {
        Self {
            all_close: true,
            num_elements: 0,
            num_failures: 0,
            failure_rate: 0.0,
            max_abs_error: 0.0,
            mean_abs_error: 0.0,
            max_rel_error: 0.0,
            mean_rel_error: 0.0,
            rms_error: 0.0,
            abs_tolerance,
            rel_tolerance,
            worst: None,
        }
    }
}

impl Matrix {
    /// Creates a zero-filled `rows x cols` matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Creates a zero-filled `n x n` matrix.
    pub fn square(n: usize) -> Self {
        Self::new(n, n)
    }

    /// Wraps an existing row-major buffer.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(configuration_error(format!(
                "buffer of {} elements cannot hold a {}x{} matrix",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Builds a matrix by evaluating `f(row, col)` for every element.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> f64,
    {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                data.push(f(i, j));
            }
        }
        Self { rows, cols, data }
    }

    /// Creates an `n x n` matrix with uniformly random entries in `range`.
    pub fn random<R: Rng + ?Sized>(n: usize, range: Range<f64>, rng: &mut R) -> Self {
        let mut m = Self::square(n);
        m.randomize_with(rng, range);
        m
    }

    #[inline(always)]
    fn index_of(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// True when `rows == cols`.
    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// Element count, `rows * cols`.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major storage.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutable row-major storage.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Consumes the matrix, returning its row-major storage.
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Reads element `(row, col)`.
    ///
    /// # Panics
    ///
    /// Panics if the position is outside the matrix.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self[(row, col)]
    }

    /// Writes element `(row, col)`.
    ///
    /// # Panics
    ///
    /// Panics if the position is outside the matrix.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self[(row, col)] = value;
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn zero(&mut self) {
        self.fill(0.0);
    }

    /// Overwrites every element with a uniform sample from `range`.
    pub fn randomize(&mut self, range: Range<f64>) {
        self.randomize_with(&mut rand::rng(), range);
    }

    /// Like [`Matrix::randomize`] with a caller-supplied generator, so runs
    /// can be reproduced from a seed.
    pub fn randomize_with<R: Rng + ?Sized>(&mut self, rng: &mut R, range: Range<f64>) {
        for value in self.data.iter_mut() {
            *value = rng.random_range(range.clone());
        }
    }

    /// Turns a square matrix into the identity.
    pub fn identity(&mut self) -> Result<()> {
        if !self.is_square() {
            return Err(configuration_error(format!(
                "identity matrix must be square, got {}x{}",
                self.rows, self.cols
            )));
        }
        self.zero();
        for i in 0..self.rows {
            let idx = self.index_of(i, i);
            self.data[idx] = 1.0;
        }
        Ok(())
    }

    /// Changes the shape, keeping the flat buffer prefix and zero-filling any
    /// new tail.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.data.resize(rows * cols, 0.0);
    }

    /// Copies the half-open region `[row_start, row_end) x [col_start, col_end)`
    /// into a new matrix.
    pub fn submatrix(
        &self,
        row_start: usize,
        col_start: usize,
        row_end: usize,
        col_end: usize,
    ) -> Result<Matrix> {
        if row_start > row_end || col_start > col_end || row_end > self.rows || col_end > self.cols
        {
            return Err(configuration_error(format!(
                "submatrix [{row_start}..{row_end}, {col_start}..{col_end}] is outside a {}x{} matrix",
                self.rows, self.cols
            )));
        }
        let sub_rows = row_end - row_start;
        let sub_cols = col_end - col_start;
        let mut data = Vec::with_capacity(sub_rows * sub_cols);
        for i in row_start..row_end {
            let start = self.index_of(i, col_start);
            data.extend_from_slice(&self.data[start..start + sub_cols]);
        }
        Ok(Matrix {
            rows: sub_rows,
            cols: sub_cols,
            data,
        })
    }

    /// Copies `count` full rows starting at `offset`.
    pub fn row_block(&self, offset: usize, count: usize) -> Result<Matrix> {
        self.submatrix(offset, 0, offset + count, self.cols)
    }

    /// Overwrites the region starting at `(row_start, col_start)` with `sub`.
    pub fn set_submatrix(&mut self, row_start: usize, col_start: usize, sub: &Matrix) -> Result<()> {
        if row_start + sub.rows > self.rows || col_start + sub.cols > self.cols {
            return Err(configuration_error(format!(
                "a {}x{} block at ({row_start}, {col_start}) does not fit in a {}x{} matrix",
                sub.rows, sub.cols, self.rows, self.cols
            )));
        }
        for i in 0..sub.rows {
            let dst = self.index_of(row_start + i, col_start);
            let src = i * sub.cols;
            self.data[dst..dst + sub.cols].copy_from_slice(&sub.data[src..src + sub.cols]);
        }
        Ok(())
    }

    fn check_same_shape(&self, other: &Matrix, operation: &'static str) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(shape_mismatch(operation, self.shape(), other.shape()));
        }
        Ok(())
    }

    /// Elementwise `self + other` as a new matrix.
    pub fn add(&self, other: &Matrix) -> Result<Matrix> {
        self.check_same_shape(other, "add")?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(x, y)| x + y)
            .collect();
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    /// Elementwise `self - other` as a new matrix.
    pub fn sub(&self, other: &Matrix) -> Result<Matrix> {
        self.check_same_shape(other, "sub")?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(x, y)| x - y)
            .collect();
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    /// `self += other`.
    pub fn add_assign(&mut self, other: &Matrix) -> Result<()> {
        self.check_same_shape(other, "add_assign")?;
        for (x, y) in self.data.iter_mut().zip(other.data.iter()) {
            *x += y;
        }
        Ok(())
    }

    /// `self -= other`.
    pub fn sub_assign(&mut self, other: &Matrix) -> Result<()> {
        self.check_same_shape(other, "sub_assign")?;
        for (x, y) in self.data.iter_mut().zip(other.data.iter()) {
            *x -= y;
        }
        Ok(())
    }

    /// True when the shapes match and no element differs by more than `epsilon`.
    pub fn equals(&self, other: &Matrix, epsilon: f64) -> bool {
        self.shape() == other.shape()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(x, y)| (x - y).abs() <= epsilon)
    }

    /// Compares against `other` using the combined tolerance
    /// `max(abs_tol, rel_tol * max(|x|, |y|))` per element.
    ///
    /// Differing shapes yield `all_close == false` with no statistics. A NaN
    /// on either side counts as a failure and becomes the worst element.
    pub fn compare(&self, other: &Matrix, abs_tol: f64, rel_tol: f64) -> ComparisonResult {
        let mut result = ComparisonResult::empty(abs_tol, rel_tol);

        if self.shape() != other.shape() {
            result.all_close = false;
            return result;
        }

        result.num_elements = self.data.len();

        let mut sum_abs = 0.0;
        let mut sum_rel = 0.0;
        let mut sum_sq = 0.0;

        for (idx, (&x, &y)) in self.data.iter().zip(other.data.iter()).enumerate() {
            let abs_error = (x - y).abs();
            let max_val = x.abs().max(y.abs());
            let rel_error = if max_val > 0.0 {
                abs_error / max_val
            } else {
                0.0
            };

            let tolerance = abs_tol.max(rel_tol * max_val);
            if abs_error.is_nan() || abs_error > tolerance {
                result.all_close = false;
                result.num_failures += 1;
            }

            sum_abs += abs_error;
            sum_rel += rel_error;
            sum_sq += abs_error * abs_error;

            if exceeds(abs_error, result.max_abs_error) {
                result.max_abs_error = abs_error;
                result.worst = Some(WorstElement {
                    row: idx / self.cols,
                    col: idx % self.cols,
                    this_value: x,
                    other_value: y,
                });
            }
            if exceeds(rel_error, result.max_rel_error) {
                result.max_rel_error = rel_error;
            }
        }

        if result.num_elements > 0 {
            let n = result.num_elements as f64;
            result.mean_abs_error = sum_abs / n;
            result.mean_rel_error = sum_rel / n;
            result.rms_error = (sum_sq / n).sqrt();
            result.failure_rate = 100.0 * result.num_failures as f64 / n;
        }

        result
    }

    /// Borrows the storage as an ndarray view.
    pub fn view(&self) -> ArrayView2<'_, f64> {
        // rows * cols == data.len() always holds, so the shape cannot be rejected.
        ArrayView2::from_shape((self.rows, self.cols), self.data.as_slice())
            .unwrap_or_else(|_| unreachable!("matrix buffer length matches its shape"))
    }

    pub fn to_array2(&self) -> Array2<f64> {
        self.view().to_owned()
    }
}

impl From<Array2<f64>> for Matrix {
    fn from(array: Array2<f64>) -> Self {
        let (rows, cols) = array.dim();
        let data = array.iter().copied().collect();
        Matrix { rows, cols, data }
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    #[inline(always)]
    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        assert!(row < self.rows && col < self.cols, "index ({row}, {col}) out of bounds");
        &self.data[self.index_of(row, col)]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    #[inline(always)]
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        assert!(row < self.rows && col < self.cols, "index ({row}, {col}) out of bounds");
        let idx = self.index_of(row, col);
        &mut self.data[idx]
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Matrix {}x{}:", self.rows, self.cols)?;
        let shown_rows = self.rows.min(DISPLAY_LIMIT);
        let shown_cols = self.cols.min(DISPLAY_LIMIT);
        for i in 0..shown_rows {
            for j in 0..shown_cols {
                write!(f, "{:>10.4} ", self.get(i, j))?;
            }
            if self.cols > DISPLAY_LIMIT {
                write!(f, "...")?;
            }
            writeln!(f)?;
        }
        if self.rows > DISPLAY_LIMIT {
            writeln!(f, "...")?;
        }
        Ok(())
    }
}

/// Running-maximum update that lets a NaN displace any number.
fn exceeds(value: f64, current: f64) -> bool {
    value > current || (value.is_nan() && !current.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn sequential(rows: usize, cols: usize) -> Matrix {
        Matrix::from_fn(rows, cols, |i, j| (i * cols + j) as f64)
    }

    #[test]
    fn test_new_is_zeroed() {
        let m = Matrix::new(3, 4);
        assert_eq!(m.shape(), (3, 4));
        assert_eq!(m.len(), 12);
        assert!(m.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        assert!(Matrix::from_vec(2, 2, vec![1.0; 3]).is_err());
        assert!(Matrix::from_vec(2, 2, vec![1.0; 4]).is_ok());
    }

    #[test]
    fn test_row_major_layout() {
        let m = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.get(0, 2), 3.0);
        assert_eq!(m.get(1, 0), 4.0);
        assert_eq!(m[(1, 2)], 6.0);
    }

    #[test]
    fn test_identity_requires_square() {
        let mut m = Matrix::new(2, 3);
        assert!(m.identity().is_err());

        let mut m = Matrix::square(3);
        m.fill(7.0);
        m.identity().unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(m.get(i, j), if i == j { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn test_randomize_respects_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let m = Matrix::random(16, -2.0..3.0, &mut rng);
        assert!(m.as_slice().iter().all(|&v| (-2.0..3.0).contains(&v)));
    }

    #[test]
    fn test_submatrix_roundtrip() {
        let m = sequential(4, 5);
        let sub = m.submatrix(1, 2, 3, 5).unwrap();
        assert_eq!(sub.shape(), (2, 3));
        assert_eq!(sub.as_slice(), &[7.0, 8.0, 9.0, 12.0, 13.0, 14.0]);

        let mut target = Matrix::new(4, 5);
        target.set_submatrix(1, 2, &sub).unwrap();
        assert_eq!(target.get(2, 4), 14.0);
        assert_eq!(target.get(0, 0), 0.0);
    }

    #[test]
    fn test_submatrix_is_independent_copy() {
        let m = sequential(3, 3);
        let mut sub = m.submatrix(0, 0, 2, 2).unwrap();
        sub.set(0, 0, 100.0);
        assert_eq!(m.get(0, 0), 0.0);
    }

    #[test]
    fn test_submatrix_out_of_bounds() {
        let m = sequential(3, 3);
        assert!(m.submatrix(0, 0, 4, 3).is_err());
        assert!(m.submatrix(2, 0, 1, 3).is_err());

        let mut target = Matrix::new(2, 2);
        assert!(target.set_submatrix(1, 1, &m).is_err());
    }

    #[test]
    fn test_arithmetic() {
        let a = sequential(2, 2);
        let b = Matrix::from_vec(2, 2, vec![1.0; 4]).unwrap();

        assert_eq!(a.add(&b).unwrap().as_slice(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(a.sub(&b).unwrap().as_slice(), &[-1.0, 0.0, 1.0, 2.0]);

        let mut c = a.clone();
        c.add_assign(&b).unwrap();
        c.sub_assign(&b).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_arithmetic_shape_mismatch() {
        let a = Matrix::new(2, 3);
        let b = Matrix::new(3, 2);
        assert!(a.add(&b).is_err());
        assert!(a.sub(&b).is_err());
        let mut c = a.clone();
        assert!(c.add_assign(&b).unwrap_err().is_configuration());
    }

    #[test]
    fn test_equals() {
        let a = sequential(3, 3);
        let mut b = a.clone();
        b.set(1, 1, b.get(1, 1) + 1e-12);
        assert!(a.equals(&b, 1e-9));
        b.set(1, 1, b.get(1, 1) + 1.0);
        assert!(!a.equals(&b, 1e-9));
        assert!(!a.equals(&Matrix::new(3, 2), 1.0));
    }

    #[test]
    fn test_compare_identical() {
        let a = sequential(4, 4);
        let result = a.compare(&a, 1e-8, 1e-5);
        assert!(result.all_close);
        assert_eq!(result.num_elements, 16);
        assert_eq!(result.num_failures, 0);
        assert_eq!(result.max_abs_error, 0.0);
        assert_eq!(result.rms_error, 0.0);
        assert!(result.worst.is_none());
    }

    #[test]
    fn test_compare_shape_mismatch() {
        let result = Matrix::new(2, 2).compare(&Matrix::new(2, 3), 1e-8, 1e-5);
        assert!(!result.all_close);
        assert_eq!(result.num_elements, 0);
        assert!(result.worst.is_none());
    }

    #[test]
    fn test_compare_statistics() {
        let a = Matrix::from_vec(1, 4, vec![1.0, 2.0, 0.0, 4.0]).unwrap();
        let b = Matrix::from_vec(1, 4, vec![1.0, 2.5, 0.0, 4.0]).unwrap();
        let result = a.compare(&b, 1e-8, 1e-5);

        assert!(!result.all_close);
        assert_eq!(result.num_failures, 1);
        assert_eq!(result.failure_rate, 25.0);
        assert_eq!(result.max_abs_error, 0.5);
        assert_eq!(result.mean_abs_error, 0.125);
        assert!((result.max_rel_error - 0.2).abs() < 1e-15);
        assert!((result.rms_error - (0.25f64 / 4.0).sqrt()).abs() < 1e-15);

        let worst = result.worst.unwrap();
        assert_eq!((worst.row, worst.col), (0, 1));
        assert_eq!(worst.this_value, 2.0);
        assert_eq!(worst.other_value, 2.5);
    }

    #[test]
    fn test_compare_relative_tolerance() {
        let a = Matrix::from_vec(1, 1, vec![1.0e6]).unwrap();
        let b = Matrix::from_vec(1, 1, vec![1.0e6 + 1.0]).unwrap();
        // |diff| = 1 <= 1e-5 * 1e6 = 10
        assert!(a.compare(&b, 1e-8, 1e-5).all_close);
        assert!(!a.compare(&b, 1e-8, 1e-7).all_close);
    }

    #[test]
    fn test_compare_counts_nan_as_failure() {
        let a = Matrix::from_vec(1, 2, vec![f64::NAN, 1.0]).unwrap();
        let b = Matrix::from_vec(1, 2, vec![1.0, 1.0]).unwrap();
        for result in [a.compare(&b, 1e-8, 1e-5), b.compare(&a, 1e-8, 1e-5)] {
            assert!(!result.all_close);
            assert_eq!(result.num_failures, 1);
            assert!(result.max_abs_error.is_nan());
            let worst = result.worst.unwrap();
            assert_eq!((worst.row, worst.col), (0, 0));
        }
        assert!(!a.compare(&a, 1e-8, 1e-5).all_close);
    }

    #[test]
    fn test_ndarray_conversion() {
        let m = sequential(3, 2);
        let array = m.to_array2();
        assert_eq!(array[[2, 1]], 5.0);
        assert_eq!(Matrix::from(array), m);

        let transposed = sequential(2, 3).to_array2().reversed_axes();
        let t = Matrix::from(transposed);
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t.get(2, 1), 5.0);
    }

    #[test]
    fn test_display_truncates() {
        let m = Matrix::square(12);
        let text = m.to_string();
        assert!(text.starts_with("Matrix 12x12:"));
        assert!(text.contains("..."));
    }
}
