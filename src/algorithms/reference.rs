//! Library-backed product used as the correctness oracle.

use ndarray::linalg::general_mat_mul;
use ndarray::Array2;

use crate::algorithms::check_multipliable;
use crate::error::Result;
use crate::matrix::Matrix;

/// `C = 1.0 * A * B + 0.0 * C` through ndarray's GEMM.
pub fn multiply(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    check_multipliable(a, b)?;
    let (m, n) = (a.rows(), b.cols());
    if m == 0 || n == 0 || a.cols() == 0 {
        return Ok(Matrix::new(m, n));
    }

    let mut c = Array2::<f64>::zeros((m, n));
    general_mat_mul(1.0, &a.view(), &b.view(), 0.0, &mut c);
    Ok(Matrix::from(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_product() {
        let a = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Matrix::from_vec(2, 2, vec![5.0, 6.0, 7.0, 8.0]).unwrap();
        let c = multiply(&a, &b).unwrap();
        assert_eq!(c.as_slice(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_rectangular() {
        let a = Matrix::from_fn(3, 5, |i, j| (i + j) as f64);
        let b = Matrix::from_fn(5, 2, |i, j| (i * 2 + j) as f64);
        let c = multiply(&a, &b).unwrap();
        assert_eq!(c.shape(), (3, 2));
        let expected: f64 = (0..5).map(|p| (p * (p * 2 + 1)) as f64).sum();
        assert_eq!(c.get(0, 1), expected);
    }

    #[test]
    fn test_mismatch() {
        let err = multiply(&Matrix::new(2, 3), &Matrix::new(4, 2)).unwrap_err();
        assert!(err.is_configuration());
    }
}
