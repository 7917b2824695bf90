//! Fixed-size dense matrix helpers and Gauss-Jordan inversion.
//!
//! Matrices are plain row-major arrays, `Matrix<T, R, C> = [[T; C]; R]`, so every dimension is
//! known at compile time and nothing is allocated.

use core::cmp::Ordering;

use num_traits::{Float, NumCast};
use thiserror::Error;

/// Row-major `R x C` matrix.
pub type Matrix<T, const R: usize, const C: usize> = [[T; C]; R];

/// Errors from the inversion kernel.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum LinalgError {
    /// A pivot was zero or too small relative to the largest entry of the matrix.
    #[error("matrix is singular: pivot {index} is {pivot:e}")]
    Singular { index: usize, pivot: f64 },
    /// The matrix holds a NaN or an infinity.
    #[error("matrix has non-finite entries")]
    NonFinite,
}

/// The `D x D` identity.
pub fn identity<T: Float, const D: usize>() -> Matrix<T, D, D> {
    let mut m = [[T::zero(); D]; D];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = T::one();
    }
    m
}

/// Matrix product `a * b`.
pub fn mat_mul<T: Float, const R: usize, const K: usize, const C: usize>(
    a: &Matrix<T, R, K>,
    b: &Matrix<T, K, C>,
) -> Matrix<T, R, C> {
    let mut out = [[T::zero(); C]; R];
    for (out_row, a_row) in out.iter_mut().zip(a) {
        for (j, out) in out_row.iter_mut().enumerate() {
            *out = a_row
                .iter()
                .zip(b)
                .fold(T::zero(), |acc, (&a, b_row)| acc + a * b_row[j]);
        }
    }
    out
}

/// Matrix-vector product `a * v`.
pub fn mat_vec<T: Float, const R: usize, const C: usize>(
    a: &Matrix<T, R, C>,
    v: &[T; C],
) -> [T; R] {
    a.map(|row| dot(&row, v))
}

/// Inner product of two vectors.
pub fn dot<T: Float, const N: usize>(a: &[T; N], b: &[T; N]) -> T {
    a.iter().zip(b).fold(T::zero(), |acc, (&a, &b)| acc + a * b)
}

/// Gram matrix `Phi^T Phi` of a set of regressor rows.
pub fn gram<T: Float, const P: usize>(rows: &[[T; P]]) -> Matrix<T, P, P> {
    let mut g = [[T::zero(); P]; P];
    for row in rows {
        for i in 0..P {
            for j in 0..P {
                g[i][j] = g[i][j] + row[i] * row[j];
            }
        }
    }
    g
}

/// `Phi^T y` for a set of regressor rows and their targets.
///
/// Rows without a matching target are ignored.
pub fn transpose_mul_vec<T: Float, const P: usize>(rows: &[[T; P]], y: &[T]) -> [T; P] {
    let mut out = [T::zero(); P];
    for (row, &y) in rows.iter().zip(y) {
        for (out, &phi) in out.iter_mut().zip(row) {
            *out = *out + phi * y;
        }
    }
    out
}

/// Invert a square matrix by Gauss-Jordan elimination.
///
/// The pivot tolerance is `D` machine epsilons relative to the largest entry of `a`.
///
/// # Examples
///
/// ```
/// use fixed_control::linalg::{invert, mat_mul, identity};
///
/// let a = [[4.0_f64, 1.0], [2.0, 3.0]];
/// let a_inv = invert(&a).unwrap();
/// let i = mat_mul(&a_inv, &a);
/// assert!((i[0][0] - 1.0).abs() < 1e-12 && i[0][1].abs() < 1e-12);
///
/// assert_eq!(invert(&identity::<f64, 2>()).unwrap(), identity::<f64, 2>());
/// assert!(invert(&[[1.0_f64, 2.0], [2.0, 4.0]]).is_err());
/// ```
pub fn invert<T: Float, const D: usize>(a: &Matrix<T, D, D>) -> Result<Matrix<T, D, D>, LinalgError> {
    let tolerance = T::epsilon() * <T as NumCast>::from(D).unwrap_or_else(T::one);
    invert_with_tolerance(a, tolerance)
}

/// Invert a square matrix by Gauss-Jordan elimination with an explicit relative pivot tolerance.
///
/// Rows are swapped to bring the largest remaining entry of each column onto the diagonal, the
/// pivot row is normalized and the column is eliminated from every other row, applying the same
/// row operations to an identity that becomes the inverse.  A pivot whose magnitude is at or below
/// `tolerance` times the largest entry of `a` is reported as [`LinalgError::Singular`].
pub fn invert_with_tolerance<T: Float, const D: usize>(
    a: &Matrix<T, D, D>,
    tolerance: T,
) -> Result<Matrix<T, D, D>, LinalgError> {
    let mut work = *a;
    let mut inv = identity::<T, D>();

    let mut scale = T::zero();
    for &x in a.iter().flatten() {
        if !x.is_finite() {
            return Err(LinalgError::NonFinite);
        }
        scale = scale.max(x.abs());
    }
    let threshold = tolerance * scale;

    for i in 0..D {
        let p = (i..D)
            .max_by(|&r, &s| {
                work[r][i]
                    .abs()
                    .partial_cmp(&work[s][i].abs())
                    .unwrap_or(Ordering::Equal)
            })
            .unwrap_or(i);
        if p != i {
            work.swap(i, p);
            inv.swap(i, p);
        }

        let pivot = work[i][i];
        if pivot.abs() <= threshold {
            return Err(LinalgError::Singular {
                index: i,
                pivot: pivot.to_f64().unwrap_or(f64::NAN),
            });
        }

        for j in 0..D {
            work[i][j] = work[i][j] / pivot;
            inv[i][j] = inv[i][j] / pivot;
        }

        for k in 0..D {
            if k == i {
                continue;
            }
            let ratio = work[k][i];
            if ratio == T::zero() {
                continue;
            }
            for j in 0..D {
                work[k][j] = work[k][j] - ratio * work[i][j];
                inv[k][j] = inv[k][j] - ratio * inv[i][j];
            }
        }
    }

    Ok(inv)
}
