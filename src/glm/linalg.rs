//! Small dense linear algebra on row-major `Vec<f64>` matrices
//!
//! Design matrices here have a handful of columns, so a plain Cholesky
//! factorization is all the model fitting needs.

/// Lower-triangular Cholesky factor of a symmetric positive definite n x n matrix.
///
/// Returns `None` when a pivot is not strictly positive.
pub fn cholesky(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    Some(l)
}

/// Solve `L L' x = b` given the Cholesky factor `l`
fn solve_with_factor(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

/// Solve `A x = b` for symmetric positive definite `A`
pub fn solve_spd(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    cholesky(a, n).map(|l| solve_with_factor(&l, b, n))
}

/// Inverse of a symmetric positive definite matrix
pub fn invert_spd(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let l = cholesky(a, n)?;
    let mut inv = vec![0.0; n * n];
    let mut e = vec![0.0; n];
    for i in 0..n {
        e.iter_mut().for_each(|v| *v = 0.0);
        e[i] = 1.0;
        let col = solve_with_factor(&l, &e, n);
        for j in 0..n {
            inv[j * n + i] = col[j];
        }
    }
    Some(inv)
}

/// log(det(A)) for symmetric positive definite `A`
pub fn log_det_spd(a: &[f64], n: usize) -> Option<f64> {
    let l = cholesky(a, n)?;
    Some((0..n).map(|i| 2.0 * l[i * n + i].ln()).sum())
}

/// Numerical rank of an r x c matrix by Gaussian elimination with partial pivoting
pub fn matrix_rank(m: &[f64], rows: usize, cols: usize) -> usize {
    let mut a = m.to_vec();
    let scale = a.iter().fold(0.0_f64, |acc, v| acc.max(v.abs())).max(1.0);
    let tol = 1e-10 * scale * rows.max(cols) as f64;
    let mut rank = 0;

    for col in 0..cols {
        if rank == rows {
            break;
        }
        let pivot = (rank..rows)
            .max_by(|&x, &y| {
                a[x * cols + col]
                    .abs()
                    .partial_cmp(&a[y * cols + col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(rank);
        if a[pivot * cols + col].abs() <= tol {
            continue;
        }
        for k in 0..cols {
            a.swap(rank * cols + k, pivot * cols + k);
        }
        for r in (rank + 1)..rows {
            let factor = a[r * cols + col] / a[rank * cols + col];
            for k in col..cols {
                a[r * cols + k] -= factor * a[rank * cols + k];
            }
        }
        rank += 1;
    }
    rank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_spd() {
        // [[4, 2], [2, 3]] x = [2, 1] -> x = [0.5, 0]
        let x = solve_spd(&[4.0, 2.0, 2.0, 3.0], &[2.0, 1.0], 2).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-12);
        assert!(x[1].abs() < 1e-12);
    }

    #[test]
    fn test_invert_spd() {
        let inv = invert_spd(&[4.0, 2.0, 2.0, 3.0], 2).unwrap();
        // inverse = 1/8 * [[3, -2], [-2, 4]]
        let expected = [0.375, -0.25, -0.25, 0.5];
        for (a, b) in inv.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_not_positive_definite() {
        assert!(cholesky(&[1.0, 2.0, 2.0, 1.0], 2).is_none());
    }

    #[test]
    fn test_log_det() {
        let ld = log_det_spd(&[4.0, 2.0, 2.0, 3.0], 2).unwrap();
        assert!((ld - 8.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_matrix_rank() {
        // third column = first + second
        let m = [1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 0.0, 1.0, 1.0, 1.0, 2.0];
        assert_eq!(matrix_rank(&m, 4, 3), 2);
        let full = [1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0];
        assert_eq!(matrix_rank(&full, 4, 2), 2);
    }
}
