//! Principal components of a samples x features matrix by power iteration
//!
//! Works on the samples x samples Gram matrix, which is small for RNA-seq
//! designs, and deflates after each component.

use ndarray::{Array1, Array2, ArrayView2, Axis};

const MAX_ITER: usize = 1000;
const TOL: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct Pca {
    /// Unit-norm left singular vectors, samples x k
    pub vectors: Array2<f64>,
    /// Squared singular values
    pub eigenvalues: Vec<f64>,
    /// Fraction of total variance per component
    pub explained: Vec<f64>,
}

impl Pca {
    /// Sample coordinates: singular vectors scaled by singular values
    pub fn scores(&self) -> Array2<f64> {
        let mut scores = self.vectors.clone();
        for (mut col, &lambda) in scores.axis_iter_mut(Axis(1)).zip(&self.eigenvalues) {
            col *= lambda.max(0.0).sqrt();
        }
        scores
    }

    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }
}

/// Center each feature across samples
pub fn center_columns(data: ArrayView2<f64>) -> Array2<f64> {
    let mut centered = data.to_owned();
    for mut col in centered.axis_iter_mut(Axis(1)) {
        let mean = col.sum() / col.len().max(1) as f64;
        col -= mean;
    }
    centered
}

/// Top `k` components of already centered `data` (samples x features)
///
/// Stops early when the remaining variance is numerically zero.
pub fn pca(data: ArrayView2<f64>, k: usize) -> Pca {
    let n = data.nrows();
    let mut gram = data.dot(&data.t());
    let total = gram.diag().sum();

    let mut vectors = Vec::new();
    let mut eigenvalues = Vec::new();
    for _ in 0..k.min(n) {
        let Some((v, lambda)) = leading_eigenvector(&gram) else {
            break;
        };
        if lambda <= TOL * total.max(1.0) {
            break;
        }
        // deflate
        for i in 0..n {
            for j in 0..n {
                gram[[i, j]] -= lambda * v[i] * v[j];
            }
        }
        vectors.push(v);
        eigenvalues.push(lambda);
    }

    let mut matrix = Array2::zeros((n, vectors.len()));
    for (c, v) in vectors.iter().enumerate() {
        matrix.column_mut(c).assign(v);
    }
    let explained = eigenvalues
        .iter()
        .map(|&l| if total > 0.0 { l / total } else { 0.0 })
        .collect();
    Pca {
        vectors: matrix,
        eigenvalues,
        explained,
    }
}

fn leading_eigenvector(gram: &Array2<f64>) -> Option<(Array1<f64>, f64)> {
    let n = gram.nrows();
    if n == 0 {
        return None;
    }
    // not orthogonal to any sign pattern a centered design produces
    let mut v = Array1::from_shape_fn(n, |i| (i as f64 + 1.0).sqrt());
    let norm = v.dot(&v).sqrt();
    v /= norm;

    let mut lambda = 0.0;
    for _ in 0..MAX_ITER {
        let next = gram.dot(&v);
        let norm = next.dot(&next).sqrt();
        if !norm.is_finite() || norm == 0.0 {
            return None;
        }
        let next = next / norm;
        let change = (&next - &v).mapv(f64::abs).sum();
        v = next;
        lambda = v.dot(&gram.dot(&v));
        if change < 1e-10 {
            break;
        }
    }

    // largest entry positive
    let pivot = v.iter().copied().fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
    if pivot < 0.0 {
        v.mapv_inplace(|x| -x);
    }
    Some((v, lambda))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_pca_recovers_dominant_axis() {
        // two groups separated along the first feature
        let data = array![
            [5.0, 0.1, 0.0],
            [5.2, -0.1, 0.1],
            [-5.1, 0.0, -0.1],
            [-5.1, 0.0, 0.0],
        ];
        let centered = center_columns(data.view());
        let result = pca(centered.view(), 2);

        assert_eq!(result.n_components(), 2);
        assert!(result.explained[0] > 0.99);
        let pc1 = result.vectors.column(0);
        assert!((pc1.dot(&pc1) - 1.0).abs() < 1e-9);
        assert!(pc1[0] > 0.0 && pc1[1] > 0.0 && pc1[2] < 0.0 && pc1[3] < 0.0);
        assert!(result.vectors.column(0).dot(&result.vectors.column(1)).abs() < 1e-6);
    }

    #[test]
    fn test_pca_stops_at_rank() {
        let data = array![[1.0, 2.0], [-1.0, -2.0]];
        let result = pca(data.view(), 2);
        assert_eq!(result.n_components(), 1);
        assert!((result.eigenvalues[0] - 10.0).abs() < 1e-9);
        assert!((result.scores()[[0, 0]].abs() - 5.0_f64.sqrt()).abs() < 1e-9);
    }
}
