//! Multiple testing correction

use crate::stats::cmp_nan_last;

/// Benjamini-Hochberg adjusted p-values
///
/// NaN p-values are ignored when counting tests and stay NaN.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let m = pvalues.iter().filter(|p| p.is_finite()).count();
    if m == 0 {
        return vec![f64::NAN; n];
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| cmp_nan_last(pvalues[a], pvalues[b]));

    let mut padj = vec![f64::NAN; n];
    let mut cummin = f64::INFINITY;
    let mut rank = m;
    for &i in order.iter().rev() {
        let p = pvalues[i];
        if p.is_finite() {
            cummin = cummin.min((p * m as f64 / rank as f64).min(1.0));
            padj[i] = cummin;
            rank -= 1;
        }
    }
    padj
}
