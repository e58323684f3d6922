//! Maximum a posteriori dispersion shrinkage towards the trend

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use super::gene_wise::cox_reid_log_likelihood;
use crate::stats::{golden_section_max, mad, trigamma};

/// Lower bound on the log-dispersion prior variance
pub const MIN_PRIOR_VAR: f64 = 0.25;

/// Prior variance and observed variance of log residuals
///
/// varLogDispEsts = mad(log(gene-wise) - log(trend))^2 over genes above
/// 100 * min_disp. The prior variance subtracts the sampling variance
/// trigamma((m - p) / 2) and is floored at 0.25.
pub fn estimate_prior_variance(
    gene_dispersions: &[f64],
    trended: &[f64],
    min_disp: f64,
    n_samples: usize,
    n_coefs: usize,
) -> (f64, f64) {
    let residuals: Vec<f64> = gene_dispersions
        .iter()
        .zip(trended)
        .filter(|(&g, &t)| g.is_finite() && t.is_finite() && g >= 100.0 * min_disp && t > 0.0)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }

    let var_log_disp_ests = mad(&residuals).powi(2);
    if n_samples <= n_coefs {
        return (MIN_PRIOR_VAR, var_log_disp_ests);
    }

    let df = (n_samples - n_coefs) as f64;
    let prior_var = (var_log_disp_ests - trigamma(df / 2.0)).max(MIN_PRIOR_VAR);
    log::debug!(
        "Dispersion prior: df={}, varLogDispEsts={:.4}, prior variance={:.4}",
        df,
        var_log_disp_ests,
        prior_var
    );
    (prior_var, var_log_disp_ests)
}

/// MAP estimate for every gene, in parallel
///
/// Genes with a NaN gene-wise or trended value stay NaN.
#[allow(clippy::too_many_arguments)]
pub(crate) fn estimate_map_dispersions(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    mu: &Array2<f64>,
    gene_dispersions: &[f64],
    trended: &[f64],
    prior_var: f64,
    min_disp: f64,
    max_disp: f64,
    tol: f64,
) -> Vec<f64> {
    (0..counts.nrows())
        .into_par_iter()
        .map(|i| {
            let (g, t) = (gene_dispersions[i], trended[i]);
            if !g.is_finite() || !t.is_finite() || t <= 0.0 {
                return f64::NAN;
            }
            let gene_counts = counts.row(i).to_vec();
            let gene_mu = mu.row(i).to_vec();
            fit_map_dispersion(&gene_counts, design, &gene_mu, t, prior_var, min_disp, max_disp, tol)
        })
        .collect()
}

/// Maximize the Cox-Reid likelihood plus a normal prior on log(alpha)
#[allow(clippy::too_many_arguments)]
pub fn fit_map_dispersion(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    trend: f64,
    prior_var: f64,
    min_disp: f64,
    max_disp: f64,
    tol: f64,
) -> f64 {
    let prior_mean = trend.ln();
    let log_posterior = |log_alpha: f64| {
        cox_reid_log_likelihood(counts, design, mu, log_alpha.exp())
            - 0.5 * (log_alpha - prior_mean).powi(2) / prior_var
    };
    let lower = (min_disp.max(trend / 1e3)).ln().min(prior_mean);
    let upper = max_disp.ln().max(prior_mean);
    golden_section_max(log_posterior, lower, upper, tol)
        .exp()
        .clamp(min_disp, max_disp)
}

/// Upper outliers: log(gene-wise) - log(trend) beyond `outlier_sd` standard deviations
pub fn flag_outliers(gene_dispersions: &[f64], trended: &[f64], var_log_disp_ests: f64, outlier_sd: f64) -> Vec<bool> {
    let threshold = outlier_sd * var_log_disp_ests.sqrt();
    gene_dispersions
        .iter()
        .zip(trended)
        .map(|(&g, &t)| g.is_finite() && t.is_finite() && g > 0.0 && t > 0.0 && g.ln() - t.ln() > threshold)
        .collect()
}
