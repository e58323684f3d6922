//! GLM fitting using Iteratively Reweighted Least Squares (IRLS)

use ndarray::{Array2, Array3, ArrayView1};
use rayon::prelude::*;

use super::design::{create_design_matrix, DesignInfo};
use super::linalg::{invert_spd, solve_spd};
use super::negative_binomial::{nb_log_likelihood, nb_mean, nb_weight, MAX_LFC_BETA, MIN_MU};
use crate::data::ExpressionDataSet;
use crate::error::{PipelineError, Result};

/// Ridge penalty on X'WX, equivalent to a very wide normal prior on log2 coefficients
fn ridge_lambda() -> f64 {
    let ln2 = std::f64::consts::LN_2;
    1e-6 / (ln2 * ln2)
}

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change for convergence
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

/// Fit for a single gene
#[derive(Debug, Clone)]
pub struct GeneFit {
    /// Coefficients on the natural log scale
    pub coefficients: Vec<f64>,
    /// Covariance matrix, row-major n_coefs x n_coefs
    pub covariance: Vec<f64>,
    pub converged: bool,
    pub mu: Vec<f64>,
    pub log_likelihood: f64,
}

impl GeneFit {
    fn unfitted(n_coefs: usize, n_samples: usize) -> Self {
        Self {
            coefficients: vec![f64::NAN; n_coefs],
            covariance: vec![f64::NAN; n_coefs * n_coefs],
            converged: false,
            mu: vec![0.0; n_samples],
            log_likelihood: f64::NAN,
        }
    }

    pub fn standard_error(&self, coef: usize) -> f64 {
        let n = self.coefficients.len();
        let var = self.covariance[coef * n + coef];
        if var > 0.0 {
            var.sqrt()
        } else {
            f64::NAN
        }
    }
}

/// Fitted model for every gene of a dataset
#[derive(Debug, Clone)]
pub struct ModelFit {
    pub design: Array2<f64>,
    pub info: DesignInfo,
    /// genes x coefficients, natural log scale
    pub coefficients: Array2<f64>,
    /// genes x coefficients x coefficients
    pub covariances: Array3<f64>,
    pub converged: Vec<bool>,
    /// Genes that were fitted (some non-zero count and a finite dispersion)
    pub tested: Vec<bool>,
}

impl ModelFit {
    pub fn n_converged(&self) -> usize {
        self.converged.iter().filter(|&&c| c).count()
    }
}

/// Fit the NB GLM to all genes in the dataset
pub fn fit_model(dataset: &mut ExpressionDataSet, params: &GlmFitParams) -> Result<()> {
    let size_factors = dataset.size_factors().ok_or_else(|| PipelineError::InvalidInput {
        reason: "Size factors must be estimated before fitting the model".to_string(),
    })?;
    let dispersions = dataset.dispersions().ok_or_else(|| PipelineError::InvalidInput {
        reason: "Dispersions must be estimated before fitting the model".to_string(),
    })?;

    let (design, info) = create_design_matrix(dataset)?;
    let n_coefs = design.ncols();
    let n_genes = dataset.n_genes();
    let n_samples = dataset.n_samples();
    let counts = dataset.counts().counts();
    let alphas = &dispersions.final_dispersions;

    let fits: Vec<Option<GeneFit>> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let alpha = alphas[i];
            let row = counts.row(i);
            if !alpha.is_finite() || row.iter().all(|&c| c == 0.0) {
                None
            } else {
                Some(fit_gene(row, &design, size_factors.view(), alpha, params))
            }
        })
        .collect();

    let mut coefficients = Array2::from_elem((n_genes, n_coefs), f64::NAN);
    let mut covariances = Array3::from_elem((n_genes, n_coefs, n_coefs), f64::NAN);
    let mut converged = Vec::with_capacity(n_genes);
    let mut tested = Vec::with_capacity(n_genes);

    for (i, fit) in fits.into_iter().enumerate() {
        let fit = match fit {
            Some(fit) => {
                tested.push(true);
                fit
            }
            None => {
                tested.push(false);
                GeneFit::unfitted(n_coefs, n_samples)
            }
        };
        for j in 0..n_coefs {
            coefficients[[i, j]] = fit.coefficients[j];
            for k in 0..n_coefs {
                covariances[[i, j, k]] = fit.covariance[j * n_coefs + k];
            }
        }
        converged.push(fit.converged);
    }

    let model = ModelFit {
        design,
        info,
        coefficients,
        covariances,
        converged,
        tested,
    };

    let n_tested = model.tested.iter().filter(|&&t| t).count();
    let n_failed = n_tested - model.n_converged();
    log::info!(
        "Fitted {} ({} genes, {} did not converge)",
        model.info.formula(),
        n_tested,
        n_failed
    );

    dataset.set_model(model)
}

/// Fit one gene by IRLS
pub fn fit_gene(
    counts: ArrayView1<f64>,
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
    alpha: f64,
    params: &GlmFitParams,
) -> GeneFit {
    let n_samples = counts.len();
    let n_coefs = design.ncols();
    let lambda = ridge_lambda();

    // Start from least squares on log normalized counts
    let log_counts: Vec<f64> = counts
        .iter()
        .zip(size_factors.iter())
        .map(|(&c, &s)| (c / s + 0.1).ln())
        .collect();
    let mut beta = weighted_least_squares(design, &vec![1.0; n_samples], &log_counts, lambda)
        .filter(|b| b.iter().all(|v| v.is_finite()))
        .unwrap_or_else(|| {
            let mean = log_counts.iter().sum::<f64>() / n_samples as f64;
            let mut b = vec![0.0; n_coefs];
            b[0] = mean;
            b
        });

    let linear_predictor = |beta: &[f64], i: usize| -> f64 { (0..n_coefs).map(|j| design[[i, j]] * beta[j]).sum() };

    let mut converged = false;
    let mut dev_old = 0.0_f64;
    let mut weights = vec![0.0; n_samples];
    let mut working = vec![0.0; n_samples];

    for iter in 0..params.maxit {
        for i in 0..n_samples {
            let mu = nb_mean(linear_predictor(&beta, i), size_factors[i]).max(MIN_MU);
            weights[i] = nb_weight(mu, alpha);
            working[i] = (mu / size_factors[i]).ln() + (counts[i] - mu) / mu;
        }

        beta = match weighted_least_squares(design, &weights, &working, lambda) {
            Some(b) => b,
            None => break,
        };

        if beta.iter().any(|&b| !b.is_finite() || b.abs() > MAX_LFC_BETA) {
            break;
        }

        let dev: f64 = (0..n_samples)
            .map(|i| {
                let mu = nb_mean(linear_predictor(&beta, i), size_factors[i]).max(MIN_MU);
                -2.0 * nb_log_likelihood(counts[i], mu, alpha)
            })
            .sum();

        let conv_test = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv_test.is_nan() {
            break;
        }
        if iter > 0 && conv_test < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    let mu: Vec<f64> = (0..n_samples)
        .map(|i| nb_mean(linear_predictor(&beta, i), size_factors[i]).max(MIN_MU))
        .collect();
    let final_weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let log_likelihood = (0..n_samples).map(|i| nb_log_likelihood(counts[i], mu[i], alpha)).sum();
    let covariance = sandwich_covariance(design, &final_weights, lambda)
        .unwrap_or_else(|| vec![f64::NAN; n_coefs * n_coefs]);

    GeneFit {
        coefficients: beta,
        covariance,
        converged,
        mu,
        log_likelihood,
    }
}

/// X'WX as a flat row-major matrix
pub(crate) fn xtwx(design: &Array2<f64>, weights: &[f64]) -> Vec<f64> {
    let n_coefs = design.ncols();
    let mut out = vec![0.0; n_coefs * n_coefs];
    for (i, &w) in weights.iter().enumerate() {
        for j in 0..n_coefs {
            let xij = w * design[[i, j]];
            for k in 0..n_coefs {
                out[j * n_coefs + k] += xij * design[[i, k]];
            }
        }
    }
    out
}

/// Solve (X'WX + lambda I) beta = X'Wz
fn weighted_least_squares(design: &Array2<f64>, weights: &[f64], response: &[f64], lambda: f64) -> Option<Vec<f64>> {
    let n_coefs = design.ncols();
    let mut a = xtwx(design, weights);
    for j in 0..n_coefs {
        a[j * n_coefs + j] += lambda;
    }
    let mut b = vec![0.0; n_coefs];
    for (i, &w) in weights.iter().enumerate() {
        for j in 0..n_coefs {
            b[j] += w * design[[i, j]] * response[i];
        }
    }
    solve_spd(&a, &b, n_coefs)
}

/// Sigma = (X'WX + lambda)^-1 X'WX (X'WX + lambda)^-1
fn sandwich_covariance(design: &Array2<f64>, weights: &[f64], lambda: f64) -> Option<Vec<f64>> {
    let n = design.ncols();
    let info = xtwx(design, weights);
    let mut ridged = info.clone();
    for j in 0..n {
        ridged[j * n + j] += lambda;
    }
    let inv = invert_spd(&ridged, n)?;

    let mut temp = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            temp[i * n + j] = (0..n).map(|k| inv[i * n + k] * info[k * n + j]).sum();
        }
    }
    let mut sigma = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            sigma[i * n + j] = (0..n).map(|k| temp[i * n + k] * inv[k * n + j]).sum();
        }
    }
    Some(sigma)
}
