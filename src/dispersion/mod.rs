//! Dispersion estimation for negative binomial models
//!
//! Three stages: gene-wise Cox-Reid estimates, a dispersion-mean trend, and
//! MAP shrinkage of the gene-wise estimates towards the trend.

mod gene_wise;
mod map;
mod trend;

pub use map::{estimate_prior_variance, fit_map_dispersion, flag_outliers, MIN_PRIOR_VAR};
pub use trend::TrendFitMethod;

use serde::{Deserialize, Serialize};

use crate::data::ExpressionDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::create_design_matrix;
use crate::io::nullable_f64_vec;

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone)]
pub struct DispersionParams {
    /// Minimum dispersion value
    pub min_disp: f64,
    /// Golden-section tolerance on log(alpha)
    pub disp_tol: f64,
    /// Rounds of alternating mean fit and dispersion search
    pub alternations: usize,
    /// Gene-wise estimates this many SDs above the trend are not shrunk
    pub outlier_sd: f64,
    pub trend: TrendFitMethod,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            alternations: 3,
            outlier_sd: 2.0,
            trend: TrendFitMethod::Parametric,
        }
    }
}

/// Per-gene dispersion estimates from all three stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispersionEstimates {
    #[serde(deserialize_with = "nullable_f64_vec")]
    pub gene_wise: Vec<f64>,
    #[serde(deserialize_with = "nullable_f64_vec")]
    pub trended: Vec<f64>,
    /// Values used for model fitting: MAP, or gene-wise for outliers
    #[serde(deserialize_with = "nullable_f64_vec")]
    pub final_dispersions: Vec<f64>,
    pub outliers: Vec<bool>,
    pub prior_var: f64,
    pub var_log_disp_ests: f64,
    /// (a0, a1) of the parametric trend a0 + a1 / mean
    pub trend_coefs: Option<(f64, f64)>,
}

impl DispersionEstimates {
    pub fn n_outliers(&self) -> usize {
        self.outliers.iter().filter(|&&o| o).count()
    }
}

/// Estimate gene-wise, trended and final dispersions and store them on the dataset
pub fn estimate_dispersions(dataset: &mut ExpressionDataSet, params: &DispersionParams) -> Result<()> {
    let size_factors = dataset
        .size_factors()
        .ok_or_else(|| PipelineError::InvalidInput {
            reason: "Size factors must be estimated before dispersions".to_string(),
        })?
        .clone();
    let base_means = dataset.base_means().unwrap_or_default();
    let (design, info) = create_design_matrix(dataset)?;
    let counts = dataset.counts().counts();
    let n_samples = dataset.n_samples();

    log::info!("Estimating dispersions for {} genes, design {}", dataset.n_genes(), info.formula());

    let gene_fit = gene_wise::estimate_gene_dispersions(counts, size_factors.view(), &design, params);
    let trend = trend::fit_dispersion_trend(&base_means, &gene_fit.dispersions, params.min_disp, params.trend)?;

    let (prior_var, var_log_disp_ests) = estimate_prior_variance(
        &gene_fit.dispersions,
        &trend.trended,
        params.min_disp,
        n_samples,
        design.ncols(),
    );

    let map_dispersions = map::estimate_map_dispersions(
        counts,
        &design,
        &gene_fit.mu,
        &gene_fit.dispersions,
        &trend.trended,
        prior_var,
        params.min_disp,
        gene_wise::max_dispersion(n_samples),
        params.disp_tol,
    );

    let outliers = flag_outliers(&gene_fit.dispersions, &trend.trended, var_log_disp_ests, params.outlier_sd);
    let final_dispersions: Vec<f64> = map_dispersions
        .iter()
        .zip(&gene_fit.dispersions)
        .zip(&outliers)
        .map(|((&m, &g), &outlier)| if outlier { g } else { m })
        .collect();

    let estimates = DispersionEstimates {
        gene_wise: gene_fit.dispersions,
        trended: trend.trended,
        final_dispersions,
        outliers,
        prior_var,
        var_log_disp_ests,
        trend_coefs: trend.coefs,
    };

    log::info!(
        "Dispersions: prior variance {:.4}, {} outliers kept at gene-wise values",
        estimates.prior_var,
        estimates.n_outliers()
    );

    dataset.set_dispersions(estimates)
}
